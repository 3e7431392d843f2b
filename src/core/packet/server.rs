//! Server → admin packets.
//!
//! Most kinds are flat field lists. A few end in a variable-length tail that
//! the schema hands to a custom routine:
//!
//! - the protocol packet's frequency table, a run of
//!   `[u8 more=1] [u16 update type] [u16 frequency mask]` entries closed by a
//!   single `0` byte
//! - the share owners of company info/update packets, one `u8` per owner
//! - the quarterly history of company economy packets
//! - the raw payload of command names/logging packets

use super::{BOOL, DATE, I64, STR, U16, U32, U64, U8};
use crate::core::schema::{decode_repeated, encode_repeated, FieldKind};
use crate::core::wire::{FromValue, Value, WireType};
use crate::error::FieldError;
use bytes::{BufMut, BytesMut};
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// One frequency table entry: separator, update type, mask
const FREQUENCY_ENTRY: [WireType; 3] = [WireType::U8, WireType::U16, WireType::U16];

const QUARTER_RECORD: [WireType; 3] = [WireType::U64, WireType::U16, WireType::U16];

const FREQUENCY_TABLE: FieldKind = FieldKind::Custom {
    name: "frequency_table",
    decode: decode_frequency_table,
    encode: encode_frequency_table,
};

const SHARE_OWNERS: FieldKind = FieldKind::Custom {
    name: "share_owners",
    decode: decode_byte_tail,
    encode: encode_byte_tail,
};

const QUARTERS: FieldKind = FieldKind::Custom {
    name: "quarter_records",
    decode: decode_quarters,
    encode: encode_quarters,
};

const RAW_TAIL: FieldKind = FieldKind::Custom {
    name: "raw",
    decode: decode_byte_tail,
    encode: encode_byte_tail,
};

fn decode_frequency_table(buf: &[u8], cursor: &mut usize) -> Result<Value, FieldError> {
    let Value::List(entries) = decode_repeated(buf, cursor, &FREQUENCY_ENTRY)? else {
        return Ok(Value::List(Vec::new()));
    };
    // the closing separator is consumed only when present
    if *cursor < buf.len() {
        *cursor += 1;
    }
    let pairs = entries
        .into_iter()
        .filter_map(|entry| match entry {
            Value::List(mut fields) if fields.len() == 3 => {
                let freq = fields.pop()?;
                let key = fields.pop()?;
                Some(Value::List(vec![key, freq]))
            }
            _ => None,
        })
        .collect();
    Ok(Value::List(pairs))
}

fn encode_frequency_table(value: &Value, out: &mut BytesMut) -> Result<(), FieldError> {
    let table = BTreeMap::<u16, u16>::from_value(value.clone())?;
    for (key, freq) in table {
        out.put_u8(1);
        out.put_u16_le(key);
        out.put_u16_le(freq);
    }
    out.put_u8(0);
    Ok(())
}

fn decode_byte_tail(buf: &[u8], cursor: &mut usize) -> Result<Value, FieldError> {
    decode_repeated(buf, cursor, &[WireType::U8])
}

fn encode_byte_tail(value: &Value, out: &mut BytesMut) -> Result<(), FieldError> {
    encode_repeated(value, out, &[WireType::U8])
}

fn decode_quarters(buf: &[u8], cursor: &mut usize) -> Result<Value, FieldError> {
    decode_repeated(buf, cursor, &QUARTER_RECORD)
}

fn encode_quarters(value: &Value, out: &mut BytesMut) -> Result<(), FieldError> {
    encode_repeated(value, out, &QUARTER_RECORD)
}

/// Company figures for one past quarter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuarterRecord {
    pub company_value: u64,
    pub performance: u16,
    pub delivered_cargo: u16,
}

impl From<QuarterRecord> for Value {
    fn from(record: QuarterRecord) -> Self {
        Value::List(vec![
            record.company_value.into(),
            record.performance.into(),
            record.delivered_cargo.into(),
        ])
    }
}

impl FromValue for QuarterRecord {
    fn from_value(value: Value) -> Result<Self, FieldError> {
        let found = value.kind_name();
        let Value::List(fields) = value else {
            return Err(FieldError::TypeMismatch {
                wire_type: "quarter_record",
                found,
            });
        };
        let mut fields = fields.into_iter();
        match (fields.next(), fields.next(), fields.next()) {
            (Some(value), Some(performance), Some(cargo)) => Ok(Self {
                company_value: u64::from_value(value)?,
                performance: u16::from_value(performance)?,
                delivered_cargo: u16::from_value(cargo)?,
            }),
            _ => Err(FieldError::TypeMismatch {
                wire_type: "quarter_record",
                found,
            }),
        }
    }
}

define_packets! {
    /// Packets the server sends to the admin.
    pub enum ServerPacket {
        /// The server cannot accept more admins.
        Full(ServerFull) {},
        /// This admin is banned.
        Banned(ServerBanned) {},
        Error(ServerError) {
            error_code: u8 => U8,
        },
        /// Protocol version and supported frequencies per update type.
        Protocol(ServerProtocol) {
            version: u8 => U8,
            supported_frequencies: BTreeMap<u16, u16> => FREQUENCY_TABLE,
        },
        Welcome(ServerWelcome) {
            server_name: String => STR,
            revision: String => STR,
            is_dedicated: bool => BOOL,
            map_name: String => STR,
            seed: u32 => U32,
            landscape: u8 => U8,
            creation_date: NaiveDate => DATE,
            map_x: u16 => U16,
            map_y: u16 => U16,
        },
        NewGame(ServerNewGame) {},
        Shutdown(ServerShutdown) {},
        /// Current in-game date.
        Date(ServerDate) {
            date: NaiveDate => DATE,
        },
        ClientJoin(ServerClientJoin) {
            client_id: u32 => U32,
        },
        ClientInfo(ServerClientInfo) {
            client_id: u32 => U32,
            address: String => STR,
            name: String => STR,
            language: u8 => U8,
            join_date: NaiveDate => DATE,
            play_as: u8 => U8,
        },
        ClientUpdate(ServerClientUpdate) {
            client_id: u32 => U32,
            name: String => STR,
            play_as: u8 => U8,
        },
        ClientQuit(ServerClientQuit) {
            client_id: u32 => U32,
        },
        ClientError(ServerClientError) {
            client_id: u32 => U32,
            error_code: u8 => U8,
        },
        CompanyNew(ServerCompanyNew) {
            company_id: u8 => U8,
        },
        CompanyInfo(ServerCompanyInfo) {
            company_id: u8 => U8,
            name: String => STR,
            manager: String => STR,
            colour: u8 => U8,
            is_passworded: bool => BOOL,
            inaugurated_year: u32 => U32,
            is_ai: bool => BOOL,
            months_of_bankruptcy: u8 => U8,
            share_owners: Vec<u8> => SHARE_OWNERS,
        },
        CompanyUpdate(ServerCompanyUpdate) {
            company_id: u8 => U8,
            name: String => STR,
            manager: String => STR,
            colour: u8 => U8,
            is_passworded: bool => BOOL,
            is_ai: bool => BOOL,
            months_of_bankruptcy: u8 => U8,
            share_owners: Vec<u8> => SHARE_OWNERS,
        },
        CompanyRemove(ServerCompanyRemove) {
            company_id: u8 => U8,
            reason: u8 => U8,
        },
        CompanyEconomy(ServerCompanyEconomy) {
            company_id: u8 => U8,
            money: i64 => I64,
            loan: u64 => U64,
            income: i64 => I64,
            delivered_cargo: u16 => U16,
            quarters: Vec<QuarterRecord> => QUARTERS,
        },
        CompanyStats(ServerCompanyStats) {
            company_id: u8 => U8,
            train_vehicles: u16 => U16,
            lorry_vehicles: u16 => U16,
            bus_vehicles: u16 => U16,
            plane_vehicles: u16 => U16,
            ship_vehicles: u16 => U16,
            train_stations: u16 => U16,
            lorry_stations: u16 => U16,
            bus_stations: u16 => U16,
            plane_stations: u16 => U16,
            ship_stations: u16 => U16,
        },
        Chat(ServerChat) {
            network_action: u8 => U8,
            destination_type: u8 => U8,
            client_id: u32 => U32,
            message: String => STR,
            data: u64 => U64,
        },
        /// One line of RCON output.
        Rcon(ServerRcon) {
            colour: u16 => U16,
            result: String => STR,
        },
        Console(ServerConsole) {
            origin: String => STR,
            message: String => STR,
        },
        CmdNames(ServerCmdNames) {
            data: Vec<u8> => RAW_TAIL,
        },
        CmdLogging(ServerCmdLogging) {
            data: Vec<u8> => RAW_TAIL,
        },
        Gamescript(ServerGamescript) {
            json: String => STR,
        },
        /// The RCON command has finished.
        RconEnd(ServerRconEnd) {
            command: String => STR,
        },
        Pong(ServerPong) {
            data: u32 => U32,
        },
    }
}
