//! Protocol enumerations shared by packets, the session engine and configuration.
//!
//! Packets carry these as plain integers (see [`crate::core::packet`]); the
//! enums give them names for logging and a typed surface for the session API.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! protocol_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident : $repr:ty {
            $($variant:ident = $code:literal => $label:literal,)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr($repr)]
        $vis enum $name {
            $($variant = $code,)*
        }

        impl $name {
            /// All known values in code order
            pub const ALL: &'static [$name] = &[$($name::$variant,)*];

            /// Wire code of this value
            pub const fn code(self) -> $repr {
                self as $repr
            }

            /// Look up a value by wire code
            pub fn from_code(code: $repr) -> Option<Self> {
                match code {
                    $($code => Some($name::$variant),)*
                    _ => None,
                }
            }

            /// Protocol name, as used in log lines
            pub const fn name(self) -> &'static str {
                match self {
                    $($name::$variant => $label,)*
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }
    };
}

protocol_enum! {
    /// Categories of information an admin can subscribe to or poll.
    #[derive(Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum UpdateType: u16 {
        Date = 0 => "ADMIN_UPDATE_DATE",
        ClientInfo = 1 => "ADMIN_UPDATE_CLIENT_INFO",
        CompanyInfo = 2 => "ADMIN_UPDATE_COMPANY_INFO",
        CompanyEconomy = 3 => "ADMIN_UPDATE_COMPANY_ECONOMY",
        CompanyStats = 4 => "ADMIN_UPDATE_COMPANY_STATS",
        Chat = 5 => "ADMIN_UPDATE_CHAT",
        Console = 6 => "ADMIN_UPDATE_CONSOLE",
        CmdNames = 7 => "ADMIN_UPDATE_CMD_NAMES",
        CmdLogging = 8 => "ADMIN_UPDATE_CMD_LOGGING",
        GameScript = 9 => "ADMIN_UPDATE_GAMESCRIPT",
    }
}

protocol_enum! {
    /// How often the server pushes an update type.
    ///
    /// The server advertises the supported frequencies per type as a bitmask of
    /// these values.
    #[derive(Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum UpdateFrequency: u16 {
        Poll = 0x01 => "ADMIN_FREQUENCY_POLL",
        Daily = 0x02 => "ADMIN_FREQUENCY_DAILY",
        Weekly = 0x04 => "ADMIN_FREQUENCY_WEEKLY",
        Monthly = 0x08 => "ADMIN_FREQUENCY_MONTHLY",
        Quarterly = 0x10 => "ADMIN_FREQUENCY_QUARTERLY",
        Annually = 0x20 => "ADMIN_FREQUENCY_ANUALLY",
        Automatic = 0x40 => "ADMIN_FREQUENCY_AUTOMATIC",
    }
}

impl UpdateFrequency {
    /// Bit of this frequency in a support mask
    pub const fn bits(self) -> u16 {
        self.code()
    }

    /// Whether `mask` (as advertised in the protocol packet) allows this frequency
    pub const fn is_supported_by(self, mask: u16) -> bool {
        mask & self.bits() != 0
    }
}

protocol_enum! {
    /// Chat and notification actions.
    pub enum NetworkAction: u8 {
        Join = 0 => "NETWORK_ACTION_JOIN",
        Leave = 1 => "NETWORK_ACTION_LEAVE",
        ServerMessage = 2 => "NETWORK_ACTION_SERVER_MESSAGE",
        Chat = 3 => "NETWORK_ACTION_CHAT",
        ChatCompany = 4 => "NETWORK_ACTION_CHAT_COMPANY",
        ChatClient = 5 => "NETWORK_ACTION_CHAT_CLIENT",
        GiveMoney = 6 => "NETWORK_ACTION_GIVE_MONEY",
        NameChange = 7 => "NETWORK_ACTION_NAME_CHANGE",
        CompanySpectator = 8 => "NETWORK_ACTION_COMPANY_SPECTATOR",
        CompanyJoin = 9 => "NETWORK_ACTION_COMPANY_JOIN",
        CompanyNew = 10 => "NETWORK_ACTION_COMPANY_NEW",
    }
}

protocol_enum! {
    /// Addressing of chat messages.
    pub enum DestType: u8 {
        Broadcast = 0 => "DESTTYPE_BROADCAST",
        Team = 1 => "DESTTYPE_TEAM",
        Client = 2 => "DESTTYPE_CLIENT",
    }
}

protocol_enum! {
    /// Error codes carried by server and client error packets.
    pub enum NetworkErrorCode: u8 {
        General = 0 => "NETWORK_ERROR_GENERAL",
        Desync = 1 => "NETWORK_ERROR_DESYNC",
        SavegameFailed = 2 => "NETWORK_ERROR_SAVEGAME_FAILED",
        ConnectionLost = 3 => "NETWORK_ERROR_CONNECTION_LOST",
        IllegalPacket = 4 => "NETWORK_ERROR_ILLEGAL_PACKET",
        NewgrfMismatch = 5 => "NETWORK_ERROR_NEWGRF_MISMATCH",
        NotAuthorized = 6 => "NETWORK_ERROR_NOT_AUTHORIZED",
        NotExpected = 7 => "NETWORK_ERROR_NOT_EXPECTED",
        WrongRevision = 8 => "NETWORK_ERROR_WRONG_REVISION",
        NameInUse = 9 => "NETWORK_ERROR_NAME_IN_USE",
        WrongPassword = 10 => "NETWORK_ERROR_WRONG_PASSWORD",
        CompanyMismatch = 11 => "NETWORK_ERROR_COMPANY_MISMATCH",
        Kicked = 12 => "NETWORK_ERROR_KICKED",
        Cheater = 13 => "NETWORK_ERROR_CHEATER",
        Full = 14 => "NETWORK_ERROR_FULL",
        TooManyCommands = 15 => "NETWORK_ERROR_TOO_MANY_COMMANDS",
        TimeoutPassword = 16 => "NETWORK_ERROR_TIMEOUT_PASSWORD",
        TimeoutComputer = 17 => "NETWORK_ERROR_TIMEOUT_COMPUTER",
        TimeoutMap = 18 => "NETWORK_ERROR_TIMEOUT_MAP",
        TimeoutJoin = 19 => "NETWORK_ERROR_TIMEOUT_JOIN",
        End = 20 => "NETWORK_ERROR_END",
    }
}

protocol_enum! {
    /// Why a company was removed.
    pub enum CompanyRemoveReason: u8 {
        Manual = 0 => "ADMIN_CRR_MANUAL",
        Autoclean = 1 => "ADMIN_CRR_AUTOCLEAN",
        Bankrupt = 2 => "ADMIN_CRR_BANKRUPT",
    }
}

/// Name of an error code for logging, falling back to the raw number
pub fn error_code_name(code: u8) -> String {
    NetworkErrorCode::from_code(code)
        .map(|c| c.name().to_owned())
        .unwrap_or_else(|| format!("unknown error code {code}"))
}
