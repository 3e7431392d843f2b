//! Admin → server packets.

use super::{STR, U16, U32, U8};

define_packets! {
    /// Packets the admin sends to the server.
    pub enum AdminPacket {
        /// Announce and authenticate the admin.
        Join(AdminJoin) {
            password: String => STR,
            name: String => STR,
            version: String => STR,
        },
        /// Tell the server the admin is leaving.
        Quit(AdminQuit) {},
        /// Subscribe to an update type at a frequency.
        UpdateFrequency(AdminUpdateFrequency) {
            update_type: u16 => U16,
            update_frequency: u16 => U16,
        },
        /// Explicitly poll an update type.
        Poll(AdminPoll) {
            update_type: u8 => U8,
            d1: u32 => U32,
        },
        Chat(AdminChat) {
            network_action: u8 => U8,
            destination_type: u8 => U8,
            destination: u32 => U32,
            message: String => STR,
        },
        /// Remote console command.
        Rcon(AdminRcon) {
            command: String => STR,
        },
        Gamescript(AdminGamescript) {
            json: String => STR,
        },
        /// Ping, answered by a pong carrying the same data.
        Ping(AdminPing) {
            data: u32 => U32,
        },
    }
}

impl AdminJoin {
    pub fn new(
        password: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            password: Some(password.into()),
            name: Some(name.into()),
            version: Some(version.into()),
        }
    }
}

impl AdminUpdateFrequency {
    pub fn new(update_type: u16, update_frequency: u16) -> Self {
        Self {
            update_type: Some(update_type),
            update_frequency: Some(update_frequency),
        }
    }
}

impl AdminPoll {
    pub fn new(update_type: u8, d1: u32) -> Self {
        Self {
            update_type: Some(update_type),
            d1: Some(d1),
        }
    }
}

impl AdminChat {
    pub fn new(
        network_action: u8,
        destination_type: u8,
        destination: u32,
        message: impl Into<String>,
    ) -> Self {
        Self {
            network_action: Some(network_action),
            destination_type: Some(destination_type),
            destination: Some(destination),
            message: Some(message.into()),
        }
    }
}

impl AdminRcon {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: Some(command.into()),
        }
    }
}

impl AdminGamescript {
    pub fn new(json: impl Into<String>) -> Self {
        Self {
            json: Some(json.into()),
        }
    }
}

impl AdminPing {
    pub fn new(data: u32) -> Self {
        Self { data: Some(data) }
    }
}
