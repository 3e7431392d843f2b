//! User hooks of the session engine.
//!
//! Implement [`SessionHandler`] and override the hooks you care about; every
//! hook defaults to doing nothing. Hooks run inside the engine's built-in
//! observers, after the session state has been updated for the packet, and
//! receive a [`HookContext`] for reading that state and queueing replies.

use crate::core::packet::{
    AdminPacket, ServerChat, ServerClientError, ServerClientInfo, ServerClientJoin,
    ServerClientQuit, ServerClientUpdate, ServerConsole, ServerError, ServerPacket,
    ServerProtocol, ServerRcon, ServerRconEnd, ServerWelcome,
};
use crate::protocol::session::SessionState;
use chrono::NaiveDate;

/// What a hook can see and do.
///
/// Queued packets are sent in order once the observers for the current packet
/// have finished.
pub struct HookContext<'a> {
    state: &'a SessionState,
    outbox: &'a mut Vec<AdminPacket>,
}

impl<'a> HookContext<'a> {
    pub(crate) fn new(state: &'a SessionState, outbox: &'a mut Vec<AdminPacket>) -> Self {
        Self { state, outbox }
    }

    pub fn state(&self) -> &SessionState {
        self.state
    }

    /// Queue a packet to send after the current dispatch
    pub fn queue(&mut self, packet: impl Into<AdminPacket>) {
        self.outbox.push(packet.into());
    }

    /// Number of packets queued so far
    pub fn queued(&self) -> usize {
        self.outbox.len()
    }
}

/// Overridable session hooks.
#[allow(unused_variables)]
pub trait SessionHandler: Send + 'static {
    /// Every received packet, before any kind-specific hook
    fn on_packet(&mut self, ctx: &mut HookContext<'_>, packet: &ServerPacket) {}

    /// The handshake finished and the initial subscriptions were sent
    fn on_joined(&mut self, ctx: &mut HookContext<'_>) {}

    /// `quit_server` closed the connection
    fn on_quit(&mut self) {}

    fn on_protocol(&mut self, ctx: &mut HookContext<'_>, packet: &ServerProtocol) {}

    fn on_welcome(&mut self, ctx: &mut HookContext<'_>, packet: &ServerWelcome) {}

    /// Every date packet
    fn on_date(&mut self, ctx: &mut HookContext<'_>, date: NaiveDate) {}

    /// The game date moved forward by at least one day
    fn on_new_day(&mut self, ctx: &mut HookContext<'_>, date: NaiveDate) {}

    /// The game date moved into a later month
    fn on_new_month(&mut self, ctx: &mut HookContext<'_>, date: NaiveDate) {}

    /// The game date moved into a later year
    fn on_new_year(&mut self, ctx: &mut HookContext<'_>, date: NaiveDate) {}

    /// One line of RCON output
    fn on_rcon(&mut self, ctx: &mut HookContext<'_>, packet: &ServerRcon) {}

    fn on_rcon_end(&mut self, ctx: &mut HookContext<'_>, packet: &ServerRconEnd) {}

    fn on_console(&mut self, ctx: &mut HookContext<'_>, packet: &ServerConsole) {}

    fn on_chat(&mut self, ctx: &mut HookContext<'_>, packet: &ServerChat) {}

    fn on_new_game(&mut self, ctx: &mut HookContext<'_>) {}

    /// The server is shutting down; the main loop stops after this packet
    fn on_server_shutdown(&mut self, ctx: &mut HookContext<'_>) {}

    fn on_server_error(&mut self, ctx: &mut HookContext<'_>, packet: &ServerError) {}

    fn on_client_join(&mut self, ctx: &mut HookContext<'_>, packet: &ServerClientJoin) {}

    fn on_client_info(&mut self, ctx: &mut HookContext<'_>, packet: &ServerClientInfo) {}

    fn on_client_update(&mut self, ctx: &mut HookContext<'_>, packet: &ServerClientUpdate) {}

    fn on_client_quit(&mut self, ctx: &mut HookContext<'_>, packet: &ServerClientQuit) {}

    fn on_client_error(&mut self, ctx: &mut HookContext<'_>, packet: &ServerClientError) {}
}

/// Handler that ignores every hook
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHandler;

impl SessionHandler for NoopHandler {}
