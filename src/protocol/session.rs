//! # Session Engine
//!
//! Drives one admin session: join handshake, update subscriptions, RCON
//! request/response correlation, game date tracking and the connected clients
//! map.
//!
//! ## Lifecycle
//! `Disconnected → Connecting → AwaitingHandshake → Joined → Disconnected`
//!
//! The engine is sequential. Every operation awaits its I/O before returning,
//! and all observers for one packet finish before the next frame is read.
//! Nothing is spawned; the only way to stop a running [`Session::main_loop`]
//! from elsewhere is the [`StopHandle`].
//!
//! ## Example
//! ```no_run
//! use openttd_admin::config::AdminConfig;
//! use openttd_admin::protocol::handler::{HookContext, SessionHandler};
//! use openttd_admin::protocol::session::Session;
//! use chrono::NaiveDate;
//!
//! struct Yearly;
//!
//! impl SessionHandler for Yearly {
//!     fn on_new_year(&mut self, _ctx: &mut HookContext<'_>, date: NaiveDate) {
//!         println!("happy new year {date}");
//!     }
//! }
//!
//! # async fn run() -> openttd_admin::error::Result<()> {
//! let config = AdminConfig::default_with_overrides(|c| c.session.password = "secret".into());
//! let mut session = Session::new(&config, Yearly);
//! session.join_server().await?;
//! let lines = session.send_rcon("companies", None).await?;
//! session.main_loop().await?;
//! session.quit_server().await;
//! # Ok(())
//! # }
//! ```

use crate::config::{AdminConfig, ClientConfig, CodecConfig, SessionConfig};
use crate::core::packet::{
    AdminChat, AdminGamescript, AdminJoin, AdminPacket, AdminPing, AdminPoll, AdminQuit,
    AdminRcon, AdminUpdateFrequency, PacketType, ServerClientInfo, ServerPacket, ServerWelcome,
};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::client::AdminClient;
use crate::protocol::dispatcher::{Callback, CallbackKey, DispatchOutcome, Position};
use crate::protocol::handler::{HookContext, NoopHandler, SessionHandler};
use crate::protocol::types::{error_code_name, DestType, NetworkAction, UpdateFrequency, UpdateType};
use crate::utils::metrics::{Metrics, Timer};
use chrono::{Datelike, NaiveDate};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Banner framing the welcome message sent to joining clients
const WELCOME_BANNER: &str = "--------------------";

/// Where the session is in its lifecycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionPhase {
    #[default]
    Disconnected,
    Connecting,
    AwaitingHandshake,
    Joined,
}

/// Cooperative stop flag for [`Session::main_loop`].
///
/// Clones share the flag, so a handle can be moved to another task and raised
/// there; the loop notices at its next check.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Last known details of a connected game client.
///
/// A client seen only through a join packet has every detail unset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    pub client_id: u32,
    pub address: Option<String>,
    pub name: Option<String>,
    pub language: Option<u8>,
    pub join_date: Option<NaiveDate>,
    pub play_as: Option<u8>,
}

impl ClientInfo {
    pub fn placeholder(client_id: u32) -> Self {
        Self {
            client_id,
            ..Self::default()
        }
    }

    fn from_packet(client_id: u32, packet: &ServerClientInfo) -> Self {
        Self {
            client_id,
            address: packet.address.clone(),
            name: packet.name.clone(),
            language: packet.language,
            join_date: packet.join_date,
            play_as: packet.play_as,
        }
    }
}

/// The single outstanding RCON command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RconRequest {
    pub command: String,
    pub lines: Vec<String>,
    finished: bool,
    deadline: Instant,
}

impl RconRequest {
    fn new(command: String, deadline: Instant) -> Self {
        Self {
            command,
            lines: Vec::new(),
            finished: false,
            deadline,
        }
    }

    /// True once the end packet arrived
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

/// Which date hooks a new date packet triggers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateChange {
    pub new_year: bool,
    pub new_month: bool,
    pub new_day: bool,
}

impl DateChange {
    /// Compare against the previous date.
    ///
    /// Nothing changes on the first date, on the same date or when the date
    /// moves backwards. A coarser boundary implies the finer ones.
    pub fn between(previous: Option<NaiveDate>, current: NaiveDate) -> Self {
        match previous {
            Some(previous) if current > previous => {
                let new_year = current.year() != previous.year();
                let new_month = new_year || current.month() != previous.month();
                Self {
                    new_year,
                    new_month,
                    new_day: true,
                }
            }
            _ => Self::default(),
        }
    }
}

/// Everything the engine has learned from the server.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub phase: SessionPhase,
    pub welcome: Option<ServerWelcome>,
    pub protocol_version: Option<u8>,
    /// Update type code to supported frequency bitmask, once the protocol packet arrived
    pub supported_frequencies: Option<BTreeMap<u16, u16>>,
    pub current_date: Option<NaiveDate>,
    pub clients: HashMap<u32, ClientInfo>,
    pub rcon: Option<RconRequest>,
    /// Timed-out commands whose end packet has not arrived yet, oldest first
    pub abandoned_rcon: VecDeque<String>,
    /// Set when the server refused the join
    pub rejection: Option<&'static str>,
    protocol_received: bool,
    welcome_received: bool,
}

impl SessionState {
    pub fn server_name(&self) -> Option<&str> {
        self.welcome.as_ref()?.server_name.as_deref()
    }

    pub fn protocol_received(&self) -> bool {
        self.protocol_received
    }

    pub fn welcome_received(&self) -> bool {
        self.welcome_received
    }

    pub fn is_joined(&self) -> bool {
        self.phase == SessionPhase::Joined
    }
}

/// Chat text split into lines, one chat packet per line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatLines(Vec<String>);

impl ChatLines {
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for ChatLines {
    fn from(line: &str) -> Self {
        Self(vec![line.to_owned()])
    }
}

impl From<String> for ChatLines {
    fn from(line: String) -> Self {
        Self(vec![line])
    }
}

impl From<Vec<String>> for ChatLines {
    fn from(lines: Vec<String>) -> Self {
        Self(lines)
    }
}

impl From<Vec<&str>> for ChatLines {
    fn from(lines: Vec<&str>) -> Self {
        Self(lines.into_iter().map(str::to_owned).collect())
    }
}

impl From<&[String]> for ChatLines {
    fn from(lines: &[String]) -> Self {
        Self(lines.to_vec())
    }
}

impl<const N: usize> From<[&str; N]> for ChatLines {
    fn from(lines: [&str; N]) -> Self {
        Self(lines.iter().map(|line| (*line).to_owned()).collect())
    }
}

impl IntoIterator for ChatLines {
    type Item = String;
    type IntoIter = std::vec::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// One chat packet per line, all with the same addressing.
pub fn chat_packets(
    action: NetworkAction,
    dest_type: DestType,
    destination: u32,
    lines: impl Into<ChatLines>,
) -> Vec<AdminChat> {
    lines
        .into()
        .into_iter()
        .map(|line| AdminChat::new(action.code(), dest_type.code(), destination, line))
        .collect()
}

/// State handed to every observer of a session.
///
/// Observers registered through [`Session::register_callback`] receive this,
/// so they can read the state, reach the handler and queue replies.
pub struct SessionCore<H> {
    handler: H,
    state: SessionState,
    outbox: Vec<AdminPacket>,
    welcome_message: Option<Vec<String>>,
    stop: StopHandle,
}

impl<H: SessionHandler> SessionCore<H> {
    fn new(handler: H, welcome_message: Option<Vec<String>>) -> Self {
        Self {
            handler,
            state: SessionState::default(),
            outbox: Vec::new(),
            welcome_message,
            stop: StopHandle::default(),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Queue a packet to send once the current dispatch has finished
    pub fn queue(&mut self, packet: impl Into<AdminPacket>) {
        self.outbox.push(packet.into());
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    fn hook(&mut self, call: impl FnOnce(&mut H, &mut HookContext<'_>)) {
        let mut ctx = HookContext::new(&self.state, &mut self.outbox);
        call(&mut self.handler, &mut ctx);
    }
}

fn builtin<H, F>(key: impl Into<CallbackKey>, name: &'static str, func: F) -> (CallbackKey, Callback<SessionCore<H>>)
where
    F: FnMut(&mut SessionCore<H>, &ServerPacket) -> Result<()> + Send + 'static,
{
    (key.into(), Callback::new(name, func))
}

fn builtin_observers<H: SessionHandler>() -> Vec<(CallbackKey, Callback<SessionCore<H>>)> {
    vec![
        builtin(CallbackKey::Any, "session::packet", observe_any::<H>),
        builtin(PacketType::ServerFull, "session::full", observe_rejection::<H>),
        builtin(PacketType::ServerBanned, "session::banned", observe_rejection::<H>),
        builtin(PacketType::ServerError, "session::error", observe_error::<H>),
        builtin(PacketType::ServerProtocol, "session::protocol", observe_protocol::<H>),
        builtin(PacketType::ServerWelcome, "session::welcome", observe_welcome::<H>),
        builtin(PacketType::ServerNewGame, "session::new_game", observe_new_game::<H>),
        builtin(PacketType::ServerShutdown, "session::shutdown", observe_shutdown::<H>),
        builtin(PacketType::ServerDate, "session::date", observe_date::<H>),
        builtin(PacketType::ServerClientJoin, "session::client_join", observe_client_join::<H>),
        builtin(PacketType::ServerClientInfo, "session::client_info", observe_client_info::<H>),
        builtin(PacketType::ServerClientUpdate, "session::client_update", observe_client_update::<H>),
        builtin(PacketType::ServerClientQuit, "session::client_quit", observe_client_quit::<H>),
        builtin(PacketType::ServerClientError, "session::client_error", observe_client_error::<H>),
        builtin(PacketType::ServerChat, "session::chat", observe_chat::<H>),
        builtin(PacketType::ServerRcon, "session::rcon", observe_rcon::<H>),
        builtin(PacketType::ServerRconEnd, "session::rcon_end", observe_rcon_end::<H>),
        builtin(PacketType::ServerConsole, "session::console", observe_console::<H>),
    ]
}

fn observe_any<H: SessionHandler>(core: &mut SessionCore<H>, packet: &ServerPacket) -> Result<()> {
    core.hook(|handler, ctx| handler.on_packet(ctx, packet));
    Ok(())
}

fn observe_rejection<H: SessionHandler>(
    core: &mut SessionCore<H>,
    packet: &ServerPacket,
) -> Result<()> {
    let reason = match packet {
        ServerPacket::Full(_) => "server is full",
        ServerPacket::Banned(_) => "admin is banned",
        _ => return Ok(()),
    };
    error!(reason, "Server refused the admin connection");
    core.state.rejection = Some(reason);
    Ok(())
}

fn observe_error<H: SessionHandler>(core: &mut SessionCore<H>, packet: &ServerPacket) -> Result<()> {
    if let ServerPacket::Error(p) = packet {
        let code = p.error_code.unwrap_or_default();
        error!(code, name = %error_code_name(code), "Server reported an error");
        core.hook(|handler, ctx| handler.on_server_error(ctx, p));
    }
    Ok(())
}

fn observe_protocol<H: SessionHandler>(
    core: &mut SessionCore<H>,
    packet: &ServerPacket,
) -> Result<()> {
    if let ServerPacket::Protocol(p) = packet {
        core.state.protocol_version = p.version;
        core.state.supported_frequencies = p.supported_frequencies.clone();
        core.state.protocol_received = true;
        debug!(
            version = ?p.version,
            frequencies = ?p.supported_frequencies,
            "Received protocol"
        );
        core.hook(|handler, ctx| handler.on_protocol(ctx, p));
    }
    Ok(())
}

fn observe_welcome<H: SessionHandler>(
    core: &mut SessionCore<H>,
    packet: &ServerPacket,
) -> Result<()> {
    if let ServerPacket::Welcome(p) = packet {
        core.state.welcome = Some(p.clone());
        core.state.welcome_received = true;
        info!(
            server = ?p.server_name,
            revision = ?p.revision,
            map = ?p.map_name,
            "Received welcome"
        );
        core.hook(|handler, ctx| handler.on_welcome(ctx, p));
    }
    Ok(())
}

fn observe_new_game<H: SessionHandler>(core: &mut SessionCore<H>, _: &ServerPacket) -> Result<()> {
    info!("New game started");
    core.hook(|handler, ctx| handler.on_new_game(ctx));
    Ok(())
}

fn observe_shutdown<H: SessionHandler>(core: &mut SessionCore<H>, _: &ServerPacket) -> Result<()> {
    info!("Server is shutting down");
    core.stop.stop();
    core.hook(|handler, ctx| handler.on_server_shutdown(ctx));
    Ok(())
}

fn observe_date<H: SessionHandler>(core: &mut SessionCore<H>, packet: &ServerPacket) -> Result<()> {
    let ServerPacket::Date(p) = packet else {
        return Ok(());
    };
    let Some(date) = p.date else {
        warn!("Date packet without a date");
        return Ok(());
    };

    let change = DateChange::between(core.state.current_date, date);
    core.state.current_date = Some(date);
    debug!(%date, "Game date");

    core.hook(|handler, ctx| handler.on_date(ctx, date));
    if change.new_year {
        core.hook(|handler, ctx| handler.on_new_year(ctx, date));
    }
    if change.new_month {
        core.hook(|handler, ctx| handler.on_new_month(ctx, date));
    }
    if change.new_day {
        core.hook(|handler, ctx| handler.on_new_day(ctx, date));
    }
    Ok(())
}

fn observe_client_join<H: SessionHandler>(
    core: &mut SessionCore<H>,
    packet: &ServerPacket,
) -> Result<()> {
    let ServerPacket::ClientJoin(p) = packet else {
        return Ok(());
    };
    if let Some(client_id) = p.client_id {
        core.state
            .clients
            .entry(client_id)
            .or_insert_with(|| ClientInfo::placeholder(client_id));
        info!(client_id, "Client joined");

        if let Some(message) = &core.welcome_message {
            let lines = welcome_lines(message);
            let packets = chat_packets(NetworkAction::ChatClient, DestType::Client, client_id, lines);
            core.outbox.extend(packets.into_iter().map(AdminPacket::from));
        }
    }
    core.hook(|handler, ctx| handler.on_client_join(ctx, p));
    Ok(())
}

fn observe_client_info<H: SessionHandler>(
    core: &mut SessionCore<H>,
    packet: &ServerPacket,
) -> Result<()> {
    let ServerPacket::ClientInfo(p) = packet else {
        return Ok(());
    };
    if let Some(client_id) = p.client_id {
        core.state
            .clients
            .insert(client_id, ClientInfo::from_packet(client_id, p));
    }
    core.hook(|handler, ctx| handler.on_client_info(ctx, p));
    Ok(())
}

fn observe_client_update<H: SessionHandler>(
    core: &mut SessionCore<H>,
    packet: &ServerPacket,
) -> Result<()> {
    let ServerPacket::ClientUpdate(p) = packet else {
        return Ok(());
    };
    if let Some(client_id) = p.client_id {
        let client = core
            .state
            .clients
            .entry(client_id)
            .or_insert_with(|| ClientInfo::placeholder(client_id));
        if p.name.is_some() {
            client.name = p.name.clone();
        }
        if p.play_as.is_some() {
            client.play_as = p.play_as;
        }
    }
    core.hook(|handler, ctx| handler.on_client_update(ctx, p));
    Ok(())
}

fn observe_client_quit<H: SessionHandler>(
    core: &mut SessionCore<H>,
    packet: &ServerPacket,
) -> Result<()> {
    let ServerPacket::ClientQuit(p) = packet else {
        return Ok(());
    };
    if let Some(client_id) = p.client_id {
        if core.state.clients.remove(&client_id).is_some() {
            info!(client_id, "Client quit");
        } else {
            warn!(client_id, "Quit for a client that was never seen");
        }
    }
    core.hook(|handler, ctx| handler.on_client_quit(ctx, p));
    Ok(())
}

fn observe_client_error<H: SessionHandler>(
    core: &mut SessionCore<H>,
    packet: &ServerPacket,
) -> Result<()> {
    if let ServerPacket::ClientError(p) = packet {
        let code = p.error_code.unwrap_or_default();
        warn!(client_id = ?p.client_id, code, name = %error_code_name(code), "Client error");
        core.hook(|handler, ctx| handler.on_client_error(ctx, p));
    }
    Ok(())
}

fn observe_chat<H: SessionHandler>(core: &mut SessionCore<H>, packet: &ServerPacket) -> Result<()> {
    if let ServerPacket::Chat(p) = packet {
        debug!(client_id = ?p.client_id, message = ?p.message, "Chat");
        core.hook(|handler, ctx| handler.on_chat(ctx, p));
    }
    Ok(())
}

fn observe_rcon<H: SessionHandler>(core: &mut SessionCore<H>, packet: &ServerPacket) -> Result<()> {
    let ServerPacket::Rcon(p) = packet else {
        return Ok(());
    };
    let line = p.result.clone().unwrap_or_default();
    // output of an abandoned command is collected too and dropped at its end
    match core.state.rcon.as_mut() {
        Some(request) => {
            debug!(command = %request.command, line = %line, "RCON output");
            request.lines.push(line);
        }
        None if !core.state.abandoned_rcon.is_empty() => {
            debug!(line = %line, "Output of an abandoned RCON command");
        }
        None => warn!(line = %line, "{}", constants::ERR_UNEXPECTED_RCON),
    }
    core.hook(|handler, ctx| handler.on_rcon(ctx, p));
    Ok(())
}

fn observe_rcon_end<H: SessionHandler>(
    core: &mut SessionCore<H>,
    packet: &ServerPacket,
) -> Result<()> {
    let ServerPacket::RconEnd(p) = packet else {
        return Ok(());
    };
    let state = &mut core.state;
    let ends_abandoned = state.abandoned_rcon.front().is_some_and(|oldest| {
        state.rcon.is_none() || p.command.as_deref() == Some(oldest.as_str())
    });
    if ends_abandoned {
        // the server answers in order: everything collected so far was its output
        let oldest = state.abandoned_rcon.pop_front();
        debug!(command = ?oldest, "Late end of an abandoned RCON command");
        if let Some(request) = state.rcon.as_mut() {
            request.lines.clear();
        }
    } else {
        if !state.abandoned_rcon.is_empty() {
            warn!(
                lost = ?state.abandoned_rcon,
                "End of abandoned RCON commands never arrived"
            );
            state.abandoned_rcon.clear();
        }
        match state.rcon.as_mut() {
            Some(request) => request.finished = true,
            None => warn!(command = ?p.command, "{}", constants::ERR_UNEXPECTED_RCON),
        }
    }
    core.hook(|handler, ctx| handler.on_rcon_end(ctx, p));
    Ok(())
}

fn observe_console<H: SessionHandler>(
    core: &mut SessionCore<H>,
    packet: &ServerPacket,
) -> Result<()> {
    if let ServerPacket::Console(p) = packet {
        debug!(origin = ?p.origin, message = ?p.message, "Console");
        core.hook(|handler, ctx| handler.on_console(ctx, p));
    }
    Ok(())
}

fn welcome_lines(message: &[String]) -> Vec<String> {
    let mut lines = Vec::with_capacity(message.len() + 2);
    lines.push(WELCOME_BANNER.to_owned());
    lines.extend(message.iter().cloned());
    lines.push(WELCOME_BANNER.to_owned());
    lines
}

// Errors that concern one frame only; the stream stays usable.
fn is_frame_error(error: &ProtocolError) -> bool {
    matches!(error, ProtocolError::PacketDecode { .. })
}

/// One admin session over one connection.
pub struct Session<H: SessionHandler = NoopHandler> {
    client: AdminClient<SessionCore<H>>,
    core: SessionCore<H>,
    config: SessionConfig,
}

impl Session<NoopHandler> {
    /// Session without hooks
    pub fn without_handler(config: &AdminConfig) -> Self {
        Self::new(config, NoopHandler)
    }
}

impl<H: SessionHandler> Session<H> {
    pub fn new(config: &AdminConfig, handler: H) -> Self {
        Self::from_parts(&config.client, config.session.clone(), config.codec, handler)
    }

    /// Build a session and register the built-in observers.
    pub fn from_parts(
        client: &ClientConfig,
        session: SessionConfig,
        codec: CodecConfig,
        handler: H,
    ) -> Self {
        let mut client = AdminClient::new(client, codec);
        for (key, callback) in builtin_observers::<H>() {
            client.register_callback(key, callback, Position::Prepend);
        }

        let core = SessionCore::new(handler, session.welcome_message.clone());
        Self {
            client,
            core,
            config: session,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.core.state
    }

    pub fn handler(&self) -> &H {
        &self.core.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.core.handler
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn client(&self) -> &AdminClient<SessionCore<H>> {
        &self.client
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.client.metrics()
    }

    /// Handle that ends the main loop from another task
    pub fn stop_handle(&self) -> StopHandle {
        self.core.stop_handle()
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    pub fn server_name(&self) -> Option<&str> {
        self.core.state.server_name()
    }

    pub fn protocol_version(&self) -> Option<u8> {
        self.core.state.protocol_version
    }

    pub fn current_date(&self) -> Option<NaiveDate> {
        self.core.state.current_date
    }

    /// Connected game clients by id
    pub fn clients(&self) -> &HashMap<u32, ClientInfo> {
        &self.core.state.clients
    }

    /// Packets queued by observers and not sent yet
    pub fn queued_packets(&self) -> &[AdminPacket] {
        &self.core.outbox
    }

    pub fn take_queued_packets(&mut self) -> Vec<AdminPacket> {
        std::mem::take(&mut self.core.outbox)
    }

    /// Register an observer next to the built-in ones.
    pub fn register_callback(
        &mut self,
        key: impl Into<CallbackKey>,
        callback: Callback<SessionCore<H>>,
        position: Position,
    ) {
        self.client.register_callback(key, callback, position);
    }

    pub fn register_callbacks(
        &mut self,
        key: impl Into<CallbackKey>,
        callbacks: Vec<Callback<SessionCore<H>>>,
        position: Position,
    ) {
        self.client.register_callbacks(key, callbacks, position);
    }

    /// Run the observers for a packet without touching the network.
    ///
    /// Replies queued by observers stay queued.
    pub fn process_packet(&mut self, packet: &ServerPacket) -> DispatchOutcome {
        self.client.dispatch(&mut self.core, packet)
    }

    /// Connect, authenticate and subscribe.
    ///
    /// Waits until both the protocol and the welcome packet arrived, in any
    /// order. Subscriptions the server does not support are skipped while the
    /// rest are still sent; the first of them is returned as the error once
    /// the session is joined.
    #[instrument(skip(self), fields(host = %self.client.host(), port = self.client.port()))]
    pub async fn join_server(&mut self) -> Result<()> {
        if self.client.is_connected() {
            error!("{}", constants::ERR_ALREADY_CONNECTED);
            return Err(ProtocolError::AlreadyConnected);
        }

        self.core.state = SessionState {
            phase: SessionPhase::Connecting,
            ..SessionState::default()
        };
        if let Err(e) = self.client.connect().await {
            self.core.state.phase = SessionPhase::Disconnected;
            return Err(e);
        }

        let join = AdminJoin::new(
            self.config.password.clone(),
            self.config.name.clone(),
            self.config.version.clone(),
        );
        if let Err(e) = self.send_packet(join).await {
            self.abort_join().await;
            return Err(e);
        }
        self.core.state.phase = SessionPhase::AwaitingHandshake;

        let deadline = Instant::now() + self.config.join_timeout;
        loop {
            if let Some(reason) = self.core.state.rejection {
                self.abort_join().await;
                return Err(ProtocolError::JoinRejected(reason));
            }
            let state = &self.core.state;
            if state.protocol_received && state.welcome_received {
                break;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                let err = ProtocolError::JoinTimeout {
                    protocol: state.protocol_received,
                    welcome: state.welcome_received,
                };
                error!(error = %err, "Handshake did not complete");
                self.abort_join().await;
                return Err(err);
            }

            match self.try_receive_packet(remaining).await {
                Ok(_) => {}
                Err(e) if is_frame_error(&e) => {}
                Err(e) => {
                    self.abort_join().await;
                    return Err(e);
                }
            }
        }

        self.core.state.phase = SessionPhase::Joined;
        info!(
            server = ?self.core.state.server_name(),
            protocol = ?self.core.state.protocol_version,
            "Joined server"
        );

        let mut unsupported = None;
        let subscriptions = self.config.update_frequencies.clone();
        for (update_type, frequency) in subscriptions {
            match self.set_update_frequency(update_type, frequency).await {
                Ok(()) => {}
                Err(
                    e @ (ProtocolError::UnsupportedUpdateType(_)
                    | ProtocolError::UnsupportedFrequency { .. }),
                ) => {
                    warn!(error = %e, "Skipping subscription");
                    unsupported.get_or_insert(e);
                }
                Err(e) => return Err(e),
            }
        }

        self.core.hook(|handler, ctx| handler.on_joined(ctx));
        self.flush_outbox().await?;
        unsupported.map_or(Ok(()), Err)
    }

    async fn abort_join(&mut self) {
        self.client.disconnect().await;
        self.core.state.phase = SessionPhase::Disconnected;
    }

    /// Subscribe to one update type.
    ///
    /// The pair is checked against the table from the protocol packet and
    /// nothing is sent when the server does not support it. Without a table
    /// the request is skipped with a warning.
    #[instrument(skip(self))]
    pub async fn set_update_frequency(
        &mut self,
        update_type: UpdateType,
        frequency: UpdateFrequency,
    ) -> Result<()> {
        let Some(table) = &self.core.state.supported_frequencies else {
            warn!("{}", constants::ERR_FREQUENCIES_UNKNOWN);
            return Ok(());
        };
        let mask = table
            .get(&update_type.code())
            .copied()
            .ok_or(ProtocolError::UnsupportedUpdateType(update_type))?;
        if !frequency.is_supported_by(mask) {
            return Err(ProtocolError::UnsupportedFrequency {
                update_type,
                frequency,
            });
        }

        self.send_packet(AdminUpdateFrequency::new(update_type.code(), frequency.bits()))
            .await?;
        debug!(mask, "Subscribed");
        Ok(())
    }

    /// Ask the server for one update right now.
    pub async fn poll(&mut self, update_type: UpdateType, d1: u32) -> Result<()> {
        let code = u8::try_from(update_type.code())
            .map_err(|_| ProtocolError::UnsupportedUpdateType(update_type))?;
        self.send_packet(AdminPoll::new(code, d1)).await
    }

    /// Send a ping; the server answers with a pong carrying `data`.
    pub async fn ping(&mut self, data: u32) -> Result<()> {
        self.send_packet(AdminPing::new(data)).await
    }

    pub async fn send_gamescript(&mut self, json: impl Into<String>) -> Result<()> {
        self.send_packet(AdminGamescript::new(json)).await
    }

    /// Run a console command on the server and collect its output.
    ///
    /// Only one command can be outstanding. A call that was cancelled while
    /// waiting leaves its request pending until its deadline, and new calls
    /// fail with [`ProtocolError::RequestInProgress`] until then. A command
    /// that timed out no longer blocks new ones; its late output and end
    /// packet are dropped.
    #[instrument(skip(self))]
    pub async fn send_rcon(
        &mut self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<Vec<String>> {
        // left behind by a call that was cancelled while waiting
        if let Some(pending) = &self.core.state.rcon {
            if pending.finished {
                self.core.state.rcon = None;
            } else if Instant::now() < pending.deadline {
                error!(pending = %pending.command, "{}", constants::ERR_RCON_IN_PROGRESS);
                return Err(ProtocolError::RequestInProgress(pending.command.clone()));
            } else {
                self.abandon_rcon();
            }
        }

        let _timer = Timer::start("rcon");
        let deadline = Instant::now() + timeout.unwrap_or(self.config.rcon_timeout);
        self.send_packet(AdminRcon::new(command)).await?;
        self.core.state.rcon = Some(RconRequest::new(command.to_owned(), deadline));

        loop {
            if self.core.state.rcon.as_ref().is_some_and(RconRequest::is_finished) {
                let lines = self.core.state.rcon.take().map(|request| request.lines);
                return Ok(lines.unwrap_or_default());
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.abandon_rcon();
                error!("RCON command timed out");
                return Err(ProtocolError::RconTimeout(command.to_owned()));
            }

            match self.try_receive_packet(remaining).await {
                Ok(_) => {}
                Err(e) if is_frame_error(&e) => {}
                Err(e) => {
                    self.abandon_rcon();
                    return Err(e);
                }
            }
        }
    }

    fn abandon_rcon(&mut self) {
        if let Some(request) = self.core.state.rcon.take() {
            self.core.state.abandoned_rcon.push_back(request.command);
        }
    }

    /// Broadcast chat to everyone
    pub async fn send_public_chat(&mut self, lines: impl Into<ChatLines>) -> Result<()> {
        self.send_chat(DestType::Broadcast, 0, lines).await
    }

    /// Chat to all clients playing as `company_id`
    pub async fn send_company_chat(
        &mut self,
        lines: impl Into<ChatLines>,
        company_id: u32,
    ) -> Result<()> {
        self.send_chat(DestType::Team, company_id, lines).await
    }

    /// Private chat to one client
    pub async fn send_client_chat(
        &mut self,
        lines: impl Into<ChatLines>,
        client_id: u32,
    ) -> Result<()> {
        self.send_chat(DestType::Client, client_id, lines).await
    }

    async fn send_chat(
        &mut self,
        dest_type: DestType,
        destination: u32,
        lines: impl Into<ChatLines>,
    ) -> Result<()> {
        for packet in chat_packets(NetworkAction::Chat, dest_type, destination, lines) {
            self.send_packet(packet).await?;
        }
        Ok(())
    }

    pub async fn send_packet(&mut self, packet: impl Into<AdminPacket>) -> Result<()> {
        let result = self.client.send_packet(packet).await;
        self.sync_connection();
        result
    }

    /// Block for the next packet, up to the socket timeout.
    pub async fn receive_packet(&mut self) -> Result<ServerPacket> {
        let wait = self.client.socket_timeout();
        self.try_receive_packet(wait)
            .await?
            .ok_or(ProtocolError::Timeout)
    }

    /// Wait up to `wait` for the next packet, dispatch it and send whatever the
    /// observers queued.
    pub async fn try_receive_packet(&mut self, wait: Duration) -> Result<Option<ServerPacket>> {
        let received = self.client.try_receive_packet(&mut self.core, wait).await;
        self.sync_connection();
        let packet = received?;
        if packet.is_some() {
            self.flush_outbox().await?;
        }
        Ok(packet)
    }

    /// Receive until nothing arrives within `wait`.
    ///
    /// With `count`, stop after that many packets and fail with
    /// [`ProtocolError::NotAllPacketsReceived`] if fewer arrived. Frames that
    /// fail to decode are logged and counted. The stop flag ends the drain
    /// early.
    pub async fn receive_packets(&mut self, count: Option<usize>, wait: Duration) -> Result<usize> {
        let mut received = 0;
        while count.map_or(true, |expected| received < expected) && !self.core.stop.is_stopped() {
            match self.try_receive_packet(wait).await {
                Ok(Some(_)) => received += 1,
                Ok(None) => break,
                Err(e) if is_frame_error(&e) => {
                    warn!(error = %e, "Skipping undecodable packet");
                    received += 1;
                }
                Err(e) => return Err(e),
            }
        }

        match count {
            Some(expected) if received < expected => Err(ProtocolError::NotAllPacketsReceived {
                expected,
                received,
            }),
            _ => Ok(received),
        }
    }

    /// Receive until a packet of `kind` arrives. Other packets are dispatched
    /// as usual.
    pub async fn wait_for_packet(&mut self, kind: PacketType, timeout: Duration) -> Result<ServerPacket> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ProtocolError::Timeout);
            }
            match self.try_receive_packet(remaining).await {
                Ok(Some(packet)) if packet.packet_type() == kind => return Ok(packet),
                Ok(_) => {}
                Err(e) if is_frame_error(&e) => {}
                Err(e) => return Err(e),
            }
        }
    }

    /// Process packets until the stop flag is raised.
    ///
    /// The flag is checked at least once per poll interval. A closed
    /// connection ends the loop with [`ProtocolError::ConnectionClosed`].
    #[instrument(skip(self), fields(host = %self.client.host(), port = self.client.port()))]
    pub async fn main_loop(&mut self) -> Result<()> {
        if !self.client.is_connected() {
            warn!("{}", constants::ERR_NOT_CONNECTED);
            return Err(ProtocolError::NotConnected);
        }
        info!("Entering main loop");

        let interval = self.config.poll_interval;
        while !self.core.stop.is_stopped() {
            if let Err(e) = self.receive_packets(None, interval).await {
                error!(error = %e, "Main loop ended");
                return Err(e);
            }
        }

        info!("Main loop stopped");
        Ok(())
    }

    /// Say goodbye, close the connection and reset the session state.
    ///
    /// Send and shutdown failures are logged; the session ends up
    /// disconnected either way.
    pub async fn quit_server(&mut self) {
        let was_connected = self.client.is_connected();
        if was_connected {
            if let Err(e) = self.client.send_packet(AdminQuit::default()).await {
                warn!(error = %e, "Could not send quit");
            }
            self.client.disconnect().await;
        }

        self.core.state = SessionState::default();
        self.core.outbox.clear();
        self.core.stop.reset();

        if was_connected {
            self.core.handler.on_quit();
            info!("Quit server");
        }
    }

    async fn flush_outbox(&mut self) -> Result<()> {
        for packet in std::mem::take(&mut self.core.outbox) {
            self.send_packet(packet).await?;
        }
        Ok(())
    }

    fn sync_connection(&mut self) {
        if !self.client.is_connected() && self.core.state.phase != SessionPhase::Disconnected {
            warn!("{}", constants::ERR_CONNECTION_CLOSED);
            self.core.state.phase = SessionPhase::Disconnected;
            self.core.state.rcon = None;
            self.core.state.abandoned_rcon.clear();
        }
    }
}
