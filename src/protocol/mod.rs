//! # Protocol Layer
//!
//! Everything above the frame codec:
//!
//! - [`types`]: named protocol enumerations
//! - [`dispatcher`]: per-kind observer lists and fan-out
//! - [`client`]: typed send/receive over one connection
//! - [`handler`]: user hooks of the session engine
//! - [`session`]: the session state machine

pub mod client;
pub mod dispatcher;
pub mod handler;
pub mod session;
pub mod types;


pub use client::AdminClient;
pub use dispatcher::{Callback, CallbackKey, CallbackTable, DispatchOutcome, Position};
pub use handler::{HookContext, NoopHandler, SessionHandler};
pub use session::{ChatLines, ClientInfo, Session, SessionCore, SessionPhase, SessionState, StopHandle};
