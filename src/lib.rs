//! # openttd-admin
//!
//! Client for the OpenTTD admin port.
//!
//! The crate is layered leaf-first:
//!
//! - [`core`]: wire types, packet schemas and the length-prefixed frame codec
//! - [`transport`]: one framed TCP connection
//! - [`protocol`]: observer dispatch, the typed admin client and the session engine
//! - [`config`], [`error`], [`utils`]: configuration, the error taxonomy,
//!   logging, metrics and timeouts
//!
//! ## Quick start
//! ```no_run
//! use openttd_admin::config::AdminConfig;
//! use openttd_admin::protocol::Session;
//!
//! # async fn run() -> openttd_admin::error::Result<()> {
//! let config = AdminConfig::default_with_overrides(|c| {
//!     c.client.host = "game.example.org".into();
//!     c.session.password = "secret".into();
//! });
//! let mut session = Session::without_handler(&config);
//! session.join_server().await?;
//! session.send_public_chat("Hello from the admin port").await?;
//! session.quit_server().await;
//! # Ok(())
//! # }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod transport;
pub mod utils;

pub use config::AdminConfig;
pub use error::{ProtocolError, Result};
pub use protocol::{AdminClient, Session, SessionHandler};
