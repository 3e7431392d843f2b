//! Timeout defaults and the async timeout wrapper.

use crate::error::{ProtocolError, Result};
use std::future::Future;
use std::time::Duration;

/// Default timeout for connecting and for single socket operations
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long `join_server` waits for the protocol and welcome packets
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// How long `send_rcon` waits for the end of the command output
pub const RCON_TIMEOUT: Duration = Duration::from_secs(5);

/// Readiness timeout of one main loop iteration
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Run a fallible future under a timeout.
///
/// Elapsed time maps to [`ProtocolError::Timeout`].
pub async fn with_timeout<F, T>(duration: Duration, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| ProtocolError::Timeout)?
}
