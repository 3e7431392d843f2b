//! Command-line admin client: join a server, greet joining players and follow
//! the game until the server shuts down or Ctrl-C is pressed.

use clap::Parser;
use openttd_admin::config::AdminConfig;
use openttd_admin::core::packet::ServerChat;
use openttd_admin::protocol::handler::{HookContext, SessionHandler};
use openttd_admin::protocol::Session;
use openttd_admin::utils::logging::init_logging;
use openttd_admin::{ProtocolError, Result};
use chrono::NaiveDate;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn, Level};

/// Admin port client for OpenTTD servers.
///
/// Command-line values override the configuration file.
#[derive(Parser, Debug)]
#[command(name = "openttd-admin", version, about)]
struct CliArgs {
    /// Admin password of the server
    #[arg(long)]
    server_password: Option<String>,

    /// Server host name or address
    #[arg(long)]
    server_host: Option<String>,

    /// Admin port of the server
    #[arg(long)]
    server_port: Option<u16>,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(long)]
    verbose: bool,
}

impl CliArgs {
    fn into_config(self) -> Result<AdminConfig> {
        let mut config = match &self.config {
            Some(path) => AdminConfig::from_file(path)?,
            None => AdminConfig::default(),
        };

        if let Some(password) = self.server_password {
            config.session.password = password;
        }
        if let Some(host) = self.server_host {
            config.client.host = host;
        }
        if let Some(port) = self.server_port {
            config.client.port = port;
        }
        if self.verbose {
            config.logging.log_level = Level::DEBUG;
        }
        if config.session.welcome_message.is_none() {
            config.session.welcome_message = Some(default_welcome_message());
        }

        if config.session.password.is_empty() {
            return Err(ProtocolError::ConfigError(
                "a server password is required (--server-password or session.password)".into(),
            ));
        }
        config.validate_strict()?;
        Ok(config)
    }
}

fn default_welcome_message() -> Vec<String> {
    vec![
        "Welcome!".into(),
        "This server is administered by openttd-admin".into(),
        "Have fun!".into(),
    ]
}

/// Logs the game events worth seeing on a console.
struct ConsoleReporter;

impl SessionHandler for ConsoleReporter {
    fn on_joined(&mut self, ctx: &mut HookContext<'_>) {
        info!(server = ?ctx.state().server_name(), "Ready");
    }

    fn on_new_year(&mut self, _ctx: &mut HookContext<'_>, date: NaiveDate) {
        info!(%date, "New year");
    }

    fn on_chat(&mut self, _ctx: &mut HookContext<'_>, packet: &ServerChat) {
        info!(client_id = ?packet.client_id, message = ?packet.message, "Chat");
    }
}

async fn run(config: AdminConfig) -> Result<()> {
    let mut session = Session::new(&config, ConsoleReporter);
    match session.join_server().await {
        Ok(()) => {}
        Err(
            e @ (ProtocolError::UnsupportedUpdateType(_)
            | ProtocolError::UnsupportedFrequency { .. }),
        ) => warn!(error = %e, "Continuing without some subscriptions"),
        Err(e) => return Err(e),
    }

    // the loop sees the flag between packets, so no frame is cut short
    let stop = session.stop_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted");
            stop.stop();
        }
    });

    let result = session.main_loop().await;
    interrupt.abort();

    session.metrics().log_metrics();
    session.quit_server().await;
    result
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = match CliArgs::parse().into_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logging(&config.logging) {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }
    info!(host = %config.client.host, port = config.client.port, "start");

    match run(config).await {
        Ok(()) | Err(ProtocolError::ConnectionClosed) => {
            info!("end");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Admin session failed");
            ExitCode::FAILURE
        }
    }
}
