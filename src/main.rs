//! SU2 MCP Server
//!
//! This binary runs an MCP server over stdin/stdout that manages isolated
//! SU2 solver sessions. Logs go to stderr; stdout carries the protocol.

use clap::{Args, Parser, Subcommand};
use rmcp::transport::stdio;
use rmcp::ServiceExt;
use std::sync::Arc;
use std::time::Duration;
use su2_mcp::{expand_path, ProcessRunner, RunnerSettings, SessionStore, StoreSettings, Su2McpServer};
use tokio::sync::Notify;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Upper bound on waiting for sessions to close after the transport stops.
const SHUTDOWN_TIMEOUT_SECS: u64 = 30;

#[derive(Parser)]
#[command(name = "su2-mcp", version, about = "MCP server for isolated SU2 CFD sessions")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(Subcommand)]
enum Command {
    /// Run the MCP server over stdio (default)
    Serve(ServeArgs),
}

#[derive(Args)]
struct ServeArgs {
    /// Directory under which session directories are created
    #[arg(long, env = "SU2_MCP_SESSIONS_ROOT")]
    sessions_root: Option<String>,
    /// Fail when closing an unknown session instead of ignoring it
    #[arg(long, env = "SU2_MCP_STRICT_DELETE")]
    strict_delete: bool,
    /// Keep session directories on shutdown
    #[arg(long, env = "SU2_MCP_KEEP_SESSIONS")]
    keep_sessions: bool,
    /// Bytes of stdout/stderr kept per solver stream
    #[arg(long, env = "SU2_MCP_CAPTURE_LIMIT", default_value_t = su2_mcp::settings::DEFAULT_CAPTURE_LIMIT_BYTES)]
    capture_limit: usize,
    /// Solver timeout in seconds when a run does not specify one
    #[arg(long, env = "SU2_MCP_DEFAULT_TIMEOUT", default_value_t = su2_mcp::settings::DEFAULT_TIMEOUT_SECS)]
    default_timeout: u64,
    /// Largest solver timeout a run may request, in seconds
    #[arg(long, env = "SU2_MCP_MAX_TIMEOUT", default_value_t = su2_mcp::settings::MAX_TIMEOUT_SECS)]
    max_timeout: u64,
}

impl ServeArgs {
    fn store_settings(&self) -> StoreSettings {
        let mut settings = StoreSettings {
            strict_delete: self.strict_delete,
            cleanup_on_shutdown: !self.keep_sessions,
            ..StoreSettings::default()
        };
        if let Some(root) = &self.sessions_root {
            settings.sessions_root = expand_path(root);
        }
        settings
    }

    fn runner_settings(&self) -> RunnerSettings {
        RunnerSettings {
            capture_limit_bytes: self.capture_limit,
            default_timeout_secs: self.default_timeout,
            max_timeout_secs: self.max_timeout,
            ..RunnerSettings::default()
        }
    }
}

fn main() -> anyhow::Result<()> {
    // Initialize logging to stderr (stdout is used for MCP protocol)
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("su2_mcp=info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Some(Command::Serve(args)) => run_server(args),
        None => run_server(cli.serve),
    }
}

async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigquit = signal(SignalKind::quit())?;
        tokio::select! {
            _ = sigterm.recv() => {},
            _ = sigint.recv() => {},
            _ = sigquit.recv() => {},
            _ = tokio::signal::ctrl_c() => {},
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }

    Ok(())
}

fn run_server(args: ServeArgs) -> anyhow::Result<()> {
    info!("Starting SU2 MCP Server (stdio)");

    let store_settings = args.store_settings();
    let runner = ProcessRunner::new(args.runner_settings());
    let store = Arc::new(SessionStore::new(store_settings, runner)?);

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    rt.block_on(async move {
        let server = Su2McpServer::new(Arc::clone(&store));
        let mut service = Some(server.serve(stdio()).await?);
        info!("MCP server listening on stdio");

        let shutdown_notify = Arc::new(Notify::new());
        let shutdown_signal = shutdown_notify.clone();
        tokio::spawn(async move {
            if wait_for_shutdown_signal().await.is_ok() {
                info!("Shutdown signal received");
                shutdown_signal.notify_one();
            } else {
                info!("Shutdown signal handler failed; server will continue running");
            }
        });

        loop {
            tokio::select! {
                _ = shutdown_notify.notified() => {
                    if let Some(running) = service.take() {
                        let _ = running.cancel().await?;
                    }
                    break;
                }
                _ = tokio::time::sleep(Duration::from_millis(200)) => {
                    if let Some(running) = service.as_ref() {
                        if running.is_transport_closed() {
                            if let Some(running) = service.take() {
                                let _ = running.waiting().await?;
                            }
                            break;
                        }
                    }
                }
            }
        }
        info!("MCP server shutting down");

        if tokio::time::timeout(
            Duration::from_secs(SHUTDOWN_TIMEOUT_SECS),
            store.shutdown_all(),
        )
        .await
        .is_err()
        {
            warn!(
                root = %store.root().display(),
                "Timed out closing sessions; some directories may remain"
            );
        }
        Ok::<_, anyhow::Error>(())
    })?;

    info!("Server stopped");
    Ok(())
}
