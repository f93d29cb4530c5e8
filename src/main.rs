//! # Peer Authentication Reference Program
//!
//! Runs one side of the mutual challenge-response handshake over UDP
//! loopback. Start a server in one process and a client in another; each
//! prints the session's status changes and exits once the handshake
//! reaches a terminal status.
//!
//! The program wires the pieces together in order:
//! 1. **Initialize logging**: detailed layer to a file (or stderr) plus a
//!    user-facing stdout layer that tints failures
//! 2. **Parse arguments**: role selection and transport overrides
//! 3. **Create the session**: role, method, and optional key override
//! 4. **Bind the transport**: UDP loopback with role-derived ports
//! 5. **Run the handshake**: wait for the terminal status reported by the
//!    session's status callback

use anyhow::{Context, Result};
use clap::Parser;
use peer_auth::{
    cli::Args, AuthSession, AuthStatus, InstanceId, StatusCallback, TransportHandle,
    TransportParams, TransportType,
};
use tokio::sync::mpsc;
use tracing::info;

use tracing_subscriber::{filter::LevelFilter, prelude::*, Layer};

mod logging;
use logging::StatusLineFormatter;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments first, as they control logging behavior.
    let args = Args::parse();

    // Diagnostic verbosity for both the detailed layer and stdout.
    // - default: INFO
    // -v: DEBUG
    // -vv and more: TRACE
    let log_level = match args.verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    // Configure the detailed log layer (file or stderr). The guard must
    // stay alive for the duration of the program for file logging.
    let guard;
    let detailed_log_layer;

    if let Some("stderr") = args.log_file.as_deref() {
        detailed_log_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_filter(log_level)
            .boxed();
        guard = None;
    } else {
        let file_appender = match args.log_file.as_deref() {
            Some(path_str) => {
                let log_path = std::path::Path::new(path_str);
                let log_dir = log_path
                    .parent()
                    .unwrap_or_else(|| std::path::Path::new("."));
                let log_filename = log_path
                    .file_name()
                    .unwrap_or_else(|| std::ffi::OsStr::new("peer-auth.log"));
                tracing_appender::rolling::daily(log_dir, log_filename)
            }
            None => tracing_appender::rolling::daily(".", "peer-auth.log"),
        };
        let (non_blocking_writer, file_guard) = tracing_appender::non_blocking(file_appender);
        detailed_log_layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_ansi(false) // No color codes in the log file
            .with_filter(log_level)
            .boxed();
        guard = Some(file_guard);
    }

    // Clean, user-facing output on stdout unless --quiet is present.
    let stdout_log = if !args.quiet {
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .event_format(StatusLineFormatter)
                .with_filter(log_level),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(detailed_log_layer)
        .with(stdout_log)
        .init();

    // Keep the logging guard alive so file logging flushes on exit.
    let _log_guard = guard;

    let role = if args.server { "server" } else { "client" };
    info!("Starting peer authentication ({})", role);

    // The status callback runs on the protocol worker; it forwards the
    // terminal status to this task through a channel.
    let (status_tx, mut status_rx) = mpsc::unbounded_channel();
    let status_cb: StatusCallback = Box::new(move |instance, status| {
        info!("Authentication ({}) status: {}", instance, status);
        if status.is_terminal() {
            let _ = status_tx.send(status);
        }
    });

    let mut session = AuthSession::new(
        InstanceId::Instance1,
        status_cb,
        args.opt_params().context("invalid shared key")?,
        args.session_flags(),
    )
    .context("failed to create authentication session")?;

    let transport = TransportHandle::init(
        InstanceId::Instance1,
        TransportType::Udp,
        TransportParams::Udp(args.udp_params()),
    )
    .await
    .context("failed to initialize UDP transport")?;

    session.attach_transport(transport.clone());
    session
        .start()
        .context("failed to start authentication session")?;

    // Wait until the handshake reaches a terminal status.
    let final_status = status_rx
        .recv()
        .await
        .unwrap_or(AuthStatus::Failed);

    session.deinit().await.ok();
    transport.deinit().await.ok();

    match final_status {
        AuthStatus::Successful => info!("Peer authenticated successfully"),
        status => info!("Authentication ended: {}", status),
    }

    Ok(())
}
