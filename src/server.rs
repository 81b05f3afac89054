// src/server.rs

//! Binds the listening socket, spawns one task per accepted connection plus
//! (on a replica) the `ReplicationClient` task, and drives graceful shutdown
//! on SIGINT/SIGTERM (§5: "one OS-level task per accepted client session").

use crate::config::Config;
use crate::connection;
use crate::core::replication::{ReplicationClient, ReplicationState, Role};
use crate::core::state::SharedState;
use anyhow::Result;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpSocket};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Waits for a termination signal. On Unix, SIGINT and SIGTERM both trigger
/// a graceful shutdown; on other platforms, Ctrl-C.
async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = sigint.recv() => info!("SIGINT received, shutting down"),
            _ = sigterm.recv() => info!("SIGTERM received, shutting down"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Ctrl-C received, shutting down");
    }
}

/// Resolves `config.host`/`config.port`, binds with address reuse enabled
/// (§6), and builds the process-wide shared state for the configured role.
/// Split out from [`run`] so tests can bind an ephemeral port and learn its
/// real address before accepting connections.
pub async fn bind(config: &Config) -> Result<(TcpListener, SharedState)> {
    let role = if config.replica_of.is_some() {
        Role::Replica
    } else {
        Role::Primary
    };
    let repl = Arc::new(ReplicationState::new(role));
    let shared = SharedState::new(repl);

    let addr = format!("{}:{}", config.host, config.port);
    let std_addr: std::net::SocketAddr = tokio::net::lookup_host(&addr)
        .await?
        .next()
        .ok_or_else(|| anyhow::anyhow!("could not resolve {addr}"))?;

    let socket = if std_addr.is_ipv6() {
        TcpSocket::new_v6()?
    } else {
        TcpSocket::new_v4()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(std_addr)?;
    let listener = socket.listen(1024)?;
    info!("listening on {} as {role:?}", listener.local_addr()?);

    Ok((listener, shared))
}

/// Runs the accept loop (plus the `ReplicationClient` task, if configured as
/// a replica) until a shutdown signal arrives.
pub async fn serve(listener: TcpListener, shared: SharedState, config: &Config) -> Result<()> {
    let mut tasks = JoinSet::new();

    if let Some(replica_of) = &config.replica_of {
        let client = ReplicationClient::new(
            shared.clone(),
            replica_of.host.clone(),
            replica_of.port,
            config.port,
        );
        tasks.spawn(async move {
            client.run().await;
        });
    }

    loop {
        tokio::select! {
            biased;

            _ = await_shutdown_signal() => {
                break;
            }

            Some(res) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = res {
                    warn!("background task panicked: {e:?}");
                }
            }

            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer_addr)) => {
                        let shared = shared.clone();
                        tasks.spawn(async move {
                            connection::handle(stream, peer_addr, shared).await;
                        });
                    }
                    Err(e) => error!("failed to accept connection: {e}"),
                }
            }
        }
    }

    info!("shutting down, waiting for in-flight connections to drain");
    tasks.shutdown().await;
    Ok(())
}

/// Runs the server until a shutdown signal arrives: bind, then serve.
pub async fn run(config: Config) -> Result<()> {
    let (listener, shared) = bind(&config).await?;
    serve(listener, shared, &config).await
}
