// src/server/mod.rs

//! Forwarder orchestration: setup, worker spawning, supervision and
//! graceful shutdown.

use std::time::Duration;

use anyhow::{Result, anyhow};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info, warn};

mod context;
mod initialization;
mod spawner;

pub use context::ForwarderContext;

use crate::config::Config;
use crate::hal::Deps;

/// How the process was asked to terminate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shutdown {
    /// SIGINT/SIGTERM: full shutdown, hardware included.
    Exit,
    /// SIGQUIT: terminate without touching the hardware.
    Quit,
}

/// The main forwarder entry point, orchestrating all phases. Returns an
/// error for every failure mode that must map to a non-zero exit code.
pub async fn run(config: Config, deps: Deps) -> Result<()> {
    // 1. Shared state, server connections, concentrator start.
    let mut ctx = initialization::setup(config, deps).await?;

    // 2. Spawn all worker tasks.
    spawner::spawn_all(&mut ctx);

    // 3. Supervise until a signal, an exit request or a worker failure.
    supervise(ctx).await
}

async fn await_shutdown_signal() -> Shutdown {
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to create SIGINT stream");
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to create SIGTERM stream");
    let mut sigquit = signal(SignalKind::quit()).expect("failed to create SIGQUIT stream");

    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT received, initiating graceful shutdown");
            Shutdown::Exit
        }
        _ = sigterm.recv() => {
            info!("SIGTERM received, initiating graceful shutdown");
            Shutdown::Exit
        }
        _ = sigquit.recv() => {
            info!("SIGQUIT received, terminating without hardware shutdown");
            Shutdown::Quit
        }
    }
}

async fn supervise(mut ctx: ForwarderContext) -> Result<()> {
    let mut failure: Option<anyhow::Error> = None;
    let mut quit = false;

    loop {
        tokio::select! {
            biased;

            sig = await_shutdown_signal() => {
                quit = sig == Shutdown::Quit;
                break;
            }

            Some(reason) = ctx.exit_rx.recv() => {
                failure = Some(anyhow!("process exit requested: {reason:?}"));
                break;
            }

            Some(res) = ctx.background_tasks.join_next() => {
                match res {
                    Ok(Ok(())) => info!("a worker task has completed"),
                    Ok(Err(e)) => {
                        error!("CRITICAL: worker task failed: {e}. Shutting down.");
                        failure = Some(e);
                        break;
                    }
                    Err(e) => {
                        error!("CRITICAL: worker task panicked: {e:?}. Shutting down.");
                        failure = Some(anyhow!("worker task panicked: {e:?}"));
                        break;
                    }
                }
            }
        }
    }

    // Let the upstream and downstream loops observe the shutdown (one fetch
    // or keepalive cycle at most), then cancel whatever is still blocked,
    // which covers the GPS and validation tasks.
    let _ = ctx.shutdown_tx.send(());
    let _ = tokio::time::timeout(Duration::from_secs(6), async {
        while ctx.background_tasks.join_next().await.is_some() {}
    })
    .await;
    ctx.background_tasks.abort_all();

    if !quit && ctx.state.config.gateway.radiostream_enabled {
        match ctx.state.concentrator.lock().await.stop() {
            Ok(()) => info!("concentrator stopped successfully"),
            Err(e) => warn!("failed to stop concentrator successfully: {e}"),
        }
    }

    info!("exiting packet forwarder");
    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
