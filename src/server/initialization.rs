// src/server/initialization.rs

//! Handles the complete forwarder initialization process: shared state
//! construction, connector spawning, concentrator start and the ghost
//! listener.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{info, warn};

use super::context::ForwarderContext;
use crate::config::Config;
use crate::core::connector::Connector;
use crate::core::state::GatewayState;
use crate::hal::Deps;
use crate::hal::ghost::{GhostListener, GhostStream};

/// Initializes all forwarder components before the workers start.
pub async fn setup(config: Config, deps: Deps) -> Result<ForwarderContext> {
    let config = Arc::new(config);
    let conf = &config.gateway;
    info!("gateway EUI is {}", conf.gateway_id);
    let (shutdown_tx, _) = broadcast::channel(1);

    let gps_active = if !conf.gps_enabled || conf.gps_fake_enable {
        false
    } else if deps.gps.is_none() {
        warn!("gps enabled but no GPS backend available, running without GPS sync");
        false
    } else {
        true
    };

    let ghost = conf.ghoststream_enabled.then(GhostStream::new);
    let (state, exit_rx) = GatewayState::new(
        config.clone(),
        deps.concentrator,
        ghost,
        gps_active,
    );

    let mut background_tasks: JoinSet<Result<(), anyhow::Error>> = JoinSet::new();

    info!("starting connection tasks");
    for index in 0..state.links.len() {
        let connector = Connector::new(state.clone(), index);
        let shutdown_rx = shutdown_tx.subscribe();
        background_tasks.spawn(async move {
            connector.run(shutdown_rx).await;
            Ok(())
        });
    }

    if !state.links.is_empty() {
        info!("waiting for at least one connected server");
        state.registry.wait_any_started().await;
    }

    if conf.radiostream_enabled {
        info!("starting the concentrator");
        state
            .concentrator
            .lock()
            .await
            .start()
            .context("failed to start the concentrator")?;
        info!("concentrator started, radio packets can now be received");
    } else {
        warn!("radio is disabled, radio packets cannot be sent or received");
    }

    if let Some(stream) = &state.ghost {
        let listener =
            GhostListener::bind(&conf.ghost_address, conf.ghost_port, stream.clone()).await?;
        let shutdown_rx = shutdown_tx.subscribe();
        background_tasks.spawn(async move {
            listener.run(shutdown_rx).await;
            Ok(())
        });
        info!("ghost listener started, ghost packets can now be received");
    }

    if !conf.radiostream_enabled
        && !conf.ghoststream_enabled
        && !conf.statusstream_enabled
        && !conf.monitor_enabled
    {
        warn!("all streams have been disabled, gateway may be completely silent");
    }

    Ok(ForwarderContext {
        state,
        shutdown_tx,
        background_tasks,
        exit_rx,
        gps_port: if gps_active { deps.gps } else { None },
    })
}
