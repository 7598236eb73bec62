// src/server/spawner.rs

//! Spawns all of the forwarder's long-running worker tasks.

use tracing::info;

use super::context::ForwarderContext;
use crate::core::downstream::DownstreamWorker;
use crate::core::gps::GpsWorker;
use crate::core::tasks::stats::StatsReporter;
use crate::core::tasks::validator::XtalValidator;
use crate::core::upstream::UpstreamWorker;

/// Spawns the upstream, downstream, GPS, validation and statistics tasks
/// into the context's JoinSet.
pub fn spawn_all(ctx: &mut ForwarderContext) {
    let state = &ctx.state;
    let conf = &state.config.gateway;

    if conf.upstream_enabled {
        let worker = UpstreamWorker::new(state.clone());
        let shutdown_rx = ctx.shutdown_tx.subscribe();
        ctx.background_tasks
            .spawn(async move { worker.run(shutdown_rx).await });
    }

    if conf.downstream_enabled {
        for (index, link) in state.links.iter().enumerate() {
            if !link.conf.serv_enabled {
                continue;
            }
            let worker = DownstreamWorker::new(state.clone(), index);
            let shutdown_rx = ctx.shutdown_tx.subscribe();
            ctx.background_tasks
                .spawn(async move { worker.run(shutdown_rx).await });
        }
    }

    if let Some(port) = ctx.gps_port.take() {
        let worker = GpsWorker::new(state.clone(), port);
        let shutdown_rx = ctx.shutdown_tx.subscribe();
        ctx.background_tasks.spawn(async move {
            worker.run(shutdown_rx).await;
            Ok(())
        });

        let validator = XtalValidator::new(state.clone());
        let shutdown_rx = ctx.shutdown_tx.subscribe();
        ctx.background_tasks.spawn(async move {
            validator.run(shutdown_rx).await;
            Ok(())
        });
    }

    let reporter = StatsReporter::new(state.clone());
    let shutdown_rx = ctx.shutdown_tx.subscribe();
    ctx.background_tasks
        .spawn(async move { reporter.run(shutdown_rx).await });

    info!("all worker tasks have been spawned");
}
