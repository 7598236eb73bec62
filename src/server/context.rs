// src/server/context.rs

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;

use crate::core::state::{ExitReason, GatewayState};
use crate::hal::gps::GpsPort;

/// Holds all the initialized state required to run the forwarder's
/// supervision loop.
pub struct ForwarderContext {
    pub state: Arc<GatewayState>,
    pub shutdown_tx: broadcast::Sender<()>,
    pub background_tasks: JoinSet<Result<(), anyhow::Error>>,
    /// Worker initiated process-exit requests (autoquit).
    pub exit_rx: mpsc::Receiver<ExitReason>,
    /// GPS backend, consumed by the spawner when the stream is active.
    pub gps_port: Option<Box<dyn GpsPort>>,
}
