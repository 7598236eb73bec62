// src/core/tasks/validator.rs

//! One-second validation of the GPS time reference and maintenance of the
//! crystal frequency correction.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::info;

use crate::core::gps::GPS_REF_MAX_AGE;
use crate::core::state::GatewayState;

pub struct XtalValidator {
    state: Arc<GatewayState>,
}

impl XtalValidator {
    pub fn new(state: Arc<GatewayState>) -> Self {
        Self { state }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("validation task started");
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        interval.tick().await; // the first tick fires immediately
        loop {
            tokio::select! {
                _ = interval.tick() => self.tick(),
                _ = shutdown_rx.recv() => {
                    info!("validation task shutting down");
                    return;
                }
            }
        }
    }

    /// One validation pass: age-check the time reference, then feed or
    /// invalidate the crystal correction.
    fn tick(&self) {
        let xtal_err = {
            let mut cell = self.state.time_ref.lock();
            let fresh = cell
                .anchor
                .as_ref()
                .and_then(|anchor| anchor.age())
                .is_some_and(|age| age <= GPS_REF_MAX_AGE);
            cell.valid = fresh;
            if fresh {
                cell.anchor.map(|anchor| anchor.xtal_err)
            } else {
                None
            }
        };

        let mut xtal = self.state.xtal.lock();
        match xtal_err {
            Some(err) => xtal.update(err),
            // couldn't sync, or sync too old
            None => xtal.invalidate(),
        }
    }
}
