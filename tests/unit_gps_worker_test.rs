// tests/unit_gps_worker_test.rs

mod common;

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};

use lorafwd::config::Config;
use lorafwd::core::errors::FwdError;
use lorafwd::core::gps::{GpsWorker, TimeRef};
use lorafwd::core::state::GatewayState;
use lorafwd::core::tasks::validator::XtalValidator;
use lorafwd::hal::gps::{GpsCoords, GpsPort, NmeaSentence};

/// Emits a fixed number of RMC sentences one second of UTC apart, then
/// blocks forever like an idle serial port.
struct ScriptedGps {
    utc: DateTime<Utc>,
    fix: Option<GpsCoords>,
    remaining: u32,
}

#[async_trait]
impl GpsPort for ScriptedGps {
    async fn read_sentence(&mut self) -> Result<NmeaSentence, FwdError> {
        if self.remaining == 0 {
            std::future::pending::<()>().await;
        }
        self.remaining -= 1;
        self.utc = self.utc + chrono::Duration::seconds(1);
        sleep(Duration::from_millis(10)).await;
        Ok(NmeaSentence::Rmc)
    }

    fn last_utc(&self) -> Option<DateTime<Utc>> {
        Some(self.utc)
    }

    fn last_fix(&self) -> Option<GpsCoords> {
        self.fix
    }
}

fn gps_state() -> (Arc<GatewayState>, Arc<parking_lot::Mutex<common::MockLog>>) {
    let mut gateway = common::gateway_conf(json!({ "gps": true, "beacon": true }));
    gateway.servers = vec![];
    let config = Arc::new(Config {
        gateway,
        radio: json!({}),
    });
    let (concentrator, log) = common::mock_concentrator();
    let (state, _exit_rx) = GatewayState::new(config, concentrator, None, true);
    (state, log)
}

#[tokio::test]
async fn test_rmc_sync_updates_reference_and_position() {
    let (state, log) = gps_state();
    log.lock().trig_cnt = 5_000_000;

    // 1_700_000_000 is a multiple of the default 128 s beacon period; the
    // single RMC lands on second 127 of the cycle, arming the next PPS
    let port = ScriptedGps {
        utc: Utc.timestamp_opt(1_700_000_000 + 126, 0).unwrap(),
        fix: Some(GpsCoords {
            latitude: 46.52,
            longitude: 6.56,
            altitude: 400,
        }),
        remaining: 1,
    };

    let (shutdown_tx, _) = broadcast::channel(1);
    let handle = tokio::spawn(GpsWorker::new(state.clone(), Box::new(port)).run(shutdown_tx.subscribe()));

    sleep(Duration::from_millis(300)).await;
    {
        let cell = state.time_ref.lock();
        let anchor = cell.anchor.expect("RMC must produce an anchor");
        assert_eq!(anchor.count_us, 5_000_000);
        assert_eq!(anchor.utc.timestamp(), 1_700_000_000 + 127);
        assert_eq!(anchor.xtal_err, 1.0);
    }
    {
        let position = state.gps_position.lock();
        assert!(position.valid);
        assert!((position.coords.latitude - 46.52).abs() < 1e-9);
        assert_eq!(position.coords.altitude, 400);
    }
    assert!(
        state
            .beacon_next_pps
            .load(std::sync::atomic::Ordering::Relaxed)
    );

    shutdown_tx.send(()).unwrap();
    timeout(Duration::from_secs(2), handle)
        .await
        .expect("worker must stop")
        .unwrap();
}

#[tokio::test]
async fn test_validator_invalidates_stale_reference() {
    let (state, _log) = gps_state();

    // a reference synced a minute ago is past the 30 s admission window
    {
        let mut cell = state.time_ref.lock();
        cell.anchor = Some(TimeRef {
            systime: SystemTime::now() - Duration::from_secs(60),
            count_us: 0,
            utc: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            xtal_err: 1.0,
        });
        cell.valid = true;
    }
    {
        let mut xtal = state.xtal.lock();
        for _ in 0..lorafwd::core::state::XERR_INIT_AVG {
            xtal.update(1.0);
        }
        assert!(xtal.valid);
    }

    let (shutdown_tx, _) = broadcast::channel(1);
    let handle = tokio::spawn(XtalValidator::new(state.clone()).run(shutdown_tx.subscribe()));

    sleep(Duration::from_millis(1300)).await;
    assert!(!state.time_ref.lock().valid);
    {
        let xtal = state.xtal.lock();
        assert!(!xtal.valid);
        assert_eq!(xtal.value, 1.0);
    }

    // a fresh sync becomes valid on the next pass
    state.time_ref.lock().anchor = Some(TimeRef {
        systime: SystemTime::now(),
        count_us: 0,
        utc: Utc.timestamp_opt(1_700_000_060, 0).unwrap(),
        xtal_err: 1.0,
    });
    sleep(Duration::from_millis(1100)).await;
    assert!(state.time_ref.lock().valid);

    shutdown_tx.send(()).unwrap();
    timeout(Duration::from_secs(2), handle)
        .await
        .expect("validator must stop")
        .unwrap();
}
