// tests/unit_config_test.rs

use std::fs;
use std::path::Path;

use lorafwd::config::Config;
use tempfile::TempDir;

fn write(dir: &Path, name: &str, content: &str) {
    fs::write(dir.join(name), content).unwrap();
}

const GLOBAL: &str = r#"{
    "SX1301_conf": { "lorawan_public": true, "clksrc": 1 },
    "gateway_conf": {
        "gateway_ID": "AA555A0000000101",
        "servers": [
            { "server_address": "router.eu.example.org", "serv_port_up": 1700, "serv_port_down": 1701 },
            { "server_address": "backup.example.org", "serv_port_up": 1700, "serv_port_down": 1701, "serv_enabled": false }
        ],
        "keepalive_interval": 10,
        "stat_interval": 60,
        "forward_crc_error": true
    }
}"#;

#[test]
fn test_global_conf_only() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "global_conf.json", GLOBAL);

    let config = Config::load(dir.path()).unwrap();
    let gw = &config.gateway;
    assert_eq!(gw.gateway_id.0, 0xAA55_5A00_0000_0101);
    assert_eq!(gw.servers.len(), 2);
    assert_eq!(gw.servers[0].server_address, "router.eu.example.org");
    assert!(gw.servers[0].serv_enabled);
    assert!(!gw.servers[1].serv_enabled);
    assert_eq!(gw.keepalive_time, 10);
    assert_eq!(gw.stat_interval, 60);
    assert!(gw.fwd_error_pkt);
    // defaults
    assert!(gw.fwd_valid_pkt);
    assert!(!gw.fwd_nocrc_pkt);
    assert!(gw.upstream_enabled);
    assert!(gw.radiostream_enabled);
    assert!(!gw.ghoststream_enabled);
    assert_eq!(gw.push_timeout_ms, 100);
    assert_eq!(gw.autoquit_threshold, 0);
    assert_eq!(config.radio["clksrc"], 1);
}

#[test]
fn test_local_conf_overrides_global() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "global_conf.json", GLOBAL);
    write(
        dir.path(),
        "local_conf.json",
        r#"{
            "SX1301_conf": { "clksrc": 0 },
            "gateway_conf": { "gateway_ID": "DEADBEEF00000001", "stat_interval": 5 }
        }"#,
    );

    let config = Config::load(dir.path()).unwrap();
    let gw = &config.gateway;
    // redefined parameters overwrite global ones
    assert_eq!(gw.gateway_id.0, 0xDEAD_BEEF_0000_0001);
    assert_eq!(gw.stat_interval, 5);
    assert_eq!(config.radio["clksrc"], 0);
    // untouched parameters survive the merge
    assert_eq!(gw.keepalive_time, 10);
    assert_eq!(gw.servers.len(), 2);
    assert_eq!(config.radio["lorawan_public"], true);
}

#[test]
fn test_debug_conf_is_exclusive() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "global_conf.json", GLOBAL);
    write(
        dir.path(),
        "debug_conf.json",
        r#"{
            "gateway_conf": {
                "gateway_ID": "0000000000000042",
                "server_address": "127.0.0.1",
                "serv_port_up": 1780,
                "serv_port_down": 1782
            }
        }"#,
    );

    let config = Config::load(dir.path()).unwrap();
    let gw = &config.gateway;
    assert_eq!(gw.gateway_id.0, 0x42);
    // global_conf.json was ignored entirely
    assert_eq!(gw.stat_interval, 30);
    // flat legacy server keys are honored
    assert_eq!(gw.servers.len(), 1);
    assert_eq!(gw.servers[0].server_address, "127.0.0.1");
    assert_eq!(gw.servers[0].serv_port_up, 1780);
    assert_eq!(gw.servers[0].serv_port_down, 1782);
}

#[test]
fn test_missing_configuration_is_fatal() {
    let dir = TempDir::new().unwrap();
    assert!(Config::load(dir.path()).is_err());
}

#[test]
fn test_malformed_server_entries_are_skipped() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "global_conf.json",
        r#"{
            "gateway_conf": {
                "servers": [
                    { "server_address": "ok.example.org", "serv_port_up": 1700, "serv_port_down": 1701 },
                    { "server_address": "broken.example.org" }
                ]
            }
        }"#,
    );
    let config = Config::load(dir.path()).unwrap();
    assert_eq!(config.gateway.servers.len(), 1);
    assert_eq!(config.gateway.servers[0].server_address, "ok.example.org");
}

#[test]
fn test_beacon_settings_are_validated() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "global_conf.json",
        r#"{
            "gateway_conf": {
                "beacon": true,
                "beacon_period": 128,
                "beacon_offset": 128
            }
        }"#,
    );
    // offset must be strictly smaller than the period
    assert!(Config::load(dir.path()).is_err());

    write(
        dir.path(),
        "global_conf.json",
        r#"{
            "gateway_conf": {
                "beacon": true,
                "beacon_period": 99
            }
        }"#,
    );
    // period must divide a day
    assert!(Config::load(dir.path()).is_err());
}

#[test]
fn test_invalid_gateway_id_is_fatal() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "global_conf.json",
        r#"{ "gateway_conf": { "gateway_ID": "not-hex" } }"#,
    );
    assert!(Config::load(dir.path()).is_err());
}
