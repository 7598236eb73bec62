// src/config.rs

//! Manages gateway configuration: the three-file JSON search order, the
//! key-by-key local override, and validation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{info, warn};

use crate::core::protocol::Eui64;

/// Support up to 4 servers, more does not seem realistic.
pub const MAX_SERVERS: usize = 4;

/// Time waited between two connection attempts for the same server.
pub const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(5);
/// Receive deadline on downstream sockets.
pub const PULL_TIMEOUT: Duration = Duration::from_millis(200);
/// Time waited when a fetch cycle returns no packets.
pub const FETCH_SLEEP: Duration = Duration::from_millis(10);
/// Interval between two polls of the beacon TX status.
pub const BEACON_POLL: Duration = Duration::from_millis(50);
/// Total budget for the beacon TX status poll.
pub const BEACON_POLL_BUDGET: Duration = Duration::from_millis(1500);

fn default_true() -> bool {
    true
}
fn default_eui() -> Eui64 {
    Eui64(0)
}
fn default_keepalive() -> u64 {
    5
}
fn default_stat_interval() -> u64 {
    30
}
fn default_push_timeout_ms() -> u64 {
    100
}
fn default_beacon_period() -> u32 {
    128
}
fn default_beacon_freq_hz() -> u32 {
    869_525_000
}
fn default_ghost_address() -> String {
    "127.0.0.1".to_string()
}
fn default_ghost_port() -> u16 {
    1914
}
fn default_monitor_address() -> String {
    "127.0.0.1".to_string()
}
fn default_monitor_port() -> u16 {
    2008
}
fn default_platform() -> String {
    "generic".to_string()
}

fn de_eui<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Eui64, D::Error> {
    let s = String::deserialize(deserializer)?;
    Eui64::parse(&s).map_err(serde::de::Error::custom)
}

/// One configured network server. Immutable after startup.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConf {
    pub server_address: String,
    pub serv_port_up: u16,
    pub serv_port_down: u16,
    #[serde(default = "default_true")]
    pub serv_enabled: bool,
}

/// The `gateway_conf` object of the configuration files.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConf {
    #[serde(rename = "gateway_ID", deserialize_with = "de_eui", default = "default_eui")]
    pub gateway_id: Eui64,

    /// Parsed from either the `servers` array or the legacy flat
    /// `server_address`/`serv_port_up`/`serv_port_down` keys.
    #[serde(skip)]
    pub servers: Vec<ServerConf>,

    /// Send a PULL_DATA request every this many seconds.
    #[serde(rename = "keepalive_interval", default = "default_keepalive")]
    pub keepalive_time: u64,
    /// Statistics collection and reporting interval, in seconds.
    #[serde(default = "default_stat_interval")]
    pub stat_interval: u64,
    /// Total PUSH_ACK collection budget; each of the two receive polls gets
    /// half of it.
    #[serde(default = "default_push_timeout_ms")]
    pub push_timeout_ms: u64,

    #[serde(rename = "forward_crc_valid", default = "default_true")]
    pub fwd_valid_pkt: bool,
    #[serde(rename = "forward_crc_error", default)]
    pub fwd_error_pkt: bool,
    #[serde(rename = "forward_crc_disabled", default)]
    pub fwd_nocrc_pkt: bool,

    #[serde(rename = "gps", default)]
    pub gps_enabled: bool,
    pub gps_tty_path: Option<String>,
    /// Reference coordinates override the live fix when set.
    #[serde(rename = "fake_gps", default)]
    pub gps_fake_enable: bool,
    #[serde(default)]
    pub ref_latitude: f64,
    #[serde(default)]
    pub ref_longitude: f64,
    #[serde(default)]
    pub ref_altitude: i32,

    #[serde(rename = "beacon", default)]
    pub beacon_enabled: bool,
    /// Beaconing period in seconds, a sub-multiple of 86400.
    #[serde(default = "default_beacon_period")]
    pub beacon_period: u32,
    /// Second of the cycle at which the beacon is emitted.
    #[serde(default)]
    pub beacon_offset: u32,
    #[serde(default = "default_beacon_freq_hz")]
    pub beacon_freq_hz: u32,

    #[serde(rename = "upstream", default = "default_true")]
    pub upstream_enabled: bool,
    #[serde(rename = "downstream", default = "default_true")]
    pub downstream_enabled: bool,
    #[serde(rename = "radiostream", default = "default_true")]
    pub radiostream_enabled: bool,
    #[serde(rename = "ghoststream", default)]
    pub ghoststream_enabled: bool,
    #[serde(rename = "statusstream", default = "default_true")]
    pub statusstream_enabled: bool,
    #[serde(rename = "monitor", default)]
    pub monitor_enabled: bool,

    #[serde(default = "default_ghost_address")]
    pub ghost_address: String,
    #[serde(default = "default_ghost_port")]
    pub ghost_port: u16,
    #[serde(default = "default_monitor_address")]
    pub monitor_address: String,
    #[serde(default = "default_monitor_port")]
    pub monitor_port: u16,

    /// Exit after this many consecutive unacknowledged PULL_DATA on any
    /// server; 0 disables the check.
    #[serde(default)]
    pub autoquit_threshold: u32,

    #[serde(default = "default_platform")]
    pub platform: String,
    #[serde(rename = "contact_email", default)]
    pub email: String,
    #[serde(default)]
    pub description: String,
}

impl GatewayConf {
    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_time)
    }

    pub fn stat_interval(&self) -> Duration {
        Duration::from_secs(self.stat_interval)
    }

    /// Deadline of one PUSH_ACK receive poll.
    pub fn push_timeout_half(&self) -> Duration {
        Duration::from_millis(self.push_timeout_ms / 2)
    }
}

/// The complete configuration: the gateway section plus the radio section,
/// which is handed opaquely to the concentrator backend.
#[derive(Debug, Clone)]
pub struct Config {
    pub gateway: GatewayConf,
    pub radio: Value,
}

#[derive(Deserialize)]
struct FileConf {
    #[serde(rename = "SX1301_conf", default)]
    radio: Value,
    gateway_conf: Value,
}

impl Config {
    /// Loads the configuration from `dir`, honoring the file search order:
    /// `debug_conf.json` alone if present, otherwise `global_conf.json`
    /// overridden key-by-key by `local_conf.json`.
    pub fn load(dir: &Path) -> Result<Config> {
        let debug_path = dir.join("debug_conf.json");
        let global_path = dir.join("global_conf.json");
        let local_path = dir.join("local_conf.json");

        let merged = if debug_path.is_file() {
            info!("found debug configuration file {}, parsing it", debug_path.display());
            info!("other configuration files will be ignored");
            read_json(&debug_path)?
        } else if global_path.is_file() {
            info!("found global configuration file {}, parsing it", global_path.display());
            let mut value = read_json(&global_path)?;
            if local_path.is_file() {
                info!("found local configuration file {}, parsing it", local_path.display());
                info!("redefined parameters will overwrite global parameters");
                merge(&mut value, read_json(&local_path)?);
            }
            value
        } else if local_path.is_file() {
            info!("found local configuration file {}, parsing it", local_path.display());
            read_json(&local_path)?
        } else {
            return Err(anyhow!(
                "failed to find any configuration file named {}, {} or {}",
                global_path.display(),
                local_path.display(),
                debug_path.display()
            ));
        };

        let file_conf: FileConf =
            serde_json::from_value(merged).context("invalid configuration structure")?;
        let servers = parse_servers(&file_conf.gateway_conf);
        let mut gateway: GatewayConf = serde_json::from_value(file_conf.gateway_conf)
            .context("invalid gateway_conf object")?;
        gateway.servers = servers;

        let config = Config {
            gateway,
            radio: file_conf.radio,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let gw = &self.gateway;
        if gw.servers.is_empty() {
            warn!("no network server configured, the gateway will forward nothing");
        }
        if gw.beacon_enabled {
            if gw.beacon_period == 0 || 86400 % gw.beacon_period != 0 {
                return Err(anyhow!(
                    "beacon_period {} must be a non-zero divisor of 86400",
                    gw.beacon_period
                ));
            }
            if gw.beacon_offset >= gw.beacon_period {
                return Err(anyhow!(
                    "beacon_offset {} must be smaller than beacon_period {}",
                    gw.beacon_offset,
                    gw.beacon_period
                ));
            }
        }
        if gw.gps_enabled && gw.gps_tty_path.is_none() && !gw.gps_fake_enable {
            warn!("gps enabled but no gps_tty_path configured");
        }
        Ok(())
    }
}

fn read_json(path: &PathBuf) -> Result<Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("{} is not valid JSON", path.display()))
}

/// Key-by-key override of `base` with `overlay`, recursing into objects so a
/// local file can redefine a single nested radio parameter.
fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(slot) => merge(slot, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// Extracts the server list: the `servers` array when present, else the
/// legacy flat keys. Malformed array entries are skipped with a warning
/// rather than failing the whole load.
fn parse_servers(gateway_conf: &Value) -> Vec<ServerConf> {
    let mut servers = Vec::new();
    if let Some(entries) = gateway_conf.get("servers").and_then(Value::as_array) {
        for entry in entries {
            match serde_json::from_value::<ServerConf>(entry.clone()) {
                Ok(server) => servers.push(server),
                Err(e) => warn!("skipping malformed server entry: {e}"),
            }
        }
    } else if let Some(address) = gateway_conf.get("server_address").and_then(Value::as_str) {
        let port_up = gateway_conf.get("serv_port_up").and_then(Value::as_u64);
        let port_down = gateway_conf.get("serv_port_down").and_then(Value::as_u64);
        if let (Some(up), Some(down)) = (port_up, port_down) {
            servers.push(ServerConf {
                server_address: address.to_string(),
                serv_port_up: up as u16,
                serv_port_down: down as u16,
                serv_enabled: true,
            });
        }
    }
    if servers.len() > MAX_SERVERS {
        warn!("too many servers configured, keeping the first {MAX_SERVERS}");
        servers.truncate(MAX_SERVERS);
    }
    servers
}
