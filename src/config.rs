use crate::transport::{SerialSettings, TransportTiming};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub serial_port: String,
    pub baud_rate: u32,
    pub read_timeout_ms: u64,
    pub startup_settle_ms: u64,
    pub min_send_gap_ms: u64,
    pub pre_send_delay_ms: u64,
    pub post_send_settle_ms: u64,
    pub loop_interval_ms: u64,
    pub dispatch_interval_ms: u64,
    pub pong_settle_ms: u64,
    pub data_dir: Option<PathBuf>,
    /// Tag id → username.
    pub users: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            serial_port: "/dev/ttyACM0".to_string(),
            baud_rate: 115_200,
            read_timeout_ms: 500,
            startup_settle_ms: 3000,
            min_send_gap_ms: 200,
            pre_send_delay_ms: 50,
            post_send_settle_ms: 150,
            loop_interval_ms: 20,
            dispatch_interval_ms: 100,
            pong_settle_ms: 300,
            data_dir: None,
            users: BTreeMap::from([
                ("7D133721".to_string(), "John".to_string()),
                ("00000000".to_string(), "Sarah".to_string()),
            ]),
        }
    }
}

impl Config {
    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms)
    }

    pub fn pong_settle(&self) -> Duration {
        Duration::from_millis(self.pong_settle_ms)
    }
}

impl From<&Config> for SerialSettings {
    fn from(cfg: &Config) -> Self {
        Self {
            port: cfg.serial_port.clone(),
            baud_rate: cfg.baud_rate,
            read_timeout: Duration::from_millis(cfg.read_timeout_ms),
        }
    }
}

impl From<&Config> for TransportTiming {
    fn from(cfg: &Config) -> Self {
        Self {
            startup_settle: Duration::from_millis(cfg.startup_settle_ms),
            min_send_gap: Duration::from_millis(cfg.min_send_gap_ms),
            pre_send_delay: Duration::from_millis(cfg.pre_send_delay_ms),
            post_send_settle: Duration::from_millis(cfg.post_send_settle_ms),
            loop_interval: Duration::from_millis(cfg.loop_interval_ms),
            ..TransportTiming::default()
        }
    }
}

pub trait ConfigStore {
    fn load(&self) -> Config;
    fn save(&self, cfg: &Config) -> std::io::Result<()>;
}

#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        let path = if let Some(pd) = ProjectDirs::from("", "", "sets") {
            pd.config_dir().join("config.json")
        } else {
            PathBuf::from("sets_config.json")
        };
        Self { path }
    }

    pub fn with_path<P: AsRef<Path>>(p: P) -> Self {
        Self {
            path: p.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for FileConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self) -> Config {
        if let Ok(bytes) = fs::read(&self.path) {
            match serde_json::from_slice::<Config>(&bytes) {
                Ok(cfg) => return cfg,
                Err(e) => tracing::warn!(path = %self.path.display(), error = %e, "ignoring unreadable config"),
            }
        }
        Config::default()
    }

    fn save(&self, cfg: &Config) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(cfg).unwrap_or_default();
        fs::write(&self.path, data)
    }
}
