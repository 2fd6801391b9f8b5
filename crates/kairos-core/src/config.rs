use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::types::NodeIdentity;

pub const DEFAULT_PORT: u16 = 8181;
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_GPIO_ROOT: &str = "/sys/class/gpio";
pub const SAVED_DIR: &str = "saved";
pub const OUTPUT_DIR: &str = "output";
pub const LOG_DIR: &str = "log";
/// Snapshot written after every state mutation.
pub const CURRENT_SNAPSHOT: &str = "current";

/// Top-level config (kairos.toml + KAIROS_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KairosConfig {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub home: HomeConfig,
    #[serde(default)]
    pub gpio: GpioConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
}

/// Identity of this process as seen by its peers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HomeConfig {
    /// Root under which `saved/`, `output/` and `log/` are created.
    #[serde(default = "default_home_dir")]
    pub dir: String,
}

impl Default for HomeConfig {
    fn default() -> Self {
        Self {
            dir: default_home_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpioConfig {
    /// sysfs GPIO root. Tests point this at a temp directory.
    #[serde(default = "default_gpio_root")]
    pub root: String,
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            root: default_gpio_root(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Restore `saved/current.json` on startup.
    #[serde(default = "bool_true")]
    pub autoload: bool,
    /// Write `saved/current.json` after every mutation.
    #[serde(default = "bool_true")]
    pub autosave: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            autoload: true,
            autosave: true,
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_host() -> String {
    DEFAULT_HOST.to_string()
}
fn default_gpio_root() -> String {
    DEFAULT_GPIO_ROOT.to_string()
}
fn default_home_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.kairos", home)
}

impl KairosConfig {
    /// Load config from a TOML file with KAIROS_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.kairos/kairos.toml
    ///
    /// Nested keys use a double underscore: `KAIROS_NODE__PORT=9000`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: KairosConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("KAIROS_").split("__"))
            .extract()
            .map_err(|e| crate::error::KairosError::Config(e.to_string()))?;

        Ok(config)
    }

    pub fn identity(&self) -> NodeIdentity {
        NodeIdentity::new(&self.node.host, self.node.port)
    }

    pub fn home_dir(&self) -> PathBuf {
        PathBuf::from(&self.home.dir)
    }

    pub fn saved_dir(&self) -> PathBuf {
        self.home_dir().join(SAVED_DIR)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.home_dir().join(OUTPUT_DIR)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.home_dir().join(LOG_DIR)
    }

    pub fn gpio_root(&self) -> PathBuf {
        PathBuf::from(&self.gpio.root)
    }

    /// Create `saved/`, `output/` and `log/` under the home directory.
    pub fn ensure_home(&self) -> crate::error::Result<()> {
        for dir in [self.saved_dir(), self.output_dir(), self.log_dir()] {
            crate::io::ensure_dir(&dir)?;
        }
        Ok(())
    }
}

fn default_config_path() -> String {
    Path::new(&default_home_dir())
        .join("kairos.toml")
        .to_string_lossy()
        .into_owned()
}
