use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

/// Object storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Data source name of the bucket (`memory://`, `file:///path`, `s3://...`, `gs://bucket`)
    pub dsn: String,
    /// Root prefix of the key space inside the bucket
    pub root: String,
    /// Transparently zstd-compress every object
    pub compression: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dsn: String::from("memory://"),
            root: String::from("bigbucket"),
            compression: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: String::from("127.0.0.1"),
            port: 8080,
        }
    }
}

impl ServerConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// How sweeps of the garbage collector are triggered
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanerMode {
    /// A single sweep, then exit
    Once,
    /// Sweep on start, then on every tick of `interval`
    #[default]
    Interval,
    /// Sweep on every `POST /` of the cleaner HTTP listener
    Http,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CleanerConfig {
    pub mode: CleanerMode,
    /// Time between two sweeps in interval mode
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Port of the trigger listener in http mode
    pub port: u16,
    /// Upper bound for draining outstanding deletions on shutdown
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Maximum number of passes per sweep phase
    pub max_passes: usize,
    /// Deletion workers per sweep pass
    pub workers: usize,
    /// Run the interval sweeper inside the API server process
    pub embedded: bool,
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            mode: CleanerMode::default(),
            interval: Duration::from_secs(60),
            port: 8081,
            shutdown_timeout: Duration::from_secs(30),
            max_passes: 64,
            workers: 32,
            embedded: false,
        }
    }
}

/// Fan-out limits applied to every per-request job pool
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Upper cap on concurrent workers of a single fan-out
    pub max_workers: usize,
    /// Queue capacity is `workers * queue_factor`
    pub queue_factor: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_workers: 64,
            queue_factor: 10,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Configuration {
    /// Object storage configuration
    pub storage: StorageConfig,
    /// HTTP API listener
    pub server: ServerConfig,
    /// Garbage collector configuration
    pub cleaner: CleanerConfig,
    /// Fan-out pool limits
    pub pool: PoolConfig,
}

impl Configuration {
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::figment(Toml::file("bigbucket.toml"))
            .extract()
            .map_err(Box::new)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, Box<figment::Error>> {
        Self::figment(Toml::file(path)).extract().map_err(Box::new)
    }

    fn figment(file: figment::providers::Data<Toml>) -> Figment {
        Figment::from(Serialized::defaults(Configuration::default()))
            .merge(file)
            .merge(Env::prefixed("BIGBUCKET__").split("__"))
    }
}
