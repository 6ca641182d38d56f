//! Configuration types for deal-importer

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{fmt, net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

/// How the importer finds work each tick
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// Import offline deals that clients already proposed to the deal service
    #[default]
    Default,
    /// Ask the broker for a deal on a dataset, then import it
    PullDataset,
    /// Ask the broker for a deal per local CAR file, then import it
    PullCid,
}

impl Mode {
    /// String form used on the command line and in the ledger's `mode` column
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Default => "default",
            Mode::PullDataset => "pull-dataset",
            Mode::PullCid => "pull-cid",
        }
    }

    /// Whether this mode talks to the dataset broker
    pub fn is_pull(&self) -> bool {
        matches!(self, Mode::PullDataset | Mode::PullCid)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" | "default" => Ok(Mode::Default),
            "pull-dataset" => Ok(Mode::PullDataset),
            "pull-cid" => Ok(Mode::PullCid),
            other => Err(Error::config(
                format!("invalid mode {other:?}: must be default, pull-cid or pull-dataset"),
                "mode",
            )),
        }
    }
}

/// Import loop behaviour (tick interval, ceiling, staging)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Time between import ticks (default: 60 seconds)
    #[serde(default = "default_interval", with = "duration_serde")]
    pub interval: Duration,

    /// Skip the tick while this many deals are in the sealing pipeline (0 = unlimited)
    #[serde(default)]
    pub max_concurrent: usize,

    /// Copy CAR files here before handing them to the deal service
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,

    /// Ask the deal service to delete the file it was given once imported
    #[serde(default)]
    pub delete_after_import: bool,

    /// Reconciler runs every `interval * reconcile_multiplier` (default: 5)
    #[serde(default = "default_reconcile_multiplier")]
    pub reconcile_multiplier: u32,

    /// Deals starting sooner than this cannot finish sealing (default: 4 hours)
    #[serde(default = "default_min_sealing_time", with = "duration_serde")]
    pub min_sealing_time: Duration,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            max_concurrent: 0,
            staging_dir: None,
            delete_after_import: false,
            reconcile_multiplier: default_reconcile_multiplier(),
            min_sealing_time: default_min_sealing_time(),
        }
    }
}

impl ImportConfig {
    /// Interval between reconciliation passes
    pub fn reconcile_interval(&self) -> Duration {
        self.interval * self.reconcile_multiplier
    }
}

/// Connection settings for the deal service (Boost)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DealServiceConfig {
    /// Base URL without port (default: "http://localhost")
    #[serde(default = "default_deal_service_url")]
    pub url: String,

    /// JSON-RPC port (default: 1288)
    #[serde(default = "default_rpc_port")]
    pub rpc_port: u16,

    /// GraphQL port (default: 8080)
    #[serde(default = "default_graphql_port")]
    pub graphql_port: u16,

    /// Bearer token for the JSON-RPC API
    #[serde(default)]
    pub auth_token: String,

    /// Per-request timeout (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,
}

impl Default for DealServiceConfig {
    fn default() -> Self {
        Self {
            url: default_deal_service_url(),
            rpc_port: default_rpc_port(),
            graphql_port: default_graphql_port(),
            auth_token: String::new(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl DealServiceConfig {
    /// GraphQL query endpoint
    pub fn graphql_endpoint(&self) -> String {
        format!(
            "{}:{}/graphql/query",
            self.url.trim_end_matches('/'),
            self.graphql_port
        )
    }

    /// JSON-RPC endpoint
    pub fn rpc_endpoint(&self) -> String {
        format!("{}:{}/rpc/v0", self.url.trim_end_matches('/'), self.rpc_port)
    }
}

/// Self-service deal broker settings, only used by the pull modes
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Broker API base URL
    #[serde(default)]
    pub url: Option<String>,

    /// Value for the `X-DELTA-AUTH` header
    #[serde(default)]
    pub token: Option<String>,

    /// Epochs to push the deal start back by
    #[serde(default)]
    pub delay_start_epoch: u64,

    /// Epochs to pull the deal end forward by
    #[serde(default)]
    pub advance_end_epoch: u64,

    /// Per-request timeout (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: None,
            token: None,
            delay_start_epoch: 0,
            advance_end_epoch: 0,
            request_timeout: default_request_timeout(),
        }
    }
}

/// Polling schedule used while waiting for a requested deal to show up
///
/// Query `n` (starting at 1) is preceded by a sleep of `base_delay * n`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MaterializationConfig {
    /// Number of queries before giving up (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Linear backoff step (default: 10 seconds)
    #[serde(default = "default_base_delay", with = "duration_serde")]
    pub base_delay: Duration,
}

impl Default for MaterializationConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
        }
    }
}

/// Local files: data directory, ledger database and dataset catalog
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Data directory (default: "~/.delta/importer")
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Ledger database file name, relative to `data_dir` (default: "delta-importer.db")
    #[serde(default = "default_database_file")]
    pub database_file: PathBuf,

    /// Dataset catalog file name, relative to `data_dir` (default: "datasets.json")
    #[serde(default = "default_datasets_file")]
    pub datasets_file: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database_file: default_database_file(),
            datasets_file: default_datasets_file(),
        }
    }
}

impl PersistenceConfig {
    /// Data directory with a leading `~` expanded against `$HOME`
    pub fn resolved_data_dir(&self) -> PathBuf {
        expand_home(&self.data_dir)
    }

    /// Full path of the ledger database
    pub fn database_path(&self) -> PathBuf {
        self.resolved_data_dir().join(&self.database_file)
    }

    /// Full path of the dataset catalog
    pub fn datasets_path(&self) -> PathBuf {
        self.resolved_data_dir().join(&self.datasets_file)
    }
}

/// REST API configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Address to bind to (default: 0.0.0.0:1313)
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    /// Enable CORS for browser access (default: true)
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Allowed CORS origins (default: ["*"])
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Enable Swagger UI at /swagger-ui (default: true)
    #[serde(default = "default_true")]
    pub swagger_ui: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            cors_enabled: true,
            cors_origins: default_cors_origins(),
            swagger_ui: true,
        }
    }
}

/// Main configuration for the importer daemon
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Operating mode
    #[serde(default)]
    pub mode: Mode,

    /// Import loop behaviour
    #[serde(default)]
    pub import: ImportConfig,

    /// Deal service connection
    #[serde(default)]
    pub deal_service: DealServiceConfig,

    /// Dataset broker connection
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Wait-for-deal schedule in the pull modes
    #[serde(default)]
    pub materialization: MaterializationConfig,

    /// Data directory layout
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Status API
    #[serde(default)]
    pub api: ApiConfig,
}

impl Config {
    /// Check cross-field constraints before the daemon starts
    pub fn validate(&self) -> Result<()> {
        if self.import.interval.is_zero() {
            return Err(Error::config(
                "interval must be greater than zero",
                "import.interval",
            ));
        }

        if self.import.reconcile_multiplier == 0 {
            return Err(Error::config(
                "reconcile_multiplier must be greater than zero",
                "import.reconcile_multiplier",
            ));
        }

        if self.materialization.max_attempts == 0 {
            return Err(Error::config(
                "max_attempts must be greater than zero",
                "materialization.max_attempts",
            ));
        }

        if self.deal_service.auth_token.is_empty() {
            return Err(Error::config(
                "deal service auth token must be supplied",
                "deal_service.auth_token",
            ));
        }

        if self.mode.is_pull() {
            if is_blank(&self.broker.token) {
                return Err(Error::config(
                    "broker token must be supplied when mode is pull-cid or pull-dataset",
                    "broker.token",
                ));
            }
            if is_blank(&self.broker.url) {
                return Err(Error::config(
                    "broker url must be supplied when mode is pull-cid or pull-dataset",
                    "broker.url",
                ));
            }
        }

        Ok(())
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().is_none_or(|v| v.trim().is_empty())
}

fn expand_home(path: &std::path::Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

fn default_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_reconcile_multiplier() -> u32 {
    5
}

fn default_min_sealing_time() -> Duration {
    Duration::from_secs(4 * 60 * 60)
}

fn default_deal_service_url() -> String {
    "http://localhost".to_string()
}

fn default_rpc_port() -> u16 {
    1288
}

fn default_graphql_port() -> u16 {
    8080
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> Duration {
    Duration::from_secs(10)
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.delta/importer")
}

fn default_database_file() -> PathBuf {
    PathBuf::from("delta-importer.db")
}

fn default_datasets_file() -> PathBuf {
    PathBuf::from("datasets.json")
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 1313))
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_true() -> bool {
    true
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
