//! Controller settings and the benchmark settings handed to every worker
use std::{collections::HashMap, path::PathBuf, time::Duration};

use bon::Builder;
use chrono::NaiveDate;
use envconfig::Envconfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Settings of the controller process, read from `PHONEBILL_*` environment variables
#[derive(Debug, Clone, Envconfig)]
pub struct ControllerConfig {
    /// Port the controller listens on
    #[envconfig(from = "PHONEBILL_LISTEN_PORT", default = "1967")]
    pub listen_port: u16,
    /// Seconds to wait for connections to finish after a shutdown request
    #[envconfig(from = "PHONEBILL_SHUTDOWN_GRACE_SECS", default = "300")]
    pub shutdown_grace_secs: u64,
    /// TOML file with the benchmark settings, defaults are used if unset
    #[envconfig(from = "PHONEBILL_BENCH_CONFIG")]
    pub bench_config: Option<PathBuf>,
    /// Contract records already present in the database under test
    #[envconfig(from = "PHONEBILL_EXISTING_CONTRACTS", default = "0")]
    pub existing_contracts: u64,
}

impl ControllerConfig {
    /// Read the configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self::init_from_env()?)
    }

    /// Read the configuration from a map, unset keys take their defaults
    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        Ok(Self::init_from_hashmap(vars)?)
    }

    /// Grace period for running connections on shutdown
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Load the benchmark settings this controller hands out
    pub fn load_bench_config(&self) -> Result<BenchConfig, ConfigError> {
        match &self.bench_config {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?;
                Ok(toml::from_str(&text)?)
            }
            None => Ok(BenchConfig::default()),
        }
    }
}

/// The online applications a worker may run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OnlineApp {
    /// Updates contract records
    MasterUpdate,
    /// Deletes and re-inserts contract records
    MasterDeleteInsert,
    /// Updates call history records
    HistoryUpdate,
    /// Inserts call history records
    HistoryInsert,
}

impl OnlineApp {
    /// All online applications
    pub const ALL: [OnlineApp; 4] = [
        OnlineApp::MasterUpdate,
        OnlineApp::MasterDeleteInsert,
        OnlineApp::HistoryUpdate,
        OnlineApp::HistoryInsert,
    ];

    /// Name used in status lines
    pub fn name(&self) -> &'static str {
        match self {
            OnlineApp::MasterUpdate => "MasterUpdateApp",
            OnlineApp::MasterDeleteInsert => "MasterDeleteInsertApp",
            OnlineApp::HistoryUpdate => "HistoryUpdateApp",
            OnlineApp::HistoryInsert => "HistoryInsertApp",
        }
    }
}

/// Load settings of one online application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OnlineAppSettings {
    /// Number of concurrent workload instances
    pub threads: u32,
    /// Executions per minute of each instance, 0 disables the app
    pub per_min: u32,
}

/// Benchmark settings, sent to every worker as the reply to its registration.
///
/// On the wire each line of the TOML form is one body line.
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    /// First day of the billed month
    #[builder(default = default_target_month())]
    pub target_month: NaiveDate,
    /// Number of contract records in the test data
    #[builder(default = 1000)]
    pub number_of_contracts_records: u64,
    /// Contracts per block sharing their phone number with another contract
    #[builder(default = 10)]
    pub duplicate_phone_number_rate: u64,
    /// Contracts per block with an expiration date
    #[builder(default = 30)]
    pub expiration_date_rate: u64,
    /// Contracts per block without an expiration date
    #[builder(default = 50)]
    pub no_expiration_date_rate: u64,

    /// Contract updates per minute and thread
    #[builder(default = 0)]
    pub master_update_records_per_min: u32,
    /// Threads updating contracts
    #[builder(default = 1)]
    pub master_update_thread_count: u32,
    /// Contract delete/insert pairs per minute and thread
    #[builder(default = 0)]
    pub master_delete_insert_records_per_min: u32,
    /// Threads deleting and inserting contracts
    #[builder(default = 1)]
    pub master_delete_insert_thread_count: u32,
    /// History updates per minute and thread
    #[builder(default = 0)]
    pub history_update_records_per_min: u32,
    /// Threads updating history
    #[builder(default = 1)]
    pub history_update_thread_count: u32,
    /// History insert transactions per minute and thread
    #[builder(default = 0)]
    pub history_insert_transaction_per_min: u32,
    /// Threads inserting history
    #[builder(default = 1)]
    pub history_insert_thread_count: u32,

    /// Pause between two polls of a worker
    #[builder(default = 5000)]
    pub polling_interval_ms: u64,
    /// Online apps stop on their own after this many seconds, 0 means no limit
    #[builder(default = 0)]
    pub exec_time_limit_secs: u64,
    /// Run the online apps without a billing batch
    #[builder(default = false)]
    pub online_only: bool,
}

fn default_target_month() -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 12, 1).unwrap_or(NaiveDate::MIN)
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl BenchConfig {
    /// Number of contract records in one block
    pub fn contract_block_size(&self) -> u64 {
        self.duplicate_phone_number_rate * 2 + self.expiration_date_rate + self.no_expiration_date_rate
    }

    /// Pause between two polls of a worker
    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }

    /// Time limit of the online apps
    pub fn exec_time_limit(&self) -> Option<Duration> {
        (self.exec_time_limit_secs > 0).then(|| Duration::from_secs(self.exec_time_limit_secs))
    }

    /// Load settings of `app`
    pub fn online_app(&self, app: OnlineApp) -> OnlineAppSettings {
        let (threads, per_min) = match app {
            OnlineApp::MasterUpdate => (
                self.master_update_thread_count,
                self.master_update_records_per_min,
            ),
            OnlineApp::MasterDeleteInsert => (
                self.master_delete_insert_thread_count,
                self.master_delete_insert_records_per_min,
            ),
            OnlineApp::HistoryUpdate => (
                self.history_update_thread_count,
                self.history_update_records_per_min,
            ),
            OnlineApp::HistoryInsert => (
                self.history_insert_thread_count,
                self.history_insert_transaction_per_min,
            ),
        };
        OnlineAppSettings { threads, per_min }
    }

    /// The same settings with no online app threads, used by the batch worker
    pub fn without_online_apps(mut self) -> Self {
        self.master_update_thread_count = 0;
        self.master_delete_insert_thread_count = 0;
        self.history_update_thread_count = 0;
        self.history_insert_thread_count = 0;
        self
    }

    /// Message body carrying these settings
    pub fn to_body(&self) -> Result<Vec<String>, ConfigError> {
        let text = toml::to_string(self)?;
        Ok(text.lines().map(str::to_string).collect())
    }

    /// Parse settings from a message body
    pub fn from_body(body: &[String]) -> Result<Self, ConfigError> {
        Ok(toml::from_str(&body.join("\n"))?)
    }
}

/// Configuration could not be loaded
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable is missing or malformed
    #[error(transparent)]
    Env(#[from] envconfig::Error),
    /// The settings file can not be read
    #[error("Cannot read `{path}`: {source}")]
    Read {
        /// file which was read
        path: PathBuf,
        /// underlying error
        source: std::io::Error,
    },
    /// Settings are not valid TOML
    #[error(transparent)]
    Parse(#[from] toml::de::Error),
    /// Settings can not be written as TOML
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),
}
