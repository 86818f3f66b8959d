use anyhow::Context;
use config::{Config, Environment, File};
use dotenv::dotenv;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::lifecycle::{FeeSchedule, DEFAULT_FEE_BPS};

/// Loads configuration from a given config file or environment variables.
pub fn load_config(config_file_path: Option<&Path>) -> anyhow::Result<AppConfig> {
    // Load .env file if it exists, ignore if not present
    dotenv().ok();

    let mut settings = Config::builder();

    if let Some(path) = config_file_path {
        settings = settings.add_source(File::from(path).required(true));
    }

    // e.g. STACKYIELD__FEES__BPS=25
    settings = settings.add_source(
        Environment::with_prefix("STACKYIELD")
            .separator("__")
            .try_parsing(true),
    );

    let app_config = settings.build()?.try_deserialize::<AppConfig>()?;
    app_config.validate()?;

    Ok(app_config)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub ethereum: EthereumConfig,
    pub stacks: StacksConfig,
    #[serde(default)]
    pub fees: FeeConfig,
    #[serde(default)]
    pub ingestor: IngestorConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        self.fees.schedule()?;
        if self.ingestor.initial_window == 0 {
            anyhow::bail!("ingestor.initial_window must be at least 1 block");
        }
        Url::parse(&self.stacks.api_url)
            .with_context(|| format!("invalid stacks.api_url: {}", self.stacks.api_url))?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn get_db_url(&self) -> anyhow::Result<String> {
        std::env::var("DATABASE_URL").context("DATABASE_URL is not set in environment or .env file")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthereumConfig {
    pub chain_id: u64,
    /// Deposit gateway contract emitting `DepositReceived`.
    pub gateway_address: String,
}

impl EthereumConfig {
    pub fn get_rpc_url(&self) -> anyhow::Result<String> {
        std::env::var("ETHEREUM_RPC_URL")
            .context("ETHEREUM_RPC_URL is not set in environment or .env file")
    }

    /// Admin key allowed to call `markDepositBridged` and `adminWithdraw`.
    pub fn get_private_key(&self) -> anyhow::Result<String> {
        std::env::var("ETHEREUM_PRIVATE_KEY")
            .context("ETHEREUM_PRIVATE_KEY is not set in environment or .env file")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StacksConfig {
    /// Stacks node / API base url, e.g. `https://api.testnet.hiro.so`.
    pub api_url: String,
    /// "mainnet" or "testnet"
    pub network: String,
    pub contract_address: String,
    #[serde(default = "default_contract_name")]
    pub contract_name: String,
    #[serde(default = "default_stake_function")]
    pub stake_function: String,
    #[serde(default = "default_unstake_function")]
    pub unstake_function: String,
    /// Address matching STACKS_PRIVATE_KEY; pays fees and signs contract calls.
    pub sender_address: String,
    #[serde(default = "default_stacks_fee")]
    pub fee_micro_stx: u64,
}

impl StacksConfig {
    pub fn get_private_key(&self) -> anyhow::Result<String> {
        std::env::var("STACKS_PRIVATE_KEY")
            .context("STACKS_PRIVATE_KEY is not set in environment or .env file")
    }
}

fn default_contract_name() -> String {
    "stacking-pool".to_string()
}

fn default_stake_function() -> String {
    "stack-for-user".to_string()
}

fn default_unstake_function() -> String {
    "withdraw".to_string()
}

fn default_stacks_fee() -> u64 {
    5_000
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeConfig {
    pub bps: u32,
}

impl FeeConfig {
    pub fn schedule(&self) -> anyhow::Result<FeeSchedule> {
        FeeSchedule::new(self.bps).context("invalid fees.bps")
    }
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            bps: DEFAULT_FEE_BPS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestorConfig {
    /// Blocks re-scanned behind the cursor to tolerate shallow reorgs.
    pub overlap_blocks: u64,
    /// How far back the very first scan reaches when no cursor exists.
    pub initial_window: u64,
    pub poll_interval_secs: u64,
    /// Keep a live log subscription open in addition to polling.
    pub subscribe: bool,
    pub resubscribe_delay_secs: u64,
}

impl IngestorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn resubscribe_delay(&self) -> Duration {
        Duration::from_secs(self.resubscribe_delay_secs)
    }
}

impl Default for IngestorConfig {
    fn default() -> Self {
        Self {
            overlap_blocks: 5,
            initial_window: 1_000,
            poll_interval_secs: 60,
            subscribe: true,
            resubscribe_delay_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    pub bridge_interval_secs: u64,
    pub withdrawal_interval_secs: u64,
    /// Run the reconciliation sweep once before the schedulers start.
    pub reconcile_on_startup: bool,
}

impl JobsConfig {
    pub fn bridge_interval(&self) -> Duration {
        Duration::from_secs(self.bridge_interval_secs)
    }

    pub fn withdrawal_interval(&self) -> Duration {
        Duration::from_secs(self.withdrawal_interval_secs)
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            bridge_interval_secs: 60,
            withdrawal_interval_secs: 60,
            reconcile_on_startup: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String, // "debug" | "info" | "warn" | "error"
    pub format: String, // "pretty" | "json"
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}
