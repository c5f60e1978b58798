use anyhow::{Context, Result};
use serde::Deserialize;

/// Process-wide configuration, loaded once from the environment at startup.
///
/// Ingestion subcommands (`worker`, `tail`) require `rpc_url`; subcommands that
/// only read the warehouse (`decode`, `reconcile`, `compact`, `bootstrap`) do not.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub chain: String,
    pub chain_id: u64,
    pub rpc_url: Option<String>,
    pub finality_depth: u64,
    pub warehouse_dir: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawEnv {
    chain: String,
    chain_id: u64,
    rpc_url: String,
    finality_depth: u64,
    warehouse_dir: String,
}

impl Default for RawEnv {
    fn default() -> Self {
        Self {
            chain: DEFAULT_CHAIN.to_string(),
            chain_id: DEFAULT_CHAIN_ID,
            rpc_url: String::new(),
            finality_depth: DEFAULT_FINALITY_DEPTH,
            warehouse_dir: DEFAULT_WAREHOUSE_DIR.to_string(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let raw: RawEnv = envy::from_env().context("load environment config")?;
        let rpc_url = if raw.rpc_url.trim().is_empty() {
            None
        } else {
            Some(raw.rpc_url)
        };

        Ok(Self {
            chain: raw.chain,
            chain_id: raw.chain_id,
            rpc_url,
            finality_depth: raw.finality_depth,
            warehouse_dir: raw.warehouse_dir,
        })
    }

    /// `rpc_url`, or a config-missing error for subcommands that need it.
    pub fn require_rpc_url(&self) -> Result<&str> {
        self.rpc_url
            .as_deref()
            .context("RPC_URL is required for ingestion. Set it in .env or the environment.")
    }
}

const DEFAULT_CHAIN: &str = "ethereum";
const DEFAULT_CHAIN_ID: u64 = 1;
const DEFAULT_FINALITY_DEPTH: u64 = 64;
const DEFAULT_WAREHOUSE_DIR: &str = "warehouse";
