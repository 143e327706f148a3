mod cli;
mod config_file;

use std::path::Path;
use std::time::Duration;

pub use cli::{Cli, Subcommand};
pub use config_file::ConfigFile;

use crate::error::{Error, Result};

#[derive(Clone, Debug)]
pub struct Config {
    pub cli: Cli,
    pub file: ConfigFile,
}

/// Everything the RPC client needs, resolved from the config.
#[derive(Clone, Debug)]
pub struct RpcSettings {
    pub url: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub timeout: Duration,
}

/// Backoff schedule for transient failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): doubles from the initial backoff up to the cap.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Config {
    pub fn new(cli: Cli, file: ConfigFile) -> Self {
        Self { cli, file }
    }

    /// Reads the config file named on the command line, if it exists, then applies
    /// environment overrides.
    pub fn load(cli: Cli, var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut file = read_config_file(&cli.config)?;
        file.apply_env(var);
        let config = Config::new(cli, file);
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.file.rpc.url.is_none() {
            return Err(Error::Config(
                "rpc.url is not set (config file or BITCOIN_RPC_URL)".into(),
            ));
        }
        if self.file.database.url.is_none() {
            return Err(Error::Config(
                "database.url is not set (config file or DATABASE_URL)".into(),
            ));
        }
        if self.file.rpc.user.is_none() && self.file.rpc.password.is_some() {
            return Err(Error::Config("rpc.password is set without rpc.user".into()));
        }
        Ok(())
    }

    pub fn rpc(&self) -> Result<RpcSettings> {
        let rpc = &self.file.rpc;
        let (user, password) = match (&rpc.user, &rpc.cookie) {
            (Some(user), _) => (Some(user.clone()), rpc.password.clone()),
            (None, Some(cookie)) => {
                let (user, password) = read_cookie(cookie)?;
                (Some(user), Some(password))
            }
            (None, None) => (None, None),
        };

        Ok(RpcSettings {
            url: rpc.url.clone().unwrap_or_default(),
            user,
            password,
            timeout: Duration::from_secs(rpc.timeout_secs.unwrap_or(30)),
        })
    }

    pub fn database_url(&self) -> &str {
        self.file.database.url.as_deref().unwrap_or_default()
    }

    pub fn pool_size(&self) -> u32 {
        self.file.database.pool_size.unwrap_or(2).max(1)
    }

    pub fn statement_timeout(&self) -> Duration {
        Duration::from_secs(self.file.database.statement_timeout_secs.unwrap_or(120))
    }

    pub fn start_height(&self) -> u64 {
        self.file.indexer.start_height.unwrap_or(0)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.file.indexer.poll_interval_secs.unwrap_or(30))
    }

    pub fn retry(&self) -> RetryPolicy {
        let retry = &self.file.retry;
        RetryPolicy {
            max_attempts: retry.max_attempts.unwrap_or(10),
            initial_backoff: Duration::from_millis(retry.initial_backoff_ms.unwrap_or(250)),
            max_backoff: Duration::from_millis(retry.max_backoff_ms.unwrap_or(30_000)),
        }
    }

    pub fn log_level(&self) -> &str {
        self.file.log_level.as_deref().unwrap_or("info")
    }
}

fn read_config_file(path: &Path) -> Result<ConfigFile> {
    if !path.is_file() {
        tracing::debug!("Config file {} not found, using environment only.", path.display());
        return Ok(ConfigFile::default());
    }
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
    toml::from_str(&text).map_err(|e| Error::Config(format!("invalid {}: {e}", path.display())))
}

/// bitcoind writes `__cookie__:<random>` to its cookie file.
fn read_cookie(path: &Path) -> Result<(String, String)> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read cookie {}: {e}", path.display())))?;
    text.trim()
        .split_once(':')
        .map(|(user, password)| (user.to_string(), password.to_string()))
        .ok_or_else(|| Error::Config(format!("malformed cookie file {}", path.display())))
}
