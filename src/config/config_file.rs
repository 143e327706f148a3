use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct RpcConfig {
    pub url: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    /// bitcoind `.cookie` file, used when no user is configured.
    pub cookie: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
}
impl RpcConfig {
    fn example() -> RpcConfig {
        RpcConfig {
            url: Some("http://127.0.0.1:8332".into()),
            user: Some("rpc username".into()),
            password: Some("rpc password".into()),
            cookie: None,
            timeout_secs: Some(30),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub pool_size: Option<u32>,
    pub statement_timeout_secs: Option<u64>,
}
impl DatabaseConfig {
    fn example() -> DatabaseConfig {
        DatabaseConfig {
            url: Some("host=localhost user=postgres password=postgres dbname=bitcoin".into()),
            pool_size: Some(2),
            statement_timeout_secs: Some(120),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct IndexerConfig {
    pub start_height: Option<u64>,
    pub poll_interval_secs: Option<u64>,
}
impl IndexerConfig {
    fn example() -> IndexerConfig {
        IndexerConfig {
            start_height: Some(0),
            poll_interval_secs: Some(30),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct RetryConfig {
    pub max_attempts: Option<u32>,
    pub initial_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
}
impl RetryConfig {
    fn example() -> RetryConfig {
        RetryConfig {
            max_attempts: Some(10),
            initial_backoff_ms: Some(250),
            max_backoff_ms: Some(30_000),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct ConfigFile {
    pub log_level: Option<String>,
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub indexer: IndexerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl ConfigFile {
    pub fn example() -> ConfigFile {
        ConfigFile {
            log_level: Some("info".into()),
            rpc: RpcConfig::example(),
            database: DatabaseConfig::example(),
            indexer: IndexerConfig::example(),
            retry: RetryConfig::example(),
        }
    }

    /// Environment variables override file settings.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var("BITCOIN_RPC_URL") {
            self.rpc.url = Some(url);
        }
        if let Some(user) = var("BITCOIN_RPC_USERNAME") {
            self.rpc.user = Some(user);
        }
        if let Some(password) = var("BITCOIN_RPC_PASSWORD") {
            self.rpc.password = Some(password);
        }
        if let Some(cookie) = var("BITCOIN_RPC_COOKIE") {
            self.rpc.cookie = Some(cookie.into());
        }
        if let Some(url) = var("DATABASE_URL") {
            self.database.url = Some(url);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_roundtrips_through_toml() {
        let example = ConfigFile::example();
        let text = toml::to_string(&example).unwrap();
        let parsed: ConfigFile = toml::from_str(&text).unwrap();
        assert_eq!(parsed, example);
    }

    #[test]
    fn test_sections_are_optional() {
        let parsed: ConfigFile = toml::from_str("[rpc]\nurl = \"http://node:8332\"\n").unwrap();
        assert_eq!(parsed.rpc.url.as_deref(), Some("http://node:8332"));
        assert_eq!(parsed.database, DatabaseConfig::default());
    }

    #[test]
    fn test_env_overrides_file() {
        let mut file = ConfigFile::example();
        file.apply_env(|key| match key {
            "BITCOIN_RPC_URL" => Some("http://other:18332".into()),
            "DATABASE_URL" => Some("postgres://idx@db/bitcoin".into()),
            _ => None,
        });
        assert_eq!(file.rpc.url.as_deref(), Some("http://other:18332"));
        assert_eq!(file.rpc.user.as_deref(), Some("rpc username"));
        assert_eq!(file.database.url.as_deref(), Some("postgres://idx@db/bitcoin"));
    }
}
