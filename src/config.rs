//! Server configuration.
//!
//! Configuration is a JSON file selected by `--config` (or the `CONFIG`
//! environment variable), mapping CAIP-2 chain identifiers to their RPC
//! endpoints. String values may reference environment variables with `$VAR`
//! or `${VAR}` syntax, which keeps endpoints with embedded API keys out of
//! checked-in files:
//!
//! ```json
//! {
//!   "port": 8080,
//!   "chains": {
//!     "aptos:2": { "rpc": "https://fullnode.testnet.aptoslabs.com/v1" },
//!     "eip155:84532": { "rpc": "$BASE_SEPOLIA_RPC_URL" },
//!     "solana:EtWTRABZaYq6iMfeYKouRu166VU2xqa1": { "rpc": "${SOLANA_RPC_URL}" }
//!   }
//! }
//! ```

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::net::IpAddr;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::network::ChainId;

#[derive(Parser, Debug)]
#[command(name = "payrelay")]
#[command(about = "Verify-then-settle facilitator HTTP server")]
struct CliArgs {
    /// Path to the JSON configuration file
    #[arg(long, short, env = "CONFIG", default_value = "config.json")]
    config: PathBuf,
}

/// Top-level server configuration.
///
/// Fields missing from the file fall back to environment variables, then to
/// hardcoded defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "config_defaults::default_port")]
    port: u16,
    #[serde(default = "config_defaults::default_host")]
    host: IpAddr,
    #[serde(default)]
    chains: HashMap<ChainId, ChainEntry>,
}

/// Per-chain configuration. The shape is uniform across chain families; the
/// family is implied by the CAIP-2 key's namespace.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainEntry {
    /// RPC endpoint for this chain. Supports literal URLs or environment
    /// variable references like `"$APTOS_RPC_URL"`.
    pub rpc: LiteralOrEnv<Url>,
    /// Bound on the post-submission confirmation wait.
    #[serde(default = "config_defaults::default_confirmation_timeout_secs")]
    pub confirmation_timeout_secs: u64,
}

impl ChainEntry {
    pub fn rpc(&self) -> &Url {
        self.rpc.inner()
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }
}

pub mod config_defaults {
    use std::env;
    use std::net::IpAddr;

    pub const DEFAULT_PORT: u16 = 8080;
    pub const DEFAULT_HOST: &str = "0.0.0.0";
    pub const DEFAULT_CONFIRMATION_TIMEOUT_SECS: u64 = 60;

    /// Fallback chain: `$PORT` env var, then 8080.
    pub fn default_port() -> u16 {
        env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PORT)
    }

    /// Fallback chain: `$HOST` env var, then `0.0.0.0`.
    pub fn default_host() -> IpAddr {
        env::var("HOST")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(IpAddr::V4([0, 0, 0, 0].into()))
    }

    pub fn default_confirmation_timeout_secs() -> u64 {
        DEFAULT_CONFIRMATION_TIMEOUT_SECS
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: config_defaults::default_port(),
            host: config_defaults::default_host(),
            chains: HashMap::new(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {0}: {1}")]
    FileRead(PathBuf, std::io::Error),
    #[error("Failed to parse config file: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl Config {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn host(&self) -> IpAddr {
        self.host
    }

    /// Configured chains, keyed by CAIP-2 identifier.
    pub fn chains(&self) -> &HashMap<ChainId, ChainEntry> {
        &self.chains
    }

    /// Loads configuration from the path given by `--config` / `CONFIG`.
    pub fn load() -> Result<Self, ConfigError> {
        let cli_args = CliArgs::parse();
        let config_path = Path::new(&cli_args.config)
            .canonicalize()
            .map_err(|e| ConfigError::FileRead(cli_args.config, e))?;
        Self::load_from_path(config_path)
    }

    fn load_from_path(path: PathBuf) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(&path).map_err(|e| ConfigError::FileRead(path, e))?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }
}

/// A transparent wrapper that resolves environment variables during
/// deserialization.
///
/// Accepts a literal value, `$VAR`, or `${VAR}`. A reference to an unset
/// variable is a deserialization error, not a silent empty string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiteralOrEnv<T>(T);

impl<T> LiteralOrEnv<T> {
    pub fn inner(&self) -> &T {
        &self.0
    }

    fn parse_env_var_syntax(s: &str) -> Option<String> {
        if s.starts_with("${") && s.ends_with('}') {
            Some(s[2..s.len() - 1].to_string())
        } else if s.starts_with('$') && s.len() > 1 {
            let var_name = &s[1..];
            if var_name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                Some(var_name.to_string())
            } else {
                None
            }
        } else {
            None
        }
    }
}

impl<T> Deref for LiteralOrEnv<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'de, T> Deserialize<'de> for LiteralOrEnv<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let value = if let Some(var_name) = Self::parse_env_var_syntax(&s) {
            std::env::var(&var_name).map_err(|_| {
                serde::de::Error::custom(format!(
                    "Environment variable '{var_name}' not found (referenced as '{s}')"
                ))
            })?
        } else {
            s
        };
        let parsed = value
            .parse::<T>()
            .map_err(|e| serde::de::Error::custom(format!("Failed to parse value: {e}")))?;
        Ok(LiteralOrEnv(parsed))
    }
}

impl<T> Serialize for LiteralOrEnv<T>
where
    T: Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_full_config() {
        let json = r#"{
            "port": 9090,
            "host": "127.0.0.1",
            "chains": {
                "aptos:2": { "rpc": "https://fullnode.testnet.aptoslabs.com/v1" },
                "eip155:84532": {
                    "rpc": "https://sepolia.base.org",
                    "confirmation_timeout_secs": 20
                }
            }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.port(), 9090);
        assert_eq!(config.host(), "127.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(config.chains().len(), 2);

        let aptos_key: ChainId = "aptos:2".parse().unwrap();
        let aptos = &config.chains()[&aptos_key];
        assert_eq!(
            aptos.rpc().as_str(),
            "https://fullnode.testnet.aptoslabs.com/v1"
        );
        assert_eq!(
            aptos.confirmation_timeout(),
            Duration::from_secs(config_defaults::DEFAULT_CONFIRMATION_TIMEOUT_SECS)
        );

        let base_key: ChainId = "eip155:84532".parse().unwrap();
        let base = &config.chains()[&base_key];
        assert_eq!(base.confirmation_timeout(), Duration::from_secs(20));
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert!(config.chains().is_empty());
        assert_eq!(config.port(), config_defaults::default_port());
    }

    #[test]
    fn resolves_env_var_references() {
        // SAFETY: test-local variable name, no concurrent reader cares.
        unsafe { std::env::set_var("PAYRELAY_TEST_RPC_URL", "http://localhost:8545/") };
        let value: LiteralOrEnv<Url> =
            serde_json::from_str("\"$PAYRELAY_TEST_RPC_URL\"").unwrap();
        assert_eq!(value.inner().as_str(), "http://localhost:8545/");

        let braced: LiteralOrEnv<Url> =
            serde_json::from_str("\"${PAYRELAY_TEST_RPC_URL}\"").unwrap();
        assert_eq!(braced, value);
    }

    #[test]
    fn unset_env_var_reference_is_an_error() {
        let result: Result<LiteralOrEnv<Url>, _> =
            serde_json::from_str("\"$PAYRELAY_TEST_UNSET_VARIABLE\"");
        assert!(result.is_err());
    }

    #[test]
    fn unknown_chain_namespace_fails_parsing() {
        let json = r#"{ "chains": { "cosmos:cosmoshub-4": { "rpc": "http://localhost:1317" } } }"#;
        let result: Result<Config, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }
}
