use anyhow::{Context, Result, bail};
use serde_derive::Deserialize;
use serde_inline_default::serde_inline_default;
use std::env;
use std::fs;
use std::path::Path;

const DEFAULT_HOSTNAME: &str = "localhost";
const DEFAULT_SERVER_PORT: u16 = 9090;
const DEFAULT_RPC_PORT: u16 = 9091;
const DEFAULT_DSN: &str = "sqlite://csp.db?mode=rwc";

#[serde_inline_default]
#[derive(Debug, Default, Deserialize, Eq, PartialEq, Clone)]
pub struct Config {
    #[serde_inline_default(false)]
    pub debug: bool,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub rpc: RpcConfig,

    #[serde(default)]
    pub db: DbConfig,
}

/// Where the report endpoint listens.
#[serde_inline_default]
#[derive(Debug, Deserialize, Eq, PartialEq, Clone)]
pub struct ServerConfig {
    #[serde_inline_default(DEFAULT_HOSTNAME.to_string())]
    pub hostname: String,

    #[serde_inline_default(DEFAULT_SERVER_PORT)]
    pub port: u16,
}

/// Where the storage service listens, and where the collector sends to.
#[serde_inline_default]
#[derive(Debug, Deserialize, Eq, PartialEq, Clone)]
pub struct RpcConfig {
    #[serde_inline_default(DEFAULT_HOSTNAME.to_string())]
    pub hostname: String,

    #[serde_inline_default(DEFAULT_RPC_PORT)]
    pub port: u16,
}

#[serde_inline_default]
#[derive(Debug, Deserialize, Eq, PartialEq, Clone)]
pub struct DbConfig {
    #[serde_inline_default(DEFAULT_DSN.to_string())]
    pub dsn: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            hostname: DEFAULT_HOSTNAME.to_string(),
            port: DEFAULT_SERVER_PORT,
        }
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        RpcConfig {
            hostname: DEFAULT_HOSTNAME.to_string(),
            port: DEFAULT_RPC_PORT,
        }
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        DbConfig {
            dsn: DEFAULT_DSN.to_string(),
        }
    }
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}

impl RpcConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.address())
    }
}

impl Config {
    /// File named by `CSP_CONFIG` if set, then environment overrides. A
    /// `.env` file in the working directory is read first.
    pub fn from_env() -> Result<Config> {
        dotenv::dotenv().ok();

        let mut config = match env::var("CSP_CONFIG") {
            Ok(path) => load(&path).with_context(|| format!("failed to load config {path}"))?,
            Err(_) => Config::default(),
        };
        config.apply_env(|key| env::var(key).ok())?;
        Ok(config)
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(value) = var("DEBUG") {
            self.debug = parse_bool("DEBUG", &value)?;
        }
        if let Some(value) = var("SERVER_HOSTNAME") {
            self.server.hostname = value;
        }
        if let Some(value) = var("SERVER_PORT") {
            self.server.port = parse_port("SERVER_PORT", &value)?;
        }
        if let Some(value) = var("GRPC_HOSTNAME") {
            self.rpc.hostname = value;
        }
        if let Some(value) = var("GRPC_PORT") {
            self.rpc.port = parse_port("GRPC_PORT", &value)?;
        }
        if let Some(value) = var("DB_DSN") {
            self.db.dsn = value;
        }
        Ok(())
    }
}

pub fn load(path: impl AsRef<Path>) -> Result<Config> {
    let content = fs::read_to_string(path)?;
    let res = toml::from_str(&content)?;
    Ok(res)
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
        _ => bail!("{key}: invalid boolean {value:?}"),
    }
}

fn parse_port(key: &str, value: &str) -> Result<u16> {
    value
        .parse()
        .with_context(|| format!("{key}: invalid port {value:?}"))
}
