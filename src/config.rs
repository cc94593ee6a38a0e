use anyhow::{Context, Result};
use ipnet::IpNet;
use serde::Deserialize;
use std::{fs, path::Path};

use crate::{auth::Identity, security::parse_allowlist};

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Deserialize)]
pub struct Config {
    pub listen: ListenConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Deserialize)]
pub struct ListenConfig {
    pub ip: String,
    pub port: u16,
    pub allowed_proxy_ips: Option<Vec<String>>,
    pub tls: Option<TlsConfig>,
}

#[derive(Debug, Deserialize)]
pub struct TlsConfig {
    pub cert_file: String,
    pub key_file: String,
}

#[derive(Debug, Deserialize)]
pub struct AuthConfig {
    /// Client id as a UUID, hyphenated or not.
    pub id: String,
}

impl Config {
    pub fn identity(&self) -> Result<Identity> {
        Identity::parse(&self.auth.id).context("Invalid auth.id in configuration")
    }

    pub fn allowlist(&self) -> Result<Option<Vec<IpNet>>> {
        self.listen
            .allowed_proxy_ips
            .as_deref()
            .map(parse_allowlist)
            .transpose()
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen.ip, self.listen.port)
    }
}

/// Parses and validates configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config as valid TOML")?;
    config.identity()?;
    config.allowlist()?;
    Ok(config)
}

pub fn load_config(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    parse_config(&content).with_context(|| format!("Invalid config file {}", path.display()))
}
