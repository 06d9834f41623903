// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@mitander.dev>

use crate::common::data_path::resolve_data_dir;
use crate::domain::constants;
use crate::domain::error::AppError;
use alloy::primitives::Address;
use config::{Config, Environment, File};
use serde::{Deserialize, Deserializer};
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct GlobalSettings {
    // General
    #[serde(default = "default_debug")]
    pub debug: bool,
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    pub data_dir: Option<String>,

    // Endpoints
    #[serde(deserialize_with = "deserialize_url_list")]
    pub rpc_urls: Vec<String>,
    pub relay_url: Option<String>,

    // Identity
    pub private_key: String,
    pub mirror_private_key: String,
    pub wallet_address: Address,

    // Contracts
    pub dmap_address: Address,
    pub vault_address: Address,
    pub target_contract_address: Option<Address>,
    pub honeypot_address: Option<Address>,

    // Emission
    #[serde(default = "default_detect_interval_ms")]
    pub detect_interval_ms: u64,
    #[serde(default = "default_category_id")]
    pub category_id: u64,

    // Amplification
    #[serde(default = "default_max_gas_gwei")]
    pub max_gas_gwei: u64,

    // Side-channel
    #[serde(default = "default_false")]
    pub enable_echo: bool,
    #[serde(default)]
    pub echo_endpoints: Vec<String>,

    // Observability
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

// Defaults
fn default_debug() -> bool {
    false
}
fn default_false() -> bool {
    false
}
fn default_chain_id() -> u64 {
    constants::CHAIN_BASE
}
fn default_detect_interval_ms() -> u64 {
    540_000
}
fn default_category_id() -> u64 {
    1
}
fn default_max_gas_gwei() -> u64 {
    50
}
fn default_metrics_port() -> u16 {
    9000
}

/// Accept `rpc_urls` as either a list or a comma-separated string.
fn deserialize_url_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        List(Vec<String>),
        Csv(String),
    }
    let raw = Raw::deserialize(deserializer)?;
    let urls = match raw {
        Raw::List(v) => v,
        Raw::Csv(s) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect(),
    };
    Ok(urls)
}

impl GlobalSettings {
    pub fn load_with_path(path: Option<&str>) -> Result<Self, AppError> {
        let mut builder = Config::builder();
        builder = match path {
            Some(p) => builder.add_source(File::with_name(p)),
            None => builder.add_source(File::with_name("config").required(false)),
        };
        let settings: GlobalSettings = builder
            .add_source(Environment::default())
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.rpc_urls.is_empty() {
            return Err(AppError::Config("rpc_urls must not be empty".into()));
        }
        for raw in &self.rpc_urls {
            url::Url::parse(raw)
                .map_err(|e| AppError::Config(format!("Invalid RPC URL {raw}: {e}")))?;
        }
        if self.private_key.trim().is_empty() || self.mirror_private_key.trim().is_empty() {
            return Err(AppError::Config(
                "private_key and mirror_private_key are required".into(),
            ));
        }
        Ok(())
    }

    pub fn data_dir(&self) -> PathBuf {
        resolve_data_dir(self.data_dir.as_deref())
    }

    pub fn relay_url(&self) -> Result<String, AppError> {
        self.relay_url
            .clone()
            .ok_or_else(|| AppError::Config("relay_url is required for amplification".into()))
    }

    pub fn detect_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.detect_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_settings_json() -> serde_json::Value {
        serde_json::json!({
            "rpc_urls": "https://one.example/rpc, https://two.example/rpc",
            "private_key": "0x01",
            "mirror_private_key": "0x02",
            "wallet_address": "0x1111111111111111111111111111111111111111",
            "dmap_address": "0x2222222222222222222222222222222222222222",
            "vault_address": "0x3333333333333333333333333333333333333333",
        })
    }

    #[test]
    fn csv_rpc_urls_are_split() {
        let settings: GlobalSettings = serde_json::from_value(base_settings_json()).unwrap();
        assert_eq!(settings.rpc_urls.len(), 2);
        assert_eq!(settings.rpc_urls[1], "https://two.example/rpc");
    }

    #[test]
    fn defaults_applied() {
        let settings: GlobalSettings = serde_json::from_value(base_settings_json()).unwrap();
        assert_eq!(settings.detect_interval_ms, 540_000);
        assert_eq!(settings.chain_id, constants::CHAIN_BASE);
        assert!(!settings.enable_echo);
    }

    #[test]
    fn relay_url_required_for_amplify() {
        let settings: GlobalSettings = serde_json::from_value(base_settings_json()).unwrap();
        assert!(settings.relay_url().is_err());
    }
}
