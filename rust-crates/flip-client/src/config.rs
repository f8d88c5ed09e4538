use crate::{
    accounts::Asset,
    error::{
        FlipError,
        Result,
    },
};
use rust_decimal::Decimal;
use serde::{
    Deserialize,
    Serialize,
};
use solana_sdk::pubkey::Pubkey;
use std::{
    fmt,
    fs,
    path::Path,
    str::FromStr,
    time::Duration,
};

pub const DEFAULT_MAINNET_RPC_URLS: [&str; 2] = [
    "https://api.mainnet-beta.solana.com",
    "https://solana-rpc.publicnode.com",
];
pub const DEFAULT_DEVNET_RPC_URLS: [&str; 1] = ["https://api.devnet.solana.com"];
pub const DEFAULT_LOCAL_RPC_URLS: [&str; 1] = ["http://127.0.0.1:8899"];

/// Environment variable consulted for an endpoint that is tried before the
/// built-in list.
pub const RPC_URL_ENV: &str = "FLIP_RPC_URL";

pub const DEFAULT_PROGRAM_ID: &str = "Fg7VmsCYRxb3zfJSpJwtCkb3dQaQv8qR4pR5m4g1Kjv";
pub const DEFAULT_VAULT_WALLET: &str = "7wkDoaFHXgmFjpKMSZZL7mg3c8bHLErSQ6QwhcDTXU8R";
pub const DEFAULT_MAINNET_MINT: &str = "88KKUzT9B5sHRopVgRNn3VEfKh7g4ykLXqqjPT7Hpump";
pub const DEFAULT_DEVNET_MINT: &str = "6iM7CJcaWNDEueWzAj3HDZqydH8NMc147Dw1pZPvcAw4";
pub const DEFAULT_DECIMALS: u8 = 9;

const DEFAULT_SETTLE_DELAY_MS: u64 = 2_000;
const DEFAULT_CONFIRM_POLL_MS: u64 = 500;
const DEFAULT_CONFIRM_ATTEMPTS: u32 = 60;
const DEFAULT_RECORD_ATTEMPTS: u32 = 5;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 15_000;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkProfile {
    Mainnet,
    Devnet,
    Local,
}

impl NetworkProfile {
    pub fn default_endpoints(self) -> Vec<String> {
        let urls: &[&str] = match self {
            NetworkProfile::Mainnet => &DEFAULT_MAINNET_RPC_URLS,
            NetworkProfile::Devnet => &DEFAULT_DEVNET_RPC_URLS,
            NetworkProfile::Local => &DEFAULT_LOCAL_RPC_URLS,
        };
        urls.iter().map(|url| url.to_string()).collect()
    }

    pub fn default_mint(self) -> &'static str {
        match self {
            NetworkProfile::Mainnet => DEFAULT_MAINNET_MINT,
            NetworkProfile::Devnet | NetworkProfile::Local => DEFAULT_DEVNET_MINT,
        }
    }
}

impl fmt::Display for NetworkProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NetworkProfile::Mainnet => "Mainnet",
            NetworkProfile::Devnet => "Devnet",
            NetworkProfile::Local => "Local",
        };
        write!(f, "{name}")
    }
}

/// Everything a session needs to talk to one deployment of the flip program.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientConfig {
    pub network: NetworkProfile,
    pub endpoints: Vec<String>,
    #[serde(with = "base58")]
    pub program_id: Pubkey,
    #[serde(with = "base58")]
    pub mint: Pubkey,
    #[serde(with = "base58")]
    pub vault_wallet: Pubkey,
    #[serde(default = "default_decimals")]
    pub decimals: u8,
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Fraction of the wager a balance may exceed the expected-if-lost value
    /// by before the delta is read as a win.
    #[serde(default = "default_tolerance_fraction")]
    pub tolerance_fraction: Decimal,
    #[serde(default = "default_confirm_poll_ms")]
    pub confirm_poll_ms: u64,
    #[serde(default = "default_confirm_attempts")]
    pub confirm_attempts: u32,
    #[serde(default = "default_record_attempts")]
    pub record_attempts: u32,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl ClientConfig {
    pub fn new(
        network: NetworkProfile,
        program_id: Pubkey,
        mint: Pubkey,
        vault_wallet: Pubkey,
    ) -> Self {
        Self {
            network,
            endpoints: network.default_endpoints(),
            program_id,
            mint,
            vault_wallet,
            decimals: DEFAULT_DECIMALS,
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
            tolerance_fraction: default_tolerance_fraction(),
            confirm_poll_ms: DEFAULT_CONFIRM_POLL_MS,
            confirm_attempts: DEFAULT_CONFIRM_ATTEMPTS,
            record_attempts: DEFAULT_RECORD_ATTEMPTS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }

    /// Built-in program, vault and mint for `network`.
    pub fn for_network(network: NetworkProfile) -> Result<Self> {
        Ok(Self::new(
            network,
            parse_pubkey(DEFAULT_PROGRAM_ID)?,
            parse_pubkey(network.default_mint())?,
            parse_pubkey(DEFAULT_VAULT_WALLET)?,
        ))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read(path).map_err(|e| {
            FlipError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let config: ClientConfig = serde_json::from_slice(&data).map_err(|e| {
            FlipError::Config(format!("failed to parse {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Puts `url` at the front of the candidate list. The built-in endpoints
    /// stay behind it as fallbacks.
    pub fn with_endpoint_override(mut self, url: Option<String>) -> Self {
        if let Some(url) = url.map(|u| u.trim().to_string()).filter(|u| !u.is_empty()) {
            self.endpoints.retain(|existing| existing != &url);
            self.endpoints.insert(0, url);
        }
        self
    }

    pub fn endpoint_override_from_env() -> Option<String> {
        std::env::var(RPC_URL_ENV).ok()
    }

    pub fn validate(&self) -> Result<()> {
        if self.endpoints.is_empty() {
            return Err(FlipError::Config("no RPC endpoints configured".into()));
        }
        if self.tolerance_fraction <= Decimal::ZERO || self.tolerance_fraction > Decimal::ONE {
            return Err(FlipError::Config(format!(
                "tolerance fraction must be in (0, 1], got {}",
                self.tolerance_fraction
            )));
        }
        if self.confirm_attempts == 0 {
            return Err(FlipError::Config("confirm_attempts must be positive".into()));
        }
        Ok(())
    }

    pub fn asset(&self) -> Asset {
        Asset {
            mint: self.mint,
            decimals: self.decimals,
        }
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn confirm_poll_interval(&self) -> Duration {
        Duration::from_millis(self.confirm_poll_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

pub fn parse_pubkey(raw: &str) -> Result<Pubkey> {
    let trimmed = raw.trim();
    Pubkey::from_str(trimmed).map_err(|_| FlipError::InvalidAddress(trimmed.to_string()))
}

/// Addresses in config files are base58 strings, not byte arrays.
mod base58 {
    use super::parse_pubkey;
    use serde::{
        Deserialize,
        Deserializer,
        Serializer,
    };
    use solana_sdk::pubkey::Pubkey;

    pub fn serialize<S: Serializer>(key: &Pubkey, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(key)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Pubkey, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_pubkey(&raw).map_err(serde::de::Error::custom)
    }
}

fn default_decimals() -> u8 {
    DEFAULT_DECIMALS
}

fn default_settle_delay_ms() -> u64 {
    DEFAULT_SETTLE_DELAY_MS
}

fn default_tolerance_fraction() -> Decimal {
    Decimal::new(7, 1)
}

fn default_confirm_poll_ms() -> u64 {
    DEFAULT_CONFIRM_POLL_MS
}

fn default_confirm_attempts() -> u32 {
    DEFAULT_CONFIRM_ATTEMPTS
}

fn default_record_attempts() -> u32 {
    DEFAULT_RECORD_ATTEMPTS
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;
    use tempdir::TempDir;

    #[test]
    fn with_endpoint_override__tries_override_first_and_keeps_defaults() {
        // given
        let config = ClientConfig::for_network(NetworkProfile::Mainnet).unwrap();

        // when
        let config = config
            .with_endpoint_override(Some(DEFAULT_MAINNET_RPC_URLS[1].to_string()));

        // then
        assert_eq!(
            config.endpoints,
            vec![
                DEFAULT_MAINNET_RPC_URLS[1].to_string(),
                DEFAULT_MAINNET_RPC_URLS[0].to_string(),
            ]
        );
    }

    #[test]
    fn with_endpoint_override__ignores_blank_override() {
        let config = ClientConfig::for_network(NetworkProfile::Devnet)
            .unwrap()
            .with_endpoint_override(Some("  ".to_string()));
        assert_eq!(config.endpoints, NetworkProfile::Devnet.default_endpoints());
    }

    #[test]
    fn validate__rejects_out_of_range_tolerance() {
        let mut config = ClientConfig::for_network(NetworkProfile::Local).unwrap();
        config.tolerance_fraction = dec!(1.5);
        assert!(matches!(config.validate(), Err(FlipError::Config(_))));
    }

    #[test]
    fn from_json_file__fills_defaults_for_missing_tuning_fields() {
        // given
        let dir = TempDir::new("flip-config").unwrap();
        let path = dir.path().join("client.json");
        let mut file = fs::File::create(&path).unwrap();
        write!(
            file,
            r#"{{
                "network": "devnet",
                "endpoints": ["http://localhost:8899"],
                "program_id": "{DEFAULT_PROGRAM_ID}",
                "mint": "{DEFAULT_DEVNET_MINT}",
                "vault_wallet": "{DEFAULT_VAULT_WALLET}"
            }}"#
        )
        .unwrap();

        // when
        let config = ClientConfig::from_json_file(&path).unwrap();

        // then
        assert_eq!(config.network, NetworkProfile::Devnet);
        assert_eq!(config.decimals, DEFAULT_DECIMALS);
        assert_eq!(config.tolerance_fraction, dec!(0.7));
        assert_eq!(config.settle_delay(), Duration::from_millis(2_000));
        assert_eq!(config.program_id.to_string(), DEFAULT_PROGRAM_ID);
    }

    #[test]
    fn serialize__writes_addresses_as_base58() {
        let config = ClientConfig::for_network(NetworkProfile::Mainnet).unwrap();
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["mint"], DEFAULT_MAINNET_MINT);
        let back: ClientConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back.vault_wallet, config.vault_wallet);
    }

    #[test]
    fn parse_pubkey__rejects_garbage() {
        assert!(matches!(parse_pubkey("abc"), Err(FlipError::InvalidAddress(_))));
    }
}
