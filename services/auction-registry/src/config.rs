//! Service configuration
//!
//! Everything is read from the environment at startup:
//! - `PORT`: HTTP listen port (default 80)
//! - `CA_CERT_PATH` / `CA_KEY_PATH`: PEM root certificate and key
//! - `AUCTION_BASE_PORT`: seller gets base + 1, buyers follow (default 9000)
//! - `KEY_ALGORITHM`: `p256` or `p384`
//! - `CERT_VALIDITY_DAYS`: lifetime of issued certificates (default 3650)
//! - `SIGNING_TIMEOUT_MS`: upper bound on a single CA signature
//! - `DUPLICATE_REGISTRATION`: `allow` or `reject`
//! - `TRUST_FORWARDED_FOR`: take the caller address from `X-Forwarded-For`
//! - `CERT_ORGANIZATION`, `CERT_ORGANIZATIONAL_UNIT`, `CERT_COUNTRY`

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use auction::{DuplicatePolicy, IssuerConfig, KeyAlgorithm, RegistryConfig, SubjectTemplate};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub port: u16,
    pub ca_cert_path: PathBuf,
    pub ca_key_path: PathBuf,
    pub validity_days: u32,
    pub trust_forwarded_for: bool,
    pub registry: RegistryConfig,
    pub issuer: IssuerConfig,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source. Unset and empty values take defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let defaults = SubjectTemplate::default();
        let subject = SubjectTemplate {
            organization: var("CERT_ORGANIZATION").unwrap_or(defaults.organization),
            organizational_unit: var("CERT_ORGANIZATIONAL_UNIT")
                .unwrap_or(defaults.organizational_unit),
            country: var("CERT_COUNTRY").or(defaults.country),
        };

        let signing_timeout_ms: u64 = parse(var("SIGNING_TIMEOUT_MS"), "SIGNING_TIMEOUT_MS", 10_000)?;
        if signing_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                name: "SIGNING_TIMEOUT_MS",
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            port: parse(var("PORT"), "PORT", 80)?,
            ca_cert_path: var("CA_CERT_PATH")
                .unwrap_or_else(|| "certs/ca.cert".to_string())
                .into(),
            ca_key_path: var("CA_KEY_PATH")
                .unwrap_or_else(|| "certs/ca.key".to_string())
                .into(),
            validity_days: parse(var("CERT_VALIDITY_DAYS"), "CERT_VALIDITY_DAYS", 3650)?,
            trust_forwarded_for: parse_bool(var("TRUST_FORWARDED_FOR"), "TRUST_FORWARDED_FOR")?,
            registry: RegistryConfig {
                base_port: parse(
                    var("AUCTION_BASE_PORT"),
                    "AUCTION_BASE_PORT",
                    auction::registry::DEFAULT_BASE_PORT,
                )?,
                duplicate_policy: parse(
                    var("DUPLICATE_REGISTRATION"),
                    "DUPLICATE_REGISTRATION",
                    DuplicatePolicy::default(),
                )?,
            },
            issuer: IssuerConfig {
                key_algorithm: parse(var("KEY_ALGORITHM"), "KEY_ALGORITHM", KeyAlgorithm::default())?,
                signing_timeout: Duration::from_millis(signing_timeout_ms),
                subject,
            },
        })
    }
}

fn parse<T>(value: Option<String>, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn parse_bool(value: Option<String>, name: &'static str) -> Result<bool, ConfigError> {
    match value.as_deref().map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(false),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            _ => Err(ConfigError::Invalid {
                name,
                reason: format!("expected a boolean, got '{}'", v),
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<ServiceConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServiceConfig::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.port, 80);
        assert_eq!(config.registry.base_port, 9000);
        assert_eq!(config.registry.duplicate_policy, DuplicatePolicy::Allow);
        assert_eq!(config.issuer.key_algorithm, KeyAlgorithm::EcdsaP256);
        assert_eq!(config.issuer.signing_timeout, Duration::from_secs(10));
        assert_eq!(config.validity_days, 3650);
        assert_eq!(config.ca_cert_path, PathBuf::from("certs/ca.cert"));
        assert!(!config.trust_forwarded_for);
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("PORT", "5000"),
            ("AUCTION_BASE_PORT", "7000"),
            ("DUPLICATE_REGISTRATION", "reject"),
            ("KEY_ALGORITHM", "p384"),
            ("SIGNING_TIMEOUT_MS", "1500"),
            ("TRUST_FORWARDED_FOR", "true"),
            ("CERT_COUNTRY", "US"),
        ])
        .unwrap();

        assert_eq!(config.port, 5000);
        assert_eq!(config.registry.base_port, 7000);
        assert_eq!(config.registry.duplicate_policy, DuplicatePolicy::Reject);
        assert_eq!(config.issuer.key_algorithm, KeyAlgorithm::EcdsaP384);
        assert_eq!(config.issuer.signing_timeout, Duration::from_millis(1500));
        assert!(config.trust_forwarded_for);
        assert_eq!(config.issuer.subject.country.as_deref(), Some("US"));
    }

    #[test]
    fn test_empty_values_use_defaults() {
        let config = config_from(&[("PORT", ""), ("CERT_ORGANIZATION", "  ")]).unwrap();
        assert_eq!(config.port, 80);
        assert_eq!(config.issuer.subject.organization, "Auction Registry");
    }

    #[test]
    fn test_invalid_values() {
        for (name, value) in [
            ("PORT", "eighty"),
            ("AUCTION_BASE_PORT", "70000"),
            ("KEY_ALGORITHM", "rsa"),
            ("DUPLICATE_REGISTRATION", "sometimes"),
            ("TRUST_FORWARDED_FOR", "maybe"),
            ("SIGNING_TIMEOUT_MS", "0"),
        ] {
            let err = config_from(&[(name, value)]).unwrap_err();
            assert!(err.to_string().contains(name), "{}", err);
        }
    }
}
