//! Environment-driven configuration.
//!
//! | Variable                 | Default            | Meaning                          |
//! |--------------------------|--------------------|----------------------------------|
//! | `AETHER_ENABLED`         | `true`             | attach the XDP filter at all     |
//! | `AETHER_INTERFACE`       | default route      | interface to attach to           |
//! | `AETHER_XDP_MODE`        | `skb`              | `skb`, `drv` or `hw`             |
//! | `AETHER_EBPF_OBJECT`     | none               | compiled XDP object file         |
//! | `AETHER_KNOCK`           | `0xDEADBEEF`       | knock value, hex                 |
//! | `AETHER_PIN_PATH`        | `/sys/fs/bpf/aether` | bpffs dir XSKS_MAP is pinned in |
//! | `AETHER_WORKER_THREADS`  | available cores    | tokio worker threads             |

use std::env;
use std::path::PathBuf;

use aether_common::Knock;
use thiserror::Error;

use crate::ebpf::{EbpfConfig, XdpMode};
use crate::runtime::RuntimeConfig;

/// Environment variable toggling the XDP filter
pub const ENV_ENABLED: &str = "AETHER_ENABLED";

/// Environment variable for the interface name
pub const ENV_INTERFACE: &str = "AETHER_INTERFACE";

/// Environment variable for the XDP attach mode
pub const ENV_XDP_MODE: &str = "AETHER_XDP_MODE";

/// Environment variable for the compiled eBPF object path
pub const ENV_EBPF_OBJECT: &str = "AETHER_EBPF_OBJECT";

/// Environment variable for the knock value
pub const ENV_KNOCK: &str = "AETHER_KNOCK";

/// Environment variable for the bpffs pin directory
pub const ENV_PIN_PATH: &str = "AETHER_PIN_PATH";

/// Environment variable for worker threads
pub const ENV_WORKER_THREADS: &str = "AETHER_WORKER_THREADS";

/// Invalid configuration values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid knock value {0:?}: expected up to 8 hex digits")]
    InvalidKnock(String),

    #[error("invalid XDP mode {0:?}: expected skb, drv or hw")]
    InvalidXdpMode(String),

    #[error("invalid boolean {value:?} for {var}")]
    InvalidBool { var: &'static str, value: String },

    #[error("invalid worker thread count {0:?}")]
    InvalidWorkerThreads(String),
}

/// Complete daemon configuration.
#[derive(Debug, Clone, Default)]
pub struct AetherConfig {
    /// Loader settings
    pub ebpf: EbpfConfig,
    /// Runtime settings
    pub runtime: RuntimeConfig,
}

impl AetherConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Read configuration through `lookup`, applying defaults for unset keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_ENABLED) {
            config.ebpf.enabled = parse_bool(ENV_ENABLED, &value)?;
        }

        config.ebpf.interface = lookup(ENV_INTERFACE).filter(|s| !s.is_empty());
        config.ebpf.ebpf_object_path = lookup(ENV_EBPF_OBJECT).filter(|s| !s.is_empty());

        if let Some(value) = lookup(ENV_XDP_MODE) {
            config.ebpf.xdp_mode = value
                .parse::<XdpMode>()
                .map_err(ConfigError::InvalidXdpMode)?;
        }

        if let Some(value) = lookup(ENV_KNOCK) {
            config.ebpf.knock = parse_knock(&value)?;
        }

        if let Some(value) = lookup(ENV_PIN_PATH).filter(|s| !s.is_empty()) {
            config.ebpf.pin_path = PathBuf::from(value);
        }

        if let Some(value) = lookup(ENV_WORKER_THREADS) {
            config.runtime.worker_threads = match value.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => return Err(ConfigError::InvalidWorkerThreads(value)),
            };
        }

        Ok(config)
    }
}

/// Parse a knock written as hex, with or without a `0x` prefix.
///
/// Digits are read most significant first, so `"DEADBEEF"` is the knock
/// carried on the wire as `DE AD BE EF`.
pub fn parse_knock(value: &str) -> Result<Knock, ConfigError> {
    let trimmed = value.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed)
        .replace('_', "");

    if digits.is_empty() || digits.len() > 8 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ConfigError::InvalidKnock(value.to_string()));
    }

    u32::from_str_radix(&digits, 16)
        .map(Knock::new)
        .map_err(|_| ConfigError::InvalidKnock(value.to_string()))
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            var,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AetherConfig::from_lookup(lookup(&[])).unwrap();
        assert!(config.ebpf.enabled);
        assert_eq!(config.ebpf.interface, None);
        assert_eq!(config.ebpf.xdp_mode, XdpMode::Skb);
        assert_eq!(config.ebpf.ebpf_object_path, None);
        assert_eq!(config.ebpf.knock, Knock::DEFAULT);
        assert_eq!(config.ebpf.pin_path, PathBuf::from("/sys/fs/bpf/aether"));
        assert!(config.runtime.worker_threads >= 1);
    }

    #[test]
    fn test_all_variables() {
        let config = AetherConfig::from_lookup(lookup(&[
            (ENV_ENABLED, "off"),
            (ENV_INTERFACE, "ens5"),
            (ENV_XDP_MODE, "drv"),
            (ENV_EBPF_OBJECT, "/opt/aether/aether-ebpf"),
            (ENV_KNOCK, "0xCAFEBABE"),
            (ENV_PIN_PATH, "/run/aether/bpf"),
            (ENV_WORKER_THREADS, "2"),
        ]))
        .unwrap();

        assert!(!config.ebpf.enabled);
        assert_eq!(config.ebpf.interface.as_deref(), Some("ens5"));
        assert_eq!(config.ebpf.xdp_mode, XdpMode::Driver);
        assert_eq!(
            config.ebpf.ebpf_object_path.as_deref(),
            Some("/opt/aether/aether-ebpf")
        );
        assert_eq!(config.ebpf.knock, Knock::new(0xCAFE_BABE));
        assert_eq!(config.ebpf.pin_path, PathBuf::from("/run/aether/bpf"));
        assert_eq!(config.runtime.worker_threads, 2);
    }

    #[test]
    fn test_empty_interface_means_autodetect() {
        let config = AetherConfig::from_lookup(lookup(&[(ENV_INTERFACE, "")])).unwrap();
        assert_eq!(config.ebpf.interface, None);
    }

    #[test]
    fn test_invalid_values() {
        assert_eq!(
            AetherConfig::from_lookup(lookup(&[(ENV_XDP_MODE, "fast")])).unwrap_err(),
            ConfigError::InvalidXdpMode("fast".into())
        );
        assert_eq!(
            AetherConfig::from_lookup(lookup(&[(ENV_WORKER_THREADS, "0")])).unwrap_err(),
            ConfigError::InvalidWorkerThreads("0".into())
        );
        assert!(matches!(
            AetherConfig::from_lookup(lookup(&[(ENV_ENABLED, "maybe")])),
            Err(ConfigError::InvalidBool { var: ENV_ENABLED, .. })
        ));
    }

    #[test]
    fn test_parse_knock() {
        assert_eq!(parse_knock("DEADBEEF"), Ok(Knock::DEFAULT));
        assert_eq!(parse_knock("0xdead_beef"), Ok(Knock::DEFAULT));
        assert_eq!(parse_knock(" 0X1 "), Ok(Knock::new(1)));
        assert!(parse_knock("").is_err());
        assert!(parse_knock("0x").is_err());
        assert!(parse_knock("123456789").is_err());
        assert!(parse_knock("nothex").is_err());
    }

    #[test]
    fn test_parse_knock_rejects_sign() {
        assert_eq!(
            parse_knock("0x+1"),
            Err(ConfigError::InvalidKnock("0x+1".into()))
        );
        assert!(parse_knock("+DEADBEE").is_err());
        assert!(parse_knock("-1").is_err());
    }
}
