//! Host configuration management

use crate::usb::ServiceSettings;
use anyhow::{Context, Result, anyhow};
use common::LogFormat;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use duration_serde::{format_duration, parse_duration};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub scanner: ScannerSettings,
    #[serde(default)]
    pub transfers: TransferSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Default filter when RUST_LOG is unset (trace, debug, info, warn, error)
    #[serde(default = "LoggingSettings::default_level")]
    pub level: String,
    /// Output format (full, compact)
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            format: LogFormat::default(),
        }
    }
}

impl LoggingSettings {
    fn default_level() -> String {
        "info".to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerSettings {
    /// Time between background scans ("0" disables periodic scanning)
    #[serde(default = "ScannerSettings::default_interval", with = "duration_serde")]
    pub interval: Duration,
    /// Scan once synchronously at startup
    #[serde(default = "ScannerSettings::default_scan_on_start")]
    pub scan_on_start: bool,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            interval: Self::default_interval(),
            scan_on_start: Self::default_scan_on_start(),
        }
    }
}

impl ScannerSettings {
    fn default_interval() -> Duration {
        Duration::from_secs(1)
    }

    fn default_scan_on_start() -> bool {
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSettings {
    /// Host-controller timeout applied to every transfer
    #[serde(default = "TransferSettings::default_timeout", with = "duration_serde")]
    pub default_timeout: Duration,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            default_timeout: Self::default_timeout(),
        }
    }
}

impl TransferSettings {
    fn default_timeout() -> Duration {
        Duration::from_secs(5)
    }
}

/// Serde support for duration strings like "500ms", "2s", "1m30s"
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        format_duration(*duration).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    /// Parse a duration string
    ///
    /// Units are `ms`, `s`, `m` and `h` and may be combined ("1m30s"). A bare
    /// number is seconds; "0" is a zero duration.
    pub fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim().to_lowercase();
        if s.is_empty() {
            return Err("Empty duration".to_string());
        }

        let mut total = Duration::ZERO;
        let mut rest = s.as_str();
        while !rest.is_empty() {
            let digits = rest
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(rest.len());
            if digits == 0 {
                return Err(format!("Invalid duration format: {}", s));
            }
            let num: u64 = rest[..digits]
                .parse()
                .map_err(|_| format!("Invalid number in duration: {}", &rest[..digits]))?;
            rest = &rest[digits..];

            let unit_len = rest
                .find(|c: char| c.is_ascii_digit())
                .unwrap_or(rest.len());
            let unit = &rest[..unit_len];
            rest = &rest[unit_len..];

            total += match unit {
                "" | "s" => Duration::from_secs(num),
                "ms" => Duration::from_millis(num),
                "m" => Duration::from_secs(num.saturating_mul(60)),
                "h" => Duration::from_secs(num.saturating_mul(3600)),
                other => return Err(format!("Invalid duration unit: {}", other)),
            };
        }

        Ok(total)
    }

    pub fn format_duration(d: Duration) -> String {
        if d.is_zero() {
            return "0".to_string();
        }
        if d.subsec_millis() != 0 {
            return format!("{}ms", d.as_millis());
        }

        let secs = d.as_secs();
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        let secs = secs % 60;

        let mut result = String::new();
        if hours > 0 {
            result.push_str(&format!("{}h", hours));
        }
        if mins > 0 {
            result.push_str(&format!("{}m", mins));
        }
        if secs > 0 {
            result.push_str(&format!("{}s", secs));
        }
        result
    }
}

impl HostConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            // Try standard locations in order
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/usb-host/host.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: HostConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("usb-host").join("host.toml")
        } else {
            PathBuf::from(".config/usb-host/host.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            ));
        }

        if self.transfers.default_timeout.is_zero() {
            return Err(anyhow!("transfers.default_timeout must be greater than 0"));
        }

        Ok(())
    }

    /// Runtime settings for the USB services
    pub fn service_settings(&self) -> ServiceSettings {
        ServiceSettings {
            scan_interval: self.scanner.interval,
            scan_on_start: self.scanner.scan_on_start,
            transfer_timeout: self.transfers.default_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HostConfig::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.scanner.interval, Duration::from_secs(1));
        assert!(config.scanner.scan_on_start);
        assert_eq!(config.transfers.default_timeout, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
        assert_eq!(parse_duration(" 3S ").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn test_parse_duration_invalid() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("ms").is_err());
        assert!(parse_duration("5x").is_err());
        assert!(parse_duration("1.5s").is_err());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::ZERO), "0");
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1500ms");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m30s");
        assert_eq!(format_duration(Duration::from_secs(3600)), "1h");
    }

    #[test]
    fn test_config_serialization() {
        let config = HostConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: HostConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.logging.level, parsed.logging.level);
        assert_eq!(config.scanner.interval, parsed.scanner.interval);
        assert_eq!(
            config.transfers.default_timeout,
            parsed.transfers.default_timeout
        );
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = HostConfig::default();
        config.logging.level = "invalid".to_string();
        assert!(config.validate().is_err());

        config.logging.level = "debug".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_timeout() {
        let mut config = HostConfig::default();
        config.transfers.default_timeout = Duration::ZERO;
        assert!(config.validate().is_err());

        config.transfers.default_timeout = Duration::from_secs(1);
        config.scanner.interval = Duration::ZERO;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_service_settings() {
        let mut config = HostConfig::default();
        config.scanner.interval = Duration::from_millis(250);
        config.scanner.scan_on_start = false;

        let settings = config.service_settings();
        assert_eq!(settings.scan_interval, Duration::from_millis(250));
        assert!(!settings.scan_on_start);
        assert_eq!(settings.transfer_timeout, Duration::from_secs(5));
    }
}
