use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::{ConfigError, ReconcileError};
use crate::mail::Normalizer;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Your own email addresses and phone numbers (used to infer direction)
    pub self_identifiers: Vec<String>,
    /// Phone number, address or name -> preferred display name
    pub aliases: HashMap<String, String>,
    pub output: OutputConfig,
    pub scan: ScanConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Output directory (supports ~). Defaults to a timestamped directory.
    pub dir: Option<String>,
    /// Longest file name written, including extension
    pub max_filename_len: usize,
    /// Pretty-print JSON
    pub pretty: bool,
    /// Also write `<thread>_combined.eml` bundling the source messages
    pub eml: bool,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Log progress every N parsed files
    pub progress_every: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: None,
            max_filename_len: 100,
            pretty: true,
            eml: true,
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self { progress_every: 1000 }
    }
}

impl Config {
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|p| p.join("smsthreads/config.toml"))
            .unwrap_or_else(|| PathBuf::from("~/.config/smsthreads/config.toml"))
    }

    /// Load the config from its default location. A missing file gives the
    /// defaults; an unreadable one is logged and also gives the defaults.
    pub fn load() -> Self {
        let config_path = Self::default_path();

        if config_path.exists() {
            match Self::load_from(&config_path) {
                Ok(config) => return config,
                Err(e) => warn!("{} ({})", e, config_path.display()),
            }
        }

        Self::default()
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Add identifiers and aliases given on the command line. Command-line
    /// aliases override file aliases for the same key.
    pub fn merge_cli(&mut self, self_identifiers: &[String], aliases: &[String]) -> Result<(), ConfigError> {
        for ident in self_identifiers {
            if !self.self_identifiers.contains(ident) {
                self.self_identifiers.push(ident.clone());
            }
        }
        for alias in aliases {
            let (key, name) = parse_alias(alias)?;
            self.aliases.insert(key, name);
        }
        Ok(())
    }

    /// Output directory with ~ expanded
    pub fn output_dir(&self) -> Option<PathBuf> {
        self.output
            .dir
            .as_deref()
            .map(|d| PathBuf::from(shellexpand::tilde(d).into_owned()))
    }

    pub fn normalizer(&self) -> Result<Normalizer, ReconcileError> {
        Normalizer::new(&self.self_identifiers, &self.aliases)
    }
}

/// Parse `NUMBER=NAME`
pub fn parse_alias(s: &str) -> Result<(String, String), ConfigError> {
    match s.split_once('=') {
        Some((key, name)) if !key.trim().is_empty() && !name.trim().is_empty() => {
            Ok((key.trim().to_string(), name.trim().to_string()))
        }
        _ => Err(ConfigError::Alias(s.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config = Config::parse(
            r#"
self_identifiers = ["me@example.com", "9412660605"]

[aliases]
"4075551234" = "Alice"

[output]
dir = "~/sms-threads"
max_filename_len = 80
eml = false

[scan]
progress_every = 50
"#,
        )
        .unwrap();
        assert_eq!(config.self_identifiers.len(), 2);
        assert_eq!(config.aliases["4075551234"], "Alice");
        assert_eq!(config.output.max_filename_len, 80);
        assert!(config.output.pretty);
        assert!(!config.output.eml);
        assert_eq!(config.scan.progress_every, 50);
        let dir = config.output_dir().unwrap();
        assert!(dir.ends_with("sms-threads"));
        assert!(!dir.to_string_lossy().starts_with('~'));
    }

    #[test]
    fn test_defaults_for_missing_sections() {
        let config = Config::parse("").unwrap();
        assert!(config.self_identifiers.is_empty());
        assert_eq!(config.output.max_filename_len, 100);
        assert!(config.output.eml);
        assert_eq!(config.scan.progress_every, 1000);
        assert!(config.output_dir().is_none());
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(Config::parse("self_identifiers = 3"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_merge_cli() {
        let mut config = Config::default();
        config.self_identifiers.push("9412660605".into());
        config
            .merge_cli(&["9412660605".into(), "me@example.com".into()], &["4075551234=Alice".into()])
            .unwrap();
        assert_eq!(config.self_identifiers, vec!["9412660605", "me@example.com"]);
        assert_eq!(config.aliases["4075551234"], "Alice");
        assert!(config.normalizer().is_ok());
    }

    #[test]
    fn test_bad_alias() {
        assert!(parse_alias("4075551234").is_err());
        assert!(parse_alias("=Alice").is_err());
        assert_eq!(
            parse_alias(" 4075551234 = Alice ").unwrap(),
            ("4075551234".to_string(), "Alice".to_string())
        );
    }

    #[test]
    fn test_invalid_self_phone_rejected() {
        let mut config = Config::default();
        config.self_identifiers.push("12345".into());
        assert!(config.normalizer().is_err());
    }
}
