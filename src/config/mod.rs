/// Configuration for kubectl-daemons: optional YAML defaults merged under CLI flags
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::output::OutputFormat;

/// Namespace used when neither a flag nor the config file names one
pub const DEFAULT_NAMESPACE: &str = "default";

/// Environment variable naming an alternative config file
pub const CONFIG_ENV: &str = "KUBECTL_DAEMONS_CONFIG";

/// Defaults file, e.g. `~/.config/kubectl-daemons/config.yaml`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DaemonsConfig {
    /// Kubeconfig context to use instead of the current one
    #[serde(default)]
    pub context: Option<String>,

    #[serde(default)]
    pub namespace: Option<String>,

    /// Default `-o` format for `get`
    #[serde(default)]
    pub output: Option<OutputFormat>,
}

impl DaemonsConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        // An empty file is a valid, empty config
        let config: DaemonsConfig = if content.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if matches!(self.context.as_deref(), Some(c) if c.trim().is_empty()) {
            anyhow::bail!("context cannot be empty");
        }
        if matches!(self.namespace.as_deref(), Some(n) if n.trim().is_empty()) {
            anyhow::bail!("namespace cannot be empty");
        }
        Ok(())
    }

    /// Per-user config location under the platform config directory
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("kubectl-daemons").join("config.yaml"))
    }

    /// Load `explicit` if given (it must exist), else the default file if present
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            debug!("Loading config from {}", path.display());
            return Self::from_file(path);
        }

        match Self::default_path() {
            Some(path) if path.is_file() => {
                debug!("Loading config from {}", path.display());
                Self::from_file(&path)
            }
            _ => Ok(Self::default()),
        }
    }
}

/// Effective settings for one invocation
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub context: Option<String>,
    pub namespace: String,
    /// Empty or `None` means all nodes
    pub node: Option<String>,
    pub output: Option<OutputFormat>,
}

/// Values given on the command line
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub context: Option<String>,
    pub namespace: Option<String>,
    pub node: Option<String>,
    pub output: Option<OutputFormat>,
}

impl Settings {
    /// Flags win over the file, the file wins over built-in defaults
    pub fn merge(config: DaemonsConfig, flags: Overrides) -> Self {
        Self {
            context: flags.context.or(config.context),
            namespace: flags
                .namespace
                .or(config.namespace)
                .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            node: flags.node.filter(|n| !n.is_empty()),
            output: flags.output.or(config.output),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_from_file() {
        let file = write_config("context: prod\nnamespace: kube-system\noutput: wide\n");
        let config = DaemonsConfig::from_file(file.path()).unwrap();
        assert_eq!(config.context.as_deref(), Some("prod"));
        assert_eq!(config.namespace.as_deref(), Some("kube-system"));
        assert_eq!(config.output, Some(OutputFormat::Wide));
    }

    #[test]
    fn test_empty_file_is_default() {
        let file = write_config("");
        assert_eq!(
            DaemonsConfig::from_file(file.path()).unwrap(),
            DaemonsConfig::default()
        );
    }

    #[test]
    fn test_config_validation() {
        let file = write_config("namespace: \"\"\n");
        assert!(DaemonsConfig::from_file(file.path()).is_err());

        let config = DaemonsConfig {
            context: Some(" ".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(DaemonsConfig::default().validate().is_ok());
    }

    #[test]
    fn test_unknown_keys_and_formats_are_rejected() {
        let file = write_config("namespaces: kube-system\n");
        assert!(DaemonsConfig::from_file(file.path()).is_err());

        let file = write_config("output: table\n");
        assert!(DaemonsConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = DaemonsConfig::load(Some(dir.path().join("nope.yaml").as_path())).unwrap_err();
        assert!(format!("{:#}", err).contains("nope.yaml"));
    }

    #[test]
    fn test_flags_override_file() {
        let config = DaemonsConfig {
            context: Some("staging".to_string()),
            namespace: Some("monitoring".to_string()),
            output: Some(OutputFormat::Yaml),
        };
        let flags = Overrides {
            namespace: Some("kube-system".to_string()),
            node: Some("node-a".to_string()),
            ..Default::default()
        };

        let settings = Settings::merge(config, flags);
        assert_eq!(settings.context.as_deref(), Some("staging"));
        assert_eq!(settings.namespace, "kube-system");
        assert_eq!(settings.node.as_deref(), Some("node-a"));
        assert_eq!(settings.output, Some(OutputFormat::Yaml));
    }

    #[test]
    fn test_defaults_without_file_or_flags() {
        let settings = Settings::merge(DaemonsConfig::default(), Overrides::default());
        assert_eq!(settings.namespace, DEFAULT_NAMESPACE);
        assert_eq!(settings.context, None);
        assert_eq!(settings.node, None);
        assert_eq!(settings.output, None);

        let settings = Settings::merge(
            DaemonsConfig::default(),
            Overrides {
                node: Some(String::new()),
                ..Default::default()
            },
        );
        assert_eq!(settings.node, None);
    }
}
