use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::model::RelationKind;
use crate::refresh::RefreshSettings;
use crate::tree::{DEFAULT_MAX_DEPTH, RECURSIVE_MAX_DEPTH};

/// Unit observed when nothing else is configured.
pub const DEFAULT_TARGET: &str = "-.slice";

/// Optional configuration file. Every field has a default; command-line flags
/// override whatever is set here.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TargetctlConfig {
    /// Root unit; a bare name gets `.target` appended
    #[serde(default)]
    pub target: Option<String>,

    /// Relation to expand
    #[serde(default)]
    pub relation: RelationKind,

    /// Expand recursively instead of direct children only
    #[serde(default)]
    pub recursive: bool,

    /// Explicit depth bound, wins over `recursive`
    #[serde(default)]
    pub depth: Option<usize>,

    #[serde(default = "default_interval_ms")]
    pub refresh_interval_ms: u64,

    #[serde(default = "default_followup_ms")]
    pub followup_delay_ms: u64,

    /// Where tracing output goes while the UI owns the terminal
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

fn default_interval_ms() -> u64 {
    1_000
}
fn default_followup_ms() -> u64 {
    50
}

impl Default for TargetctlConfig {
    fn default() -> Self {
        Self {
            target: None,
            relation: RelationKind::default(),
            recursive: false,
            depth: None,
            refresh_interval_ms: default_interval_ms(),
            followup_delay_ms: default_followup_ms(),
            log_file: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
    #[error("followup_delay_ms ({followup}) must not exceed refresh_interval_ms ({interval})")]
    FollowupTooLong { followup: u64, interval: u64 },
    #[error("target must not be empty")]
    EmptyTarget,
}

/// Everything needed to build and poll one tree, after defaults and
/// validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ViewOptions {
    pub target: String,
    pub relation: RelationKind,
    pub max_depth: usize,
    pub refresh: RefreshSettings,
}

/// Apply the `.target` suffix rule to a unit name.
pub fn normalize_target(name: &str) -> String {
    if name.contains('.') {
        name.to_string()
    } else {
        format!("{}.target", name)
    }
}

impl TargetctlConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse and validate (useful for testing)
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: TargetctlConfig = if content.trim().is_empty() {
            TargetctlConfig::default()
        } else {
            serde_yaml::from_str(content)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Look for a config file: `$TARGETCTL_CONFIG`, then
    /// `$XDG_CONFIG_HOME/targetctl/config.yaml`, then
    /// `~/.config/targetctl/config.yaml`. A missing file is not an error.
    pub fn discover() -> Result<Option<(PathBuf, Self)>, ConfigError> {
        let mut candidates = Vec::new();
        if let Some(path) = std::env::var_os("TARGETCTL_CONFIG") {
            candidates.push(PathBuf::from(path));
        }
        if let Some(dir) = std::env::var_os("XDG_CONFIG_HOME") {
            candidates.push(PathBuf::from(dir).join("targetctl").join("config.yaml"));
        }
        if let Some(home) = std::env::var_os("HOME") {
            candidates.push(
                PathBuf::from(home)
                    .join(".config")
                    .join("targetctl")
                    .join("config.yaml"),
            );
        }

        for path in candidates {
            if path.exists() {
                let config = Self::load(&path)?;
                return Ok(Some((path, config)));
            }
        }
        Ok(None)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.refresh_interval_ms == 0 {
            return Err(ConfigError::Zero {
                field: "refresh_interval_ms",
            });
        }
        if self.followup_delay_ms == 0 {
            return Err(ConfigError::Zero {
                field: "followup_delay_ms",
            });
        }
        if self.followup_delay_ms > self.refresh_interval_ms {
            return Err(ConfigError::FollowupTooLong {
                followup: self.followup_delay_ms,
                interval: self.refresh_interval_ms,
            });
        }
        if matches!(&self.target, Some(t) if t.trim().is_empty()) {
            return Err(ConfigError::EmptyTarget);
        }
        Ok(())
    }

    pub fn max_depth(&self) -> usize {
        match (self.depth, self.recursive) {
            (Some(depth), _) => depth,
            (None, true) => RECURSIVE_MAX_DEPTH,
            (None, false) => DEFAULT_MAX_DEPTH,
        }
    }

    pub fn refresh_settings(&self) -> RefreshSettings {
        RefreshSettings {
            interval: Duration::from_millis(self.refresh_interval_ms),
            followup: Duration::from_millis(self.followup_delay_ms),
        }
    }

    pub fn view_options(&self) -> ViewOptions {
        ViewOptions {
            target: normalize_target(self.target.as_deref().unwrap_or(DEFAULT_TARGET)),
            relation: self.relation,
            max_depth: self.max_depth(),
            refresh: self.refresh_settings(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
target: multi-user
relation: wants
recursive: true
refresh_interval_ms: 2000
followup_delay_ms: 100
log_file: /tmp/targetctl-test.log
"#;
        let config = TargetctlConfig::from_str(yaml).unwrap();
        assert_eq!(config.relation, RelationKind::Wants);
        assert_eq!(config.log_file, Some(PathBuf::from("/tmp/targetctl-test.log")));

        let view = config.view_options();
        assert_eq!(view.target, "multi-user.target");
        assert_eq!(view.max_depth, RECURSIVE_MAX_DEPTH);
        assert_eq!(view.refresh.interval, Duration::from_secs(2));
        assert_eq!(view.refresh.followup, Duration::from_millis(100));
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = TargetctlConfig::from_str("").unwrap();
        assert_eq!(config, TargetctlConfig::default());

        let view = config.view_options();
        assert_eq!(view.target, "-.slice");
        assert_eq!(view.relation, RelationKind::RequiredBy);
        assert_eq!(view.max_depth, DEFAULT_MAX_DEPTH);
        assert_eq!(view.refresh, RefreshSettings::default());
    }

    #[test]
    fn test_explicit_depth_wins() {
        let config = TargetctlConfig::from_str("recursive: true\ndepth: 3\n").unwrap();
        assert_eq!(config.max_depth(), 3);
    }

    #[test]
    fn test_relation_names() {
        for (name, relation) in [
            ("required-by", RelationKind::RequiredBy),
            ("requires", RelationKind::Requires),
            ("wanted-by", RelationKind::WantedBy),
            ("wants", RelationKind::Wants),
            ("consists-of", RelationKind::ConsistsOf),
            ("part-of", RelationKind::PartOf),
        ] {
            let config = TargetctlConfig::from_str(&format!("relation: {}", name)).unwrap();
            assert_eq!(config.relation, relation);
        }
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            TargetctlConfig::from_str("refresh_interval_ms: 0"),
            Err(ConfigError::Zero { .. })
        ));
        assert!(matches!(
            TargetctlConfig::from_str("refresh_interval_ms: 100\nfollowup_delay_ms: 500"),
            Err(ConfigError::FollowupTooLong { .. })
        ));
        assert!(matches!(
            TargetctlConfig::from_str("target: \"  \""),
            Err(ConfigError::EmptyTarget)
        ));
        assert!(matches!(
            TargetctlConfig::from_str("colour: red"),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn test_normalize_target() {
        assert_eq!(normalize_target("multi-user"), "multi-user.target");
        assert_eq!(normalize_target("sshd.service"), "sshd.service");
        assert_eq!(normalize_target("-.slice"), "-.slice");
    }
}
