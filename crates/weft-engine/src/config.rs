//! Engine configuration
//!
//! Loaded from TOML, optionally overridden by `WEFT_*` environment variables,
//! and validated before an [`crate::AspectManager`] is built from it.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;
use weft_core::{ClassDescriptor, InheritancePolicy, Result, WeftError};

/// Prefix of environment variables read by [`EngineConfig::merge_with_env`]
pub const ENV_PREFIX: &str = "WEFT_";

/// Keys accepted by [`EngineConfig::set_from_string`]
const FIELDS: &[&str] = &[
    "inheritance_policy",
    "excluded_classes",
    "excluded_members",
    "advise_synthetic",
    "rebuild_on_change",
    "track_call_stack",
];

/// Engine-wide settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How inherited methods are presented to the pointcut matcher
    pub inheritance_policy: InheritancePolicy,
    /// Class-name prefixes that are never advised
    pub excluded_classes: Vec<String>,
    /// Member names excluded from advice on every class
    pub excluded_members: Vec<String>,
    /// Whether synthetic wrapper members may be advised
    pub advise_synthetic: bool,
    /// Rebuild affected advisors as soon as bindings, aspects or precedence change
    pub rebuild_on_change: bool,
    /// Maintain the per-thread call stack consulted by control-flow guards
    pub track_call_stack: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            inheritance_policy: InheritancePolicy::DeclaringClass,
            excluded_classes: Vec::new(),
            excluded_members: Vec::new(),
            advise_synthetic: false,
            rebuild_on_change: true,
            track_call_stack: true,
        }
    }
}

impl EngineConfig {
    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| WeftError::configuration(format!("Invalid TOML: {e}")))
    }

    /// Load a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            WeftError::configuration(format!(
                "Failed to read config file {}: {e}",
                path.display()
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Apply `WEFT_<FIELD>` overrides from the process environment
    pub fn merge_with_env(&mut self) -> Result<()> {
        self.merge_with_vars(std::env::vars())
    }

    /// Apply `WEFT_<FIELD>` overrides from an explicit variable list
    ///
    /// `WEFT_*` variables that name no field (`WEFT_LOG`, for one) are skipped;
    /// a known field with an unparsable value is still an error.
    pub fn merge_with_vars<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(field) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let field = field.to_ascii_lowercase();
            if !FIELDS.contains(&field.as_str()) {
                debug!(variable = %key, "Ignoring unknown configuration variable");
                continue;
            }
            self.set_from_string(&field, &value)?;
        }
        Ok(())
    }

    /// Set one field from its string form; list fields take comma-separated values
    pub fn set_from_string(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "inheritance_policy" => {
                self.inheritance_policy = match value.trim() {
                    "declaring_class" => InheritancePolicy::DeclaringClass,
                    "advised_class" => InheritancePolicy::AdvisedClass,
                    other => {
                        return Err(WeftError::configuration(format!(
                            "Unknown inheritance policy: {other}"
                        )))
                    }
                };
            }
            "excluded_classes" => self.excluded_classes = split_list(value),
            "excluded_members" => self.excluded_members = split_list(value),
            "advise_synthetic" => self.advise_synthetic = parse_bool(key, value)?,
            "rebuild_on_change" => self.rebuild_on_change = parse_bool(key, value)?,
            "track_call_stack" => self.track_call_stack = parse_bool(key, value)?,
            _ => {
                return Err(WeftError::configuration(format!(
                    "Unknown configuration key: {key}"
                )))
            }
        }
        Ok(())
    }

    /// Reject empty prefixes and duplicate entries
    pub fn validate(&self) -> Result<()> {
        check_list("excluded_classes", &self.excluded_classes)?;
        check_list("excluded_members", &self.excluded_members)
    }

    /// Whether a class is excluded from advice by prefix
    pub fn excludes_class(&self, class: &ClassDescriptor) -> bool {
        self.excluded_classes
            .iter()
            .any(|prefix| class.name.starts_with(prefix.as_str()))
    }

    /// Whether a member name is excluded from advice
    pub fn excludes_member(&self, name: &str) -> bool {
        self.excluded_members.iter().any(|member| member == name)
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(String::from)
        .collect()
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    value
        .trim()
        .parse()
        .map_err(|_| WeftError::configuration(format!("Invalid boolean for {key}: {value}")))
}

fn check_list(field: &str, entries: &[String]) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for entry in entries {
        if entry.is_empty() {
            return Err(WeftError::configuration(format!(
                "{field} contains an empty entry"
            )));
        }
        if !seen.insert(entry.as_str()) {
            return Err(WeftError::configuration(format!(
                "{field} lists '{entry}' more than once"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert!(config.rebuild_on_change);
        assert!(config.track_call_stack);
        assert!(!config.advise_synthetic);
        assert_eq!(config.inheritance_policy, InheritancePolicy::DeclaringClass);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_fills_missing_fields() {
        let config = EngineConfig::from_toml_str(
            r#"
            inheritance_policy = "advised_class"
            excluded_classes = ["java.", "sun."]
            "#,
        )
        .unwrap();
        assert_eq!(config.inheritance_policy, InheritancePolicy::AdvisedClass);
        assert_eq!(config.excluded_classes, vec!["java.", "sun."]);
        assert!(config.rebuild_on_change);
    }

    #[test]
    fn test_invalid_toml_is_configuration_error() {
        let err = EngineConfig::from_toml_str("advise_synthetic = \"sometimes\"").unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "track_call_stack = false").unwrap();
        let config = EngineConfig::load_from_file(file.path()).unwrap();
        assert!(!config.track_call_stack);

        let missing = EngineConfig::load_from_file(Path::new("/nonexistent/weft.toml"));
        assert!(missing.is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = EngineConfig::default();
        config
            .merge_with_vars(vec![
                ("WEFT_EXCLUDED_MEMBERS".to_string(), "toString, hashCode".to_string()),
                ("WEFT_REBUILD_ON_CHANGE".to_string(), "false".to_string()),
                ("PATH".to_string(), "/usr/bin".to_string()),
            ])
            .unwrap();
        assert_eq!(config.excluded_members, vec!["toString", "hashCode"]);
        assert!(!config.rebuild_on_change);

        let err = config
            .merge_with_vars(vec![("WEFT_ADVISE_SYNTHETIC".to_string(), "maybe".to_string())])
            .unwrap_err();
        assert!(err.is_configuration());

        let err = config.set_from_string("color", "blue").unwrap_err();
        assert!(err.to_string().contains("Unknown configuration key"));
    }

    #[test]
    fn test_env_ignores_unrelated_weft_variables() {
        let mut config = EngineConfig::default();
        config
            .merge_with_vars(vec![
                ("WEFT_LOG".to_string(), "debug".to_string()),
                ("WEFT_TRACK_CALL_STACK".to_string(), "false".to_string()),
                ("WEFT_COLOR".to_string(), "blue".to_string()),
            ])
            .unwrap();
        assert_eq!(
            config,
            EngineConfig {
                track_call_stack: false,
                ..EngineConfig::default()
            }
        );
    }

    #[test]
    fn test_validate_rejects_duplicates_and_empty_prefixes() {
        let config = EngineConfig {
            excluded_classes: vec!["java.".into(), "java.".into()],
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            excluded_members: vec![String::new()],
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_class_exclusion_by_prefix() {
        let config = EngineConfig {
            excluded_classes: vec!["java.".into()],
            ..EngineConfig::default()
        };
        assert!(config.excludes_class(&ClassDescriptor::new("java.lang.String")));
        assert!(!config.excludes_class(&ClassDescriptor::new("com.acme.Account")));
    }
}
