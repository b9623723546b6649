//! Settings loading from configuration files.
//!
//! ## Loading Order
//!
//! 1. Start with default settings.
//! 2. Load from a TOML or JSON file (deep-merged over the defaults).
//! 3. Apply environment variable overrides (highest priority).
//!
//! ## Environment Variable Mapping
//!
//! | Env Var | Setting |
//! |---|---|
//! | `ETL_DEBUG` | `debug` |
//! | `ETL_LOG_LEVEL` | `log_level` |
//! | `ETL_TARGET_ENGINE` | `target.engine` |
//! | `ETL_TARGET_NAME` | `target.name` |
//! | `ETL_TARGET_HOST` | `target.host` |
//! | `ETL_TARGET_PORT` | `target.port` |
//! | `ETL_TARGET_USER` | `target.user` |
//! | `ETL_TARGET_PASSWORD` | `target.password` |
//! | `ETL_TARGET_SCHEMA` | `target.schema` |
//! | `ETL_QUALITY_FLOOR` | `migrate.quality_floor` |
//! | `ETL_SAMPLE_SIZE` | `profile.sample_size` |
//! | `ETL_STATE_DIR` | `paths.state_dir` |
//! | `ETL_BACKUP_DIR` | `paths.backup_dir` |
//! | `ETL_WORK_DIR` | `paths.work_dir` |
//! | `ETL_REPORT_DIR` | `paths.report_dir` |
//!
//! ## Examples
//!
//! ```rust,no_run
//! use etl_rs_core::settings_loader;
//!
//! let settings = settings_loader::from_file_with_env("etl.toml").unwrap();
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::EtlError;
use crate::settings::Settings;

/// Loads settings from a TOML document. Absent keys keep their defaults.
pub fn from_toml_str(toml_str: &str) -> Result<Settings, EtlError> {
    let doc: serde_json::Value = toml::from_str(toml_str)
        .map_err(|e| EtlError::Configuration(format!("invalid TOML settings: {e}")))?;
    over_defaults(doc, "TOML")
}

/// Loads settings from a JSON document. Absent keys keep their defaults.
pub fn from_json_str(json_str: &str) -> Result<Settings, EtlError> {
    let doc: serde_json::Value = serde_json::from_str(json_str)
        .map_err(|e| EtlError::Configuration(format!("invalid JSON settings: {e}")))?;
    over_defaults(doc, "JSON")
}

/// Loads settings from a `.toml` or `.json` file, chosen by extension.
pub fn from_file(path: impl AsRef<Path>) -> Result<Settings, EtlError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        EtlError::Configuration(format!(
            "Failed to read settings file '{}': {e}",
            path.display()
        ))
    })?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => from_json_str(&content),
        _ => from_toml_str(&content),
    }
}

/// Loads settings from a file, applies environment overrides and validates.
pub fn from_file_with_env(path: impl AsRef<Path>) -> Result<Settings, EtlError> {
    let mut settings = from_file(path)?;
    apply_env_overrides(&mut settings)?;
    settings.validate()?;
    Ok(settings)
}

/// Loads settings from just environment variables (starting from defaults).
pub fn from_env() -> Result<Settings, EtlError> {
    let mut settings = Settings::default();
    apply_env_overrides(&mut settings)?;
    settings.validate()?;
    Ok(settings)
}

/// Applies `ETL_*` environment variable overrides from the process environment.
pub fn apply_env_overrides(settings: &mut Settings) -> Result<(), EtlError> {
    apply_overrides_from(settings, |key| std::env::var(key).ok())
}

/// Applies overrides using an arbitrary lookup function.
///
/// Split out from [`apply_env_overrides`] so overrides can be exercised
/// without mutating the process environment.
pub fn apply_overrides_from<F>(settings: &mut Settings, lookup: F) -> Result<(), EtlError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = lookup("ETL_DEBUG") {
        settings.debug = matches!(val.to_lowercase().as_str(), "true" | "1" | "yes");
    }
    if let Some(val) = lookup("ETL_LOG_LEVEL") {
        settings.log_level = val;
    }
    if let Some(val) = lookup("ETL_TARGET_ENGINE") {
        settings.target.engine = val;
    }
    if let Some(val) = lookup("ETL_TARGET_NAME") {
        settings.target.name = val;
    }
    if let Some(val) = lookup("ETL_TARGET_HOST") {
        settings.target.host = val;
    }
    if let Some(val) = lookup("ETL_TARGET_PORT") {
        settings.target.port = parse_override("ETL_TARGET_PORT", &val)?;
    }
    if let Some(val) = lookup("ETL_TARGET_USER") {
        settings.target.user = val;
    }
    if let Some(val) = lookup("ETL_TARGET_PASSWORD") {
        settings.target.password = val;
    }
    if let Some(val) = lookup("ETL_TARGET_SCHEMA") {
        settings.target.schema = val;
    }
    if let Some(val) = lookup("ETL_QUALITY_FLOOR") {
        settings.migrate.quality_floor = parse_override("ETL_QUALITY_FLOOR", &val)?;
    }
    if let Some(val) = lookup("ETL_SAMPLE_SIZE") {
        settings.profile.sample_size = parse_override("ETL_SAMPLE_SIZE", &val)?;
    }
    if let Some(val) = lookup("ETL_STATE_DIR") {
        settings.paths.state_dir = PathBuf::from(val);
    }
    if let Some(val) = lookup("ETL_BACKUP_DIR") {
        settings.paths.backup_dir = PathBuf::from(val);
    }
    if let Some(val) = lookup("ETL_WORK_DIR") {
        settings.paths.work_dir = PathBuf::from(val);
    }
    if let Some(val) = lookup("ETL_REPORT_DIR") {
        settings.paths.report_dir = PathBuf::from(val);
    }
    Ok(())
}

fn parse_override<T: FromStr>(key: &str, val: &str) -> Result<T, EtlError> {
    val.trim()
        .parse()
        .map_err(|_| EtlError::Configuration(format!("{key} has an invalid value '{val}'")))
}

fn over_defaults(doc: serde_json::Value, format: &str) -> Result<Settings, EtlError> {
    let mut settings = serde_json::to_value(Settings::default())?;
    overlay(&mut settings, doc);
    serde_json::from_value(settings)
        .map_err(|e| EtlError::Configuration(format!("{format} settings do not fit: {e}")))
}

/// Writes `layer` over `base`, descending into tables present in both.
fn overlay(base: &mut serde_json::Value, layer: serde_json::Value) {
    use serde_json::Value;

    match (base, layer) {
        (Value::Object(base), Value::Object(layer)) => {
            for (key, value) in layer {
                match base.get_mut(&key) {
                    Some(slot) => overlay(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_from_toml_str_nested_sections() {
        let toml = r#"
            log_level = "debug"

            [target]
            engine = "sqlite"
            name = "/tmp/target.db"

            [migrate]
            quality_floor = 90.0
        "#;

        let settings = from_toml_str(toml).unwrap();
        assert_eq!(settings.log_level, "debug");
        assert!(settings.target.is_sqlite());
        assert_eq!(settings.target.name, "/tmp/target.db");
        assert!((settings.migrate.quality_floor - 90.0).abs() < f64::EPSILON);
        // Siblings inside a partially specified section keep their defaults.
        assert!((settings.migrate.canary_fraction - 0.10).abs() < f64::EPSILON);
        assert_eq!(settings.target.port, 5432);
    }

    #[test]
    fn test_from_toml_str_empty() {
        let settings = from_toml_str("").unwrap();
        assert_eq!(settings.profile.sample_size, 5000);
    }

    #[test]
    fn test_from_toml_str_invalid() {
        let result = from_toml_str("[[invalid toml content");
        assert!(matches!(result, Err(EtlError::Configuration(_))));
    }

    #[test]
    fn test_from_json_str_retry_override() {
        let json = r#"{ "migrate": { "retry": { "max_attempts": 4 } } }"#;
        let settings = from_json_str(json).unwrap();
        assert_eq!(settings.migrate.retry.max_attempts, 4);
        assert_eq!(settings.migrate.retry.base_delay_ms, 200);
    }

    #[test]
    fn test_from_json_str_wrong_type() {
        let json = r#"{ "profile": { "sample_size": "lots" } }"#;
        assert!(from_json_str(json).is_err());
    }

    #[test]
    fn test_from_file_dispatches_on_extension() {
        let dir = tempfile::tempdir().unwrap();
        let json_path = dir.path().join("etl.json");
        std::fs::write(&json_path, r#"{ "log_level": "warn" }"#).unwrap();
        assert_eq!(from_file(&json_path).unwrap().log_level, "warn");

        let toml_path = dir.path().join("etl.toml");
        std::fs::write(&toml_path, "log_level = \"trace\"").unwrap();
        assert_eq!(from_file(&toml_path).unwrap().log_level, "trace");
    }

    #[test]
    fn test_from_file_missing() {
        let err = from_file("/nonexistent/etl.toml").unwrap_err();
        assert!(err.to_string().contains("Failed to read settings file"));
    }

    #[test]
    fn test_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            ("ETL_TARGET_HOST", "db.internal"),
            ("ETL_TARGET_PORT", "6543"),
            ("ETL_QUALITY_FLOOR", "85.5"),
            ("ETL_BACKUP_DIR", "/var/backups/etl"),
            ("ETL_DEBUG", "yes"),
        ]
        .into_iter()
        .collect();

        let mut settings = Settings::default();
        apply_overrides_from(&mut settings, |k| vars.get(k).map(|v| (*v).to_string())).unwrap();
        assert_eq!(settings.target.host, "db.internal");
        assert_eq!(settings.target.port, 6543);
        assert!((settings.migrate.quality_floor - 85.5).abs() < f64::EPSILON);
        assert_eq!(settings.paths.backup_dir, PathBuf::from("/var/backups/etl"));
        assert!(settings.debug);
    }

    #[test]
    fn test_unparseable_numeric_override_is_configuration_error() {
        let mut settings = Settings::default();
        let result = apply_overrides_from(&mut settings, |k| {
            (k == "ETL_TARGET_PORT").then(|| "not-a-port".to_string())
        });
        assert!(matches!(result, Err(EtlError::Configuration(_))));
    }
}
