//! Arguments shared by several commands and the helpers that read them.

use std::path::PathBuf;

use etl_rs_core::{EtlError, EtlResult, Settings};

pub fn source(help: &'static str) -> clap::Arg {
    clap::Arg::new("source")
        .long("source")
        .short('s')
        .required(true)
        .value_parser(clap::value_parser!(PathBuf))
        .help(help)
}

/// `--target`: `sqlite:PATH`, a `.db`/`.sqlite` file, `postgresql:DBNAME`,
/// or a database name on the configured PostgreSQL server.
pub fn target() -> clap::Arg {
    clap::Arg::new("target")
        .long("target")
        .short('t')
        .help("Target database, overriding [target] in the settings")
}

pub fn output(help: &'static str, required: bool) -> clap::Arg {
    clap::Arg::new("output")
        .long("output")
        .short('o')
        .required(required)
        .value_parser(clap::value_parser!(PathBuf))
        .help(help)
}

pub fn dry_run(help: &'static str) -> clap::Arg {
    clap::Arg::new("dry-run")
        .long("dry-run")
        .action(clap::ArgAction::SetTrue)
        .help(help)
}

/// Reads a path argument clap already made required.
pub fn path(matches: &clap::ArgMatches, id: &str) -> EtlResult<PathBuf> {
    matches
        .get_one::<PathBuf>(id)
        .cloned()
        .ok_or_else(|| EtlError::Configuration(format!("--{id} is required")))
}

pub fn flag(matches: &clap::ArgMatches, id: &str) -> bool {
    matches.try_get_one::<bool>(id).ok().flatten().copied().unwrap_or(false)
}

/// Points `settings.target` at `spec`.
pub fn apply_target(settings: &mut Settings, spec: &str) -> EtlResult<()> {
    let spec = spec.trim();
    if spec.is_empty() {
        return Err(EtlError::Configuration("--target must not be empty".to_string()));
    }
    let is_sqlite_file = [".db", ".sqlite", ".sqlite3"]
        .iter()
        .any(|ext| spec.ends_with(ext));
    if let Some(path) = spec.strip_prefix("sqlite:") {
        settings.target.engine = "sqlite".to_string();
        settings.target.name = path.to_string();
    } else if let Some(name) = spec
        .strip_prefix("postgresql:")
        .or_else(|| spec.strip_prefix("postgres:"))
    {
        settings.target.engine = "postgresql".to_string();
        settings.target.name = name.to_string();
    } else if is_sqlite_file {
        settings.target.engine = "sqlite".to_string();
        settings.target.name = spec.to_string();
    } else {
        settings.target.name = spec.to_string();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_target_forms() {
        let mut s = Settings::default();
        apply_target(&mut s, "sqlite:/tmp/t").unwrap();
        assert_eq!((s.target.engine.as_str(), s.target.name.as_str()), ("sqlite", "/tmp/t"));

        apply_target(&mut s, "postgres:warehouse").unwrap();
        assert_eq!(
            (s.target.engine.as_str(), s.target.name.as_str()),
            ("postgresql", "warehouse")
        );

        apply_target(&mut s, "out/target.sqlite3").unwrap();
        assert_eq!(s.target.engine, "sqlite");

        let mut s = Settings::default();
        apply_target(&mut s, "analytics").unwrap();
        assert_eq!(s.target.engine, "postgresql");
        assert_eq!(s.target.name, "analytics");

        assert!(apply_target(&mut s, "  ").is_err());
    }
}
