//! Path and bundle resolution.
//!
//! A bundled database is a directory containing exactly one engine's
//! files, named canonically per engine (`db.sqlite3` or `db.forestdb`).
//! Resolution picks the concrete database file and may fill in the
//! configuration's engine tag.

use crate::config::{DatabaseConfig, DatabaseFlags};
use crate::error::{Error, Result};
use satchel_storage::engine;
use std::fs;
use std::path::{Path, PathBuf};

/// Resolves a caller-supplied path and configuration to the concrete
/// database file path, updating `config.storage_engine` when it was
/// unspecified.
///
/// For non-bundled paths this is the identity (with the engine defaulted
/// to SQLite). For bundles:
///
/// - the directory is created under `CREATE`, otherwise it must already
///   exist as a directory;
/// - a just-created directory, or an existing file for the requested
///   engine, resolves to that engine's canonical file;
/// - an explicitly requested engine whose file is missing is a format
///   mismatch;
/// - with no engine requested, a bundle holding only the legacy format is
///   adopted silently.
pub(crate) fn resolve_database_path(path: &Path, config: &mut DatabaseConfig) -> Result<PathBuf> {
    if !config.flags.contains(DatabaseFlags::BUNDLED) {
        if config.storage_engine.is_none() {
            config.storage_engine = Some(engine::DEFAULT_ENGINE.to_string());
        }
        return Ok(path.to_path_buf());
    }

    let created_dir =
        config.flags.contains(DatabaseFlags::CREATE) && fs::create_dir(path).is_ok();
    if !created_dir {
        if !path.exists() {
            return Err(Error::NotFound);
        }
        if !path.is_dir() {
            return Err(Error::wrong_format(format!(
                "bundle path is not a directory: {}",
                path.display()
            )));
        }
    }

    let requested = config.storage_engine.as_deref();
    let tag = requested.unwrap_or(engine::DEFAULT_ENGINE);
    let filename = engine::canonical_filename(tag)
        .ok_or_else(|| Error::invalid_parameter(format!("unknown storage engine {tag:?}")))?;

    let db_file = path.join(filename);
    if created_dir || db_file.exists() {
        if config.storage_engine.is_none() {
            config.storage_engine = Some(engine::DEFAULT_ENGINE.to_string());
        }
        return Ok(db_file);
    }

    if requested.is_some() {
        // The bundle exists but not in the format they asked for.
        return Err(Error::wrong_format(format!(
            "bundle {} has no {tag} database",
            path.display()
        )));
    }

    // No preference given; adopt a legacy bundle if one is present.
    if let Some(legacy) = engine::canonical_filename(engine::FORESTDB_ENGINE) {
        let legacy_file = path.join(legacy);
        if legacy_file.exists() {
            config.storage_engine = Some(engine::FORESTDB_ENGINE.to_string());
            return Ok(legacy_file);
        }
    }

    Err(Error::wrong_format(format!(
        "bundle {} contains no recognized database",
        path.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn bundled(create: bool) -> DatabaseConfig {
        let mut flags = DatabaseFlags::BUNDLED;
        if create {
            flags |= DatabaseFlags::CREATE;
        }
        DatabaseConfig::new().flags(flags)
    }

    #[test]
    fn non_bundled_path_passes_through() {
        let mut config = DatabaseConfig::new();
        let resolved = resolve_database_path(Path::new("/tmp/plain.db"), &mut config).unwrap();
        assert_eq!(resolved, Path::new("/tmp/plain.db"));
        assert_eq!(config.storage_engine.as_deref(), Some("SQLite"));
    }

    #[test]
    fn create_makes_directory_and_defaults_to_sqlite() {
        let dir = tempdir().unwrap();
        let bundle = dir.path().join("db");
        let mut config = bundled(true);

        let resolved = resolve_database_path(&bundle, &mut config).unwrap();
        assert!(bundle.is_dir());
        assert_eq!(resolved, bundle.join("db.sqlite3"));
        assert_eq!(config.storage_engine.as_deref(), Some("SQLite"));
    }

    #[test]
    fn missing_bundle_without_create_is_not_found() {
        let dir = tempdir().unwrap();
        let mut config = bundled(false);
        let result = resolve_database_path(&dir.path().join("absent"), &mut config);
        assert!(matches!(result.err(), Some(Error::NotFound)));
    }

    #[test]
    fn bundle_path_that_is_a_file_is_wrong_format() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("notadir");
        fs::write(&file, b"x").unwrap();
        let mut config = bundled(false);
        let result = resolve_database_path(&file, &mut config);
        assert!(matches!(result.err(), Some(Error::WrongFormat(_))));
    }

    #[test]
    fn unknown_engine_tag_is_invalid_parameter() {
        let dir = tempdir().unwrap();
        let bundle = dir.path().join("db");
        let mut config = bundled(true).storage_engine("LevelDB");
        let result = resolve_database_path(&bundle, &mut config);
        assert!(matches!(result.err(), Some(Error::InvalidParameter(_))));
    }

    #[test]
    fn legacy_bundle_adopted_when_unspecified() {
        let dir = tempdir().unwrap();
        let bundle = dir.path().join("db");
        fs::create_dir(&bundle).unwrap();
        fs::write(bundle.join("db.forestdb"), b"").unwrap();

        let mut config = bundled(false);
        let resolved = resolve_database_path(&bundle, &mut config).unwrap();
        assert_eq!(resolved, bundle.join("db.forestdb"));
        assert_eq!(config.storage_engine.as_deref(), Some("ForestDB"));
    }

    #[test]
    fn legacy_bundle_with_explicit_sqlite_is_wrong_format() {
        let dir = tempdir().unwrap();
        let bundle = dir.path().join("db");
        fs::create_dir(&bundle).unwrap();
        fs::write(bundle.join("db.forestdb"), b"").unwrap();

        let mut config = bundled(false).storage_engine("SQLite");
        let result = resolve_database_path(&bundle, &mut config);
        assert!(matches!(result.err(), Some(Error::WrongFormat(_))));
    }

    #[test]
    fn empty_existing_bundle_without_preference_is_wrong_format() {
        let dir = tempdir().unwrap();
        let bundle = dir.path().join("db");
        fs::create_dir(&bundle).unwrap();

        let mut config = bundled(false);
        let result = resolve_database_path(&bundle, &mut config);
        assert!(matches!(result.err(), Some(Error::WrongFormat(_))));
    }

    #[test]
    fn existing_sqlite_bundle_resolves() {
        let dir = tempdir().unwrap();
        let bundle = dir.path().join("db");
        fs::create_dir(&bundle).unwrap();
        fs::write(bundle.join("db.sqlite3"), b"").unwrap();

        let mut config = bundled(false);
        let resolved = resolve_database_path(&bundle, &mut config).unwrap();
        assert_eq!(resolved, bundle.join("db.sqlite3"));
        assert_eq!(config.storage_engine.as_deref(), Some("SQLite"));
    }
}
