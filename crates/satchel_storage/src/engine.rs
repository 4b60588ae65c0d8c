//! Process-wide storage engine registry.
//!
//! Engines are addressed by tag. Two tags are registered out of the box:
//! `"SQLite"` (the default, file name `db.sqlite3`) and `"ForestDB"` (the
//! legacy format, file name `db.forestdb`). Both are currently backed by
//! the built-in record-log engine; the registry exists so that a real
//! engine can be installed behind the same tag without touching callers.

use crate::datafile::{DataFile, DataFileOptions};
use crate::error::{StorageError, StorageResult};
use crate::logfile::LogDataFile;
use parking_lot::RwLock;
use std::path::Path;
use std::sync::OnceLock;

/// Tag of the default storage engine.
pub const SQLITE_ENGINE: &str = "SQLite";
/// Tag of the legacy storage engine.
pub const FORESTDB_ENGINE: &str = "ForestDB";
/// The tag used when a caller expresses no preference.
pub const DEFAULT_ENGINE: &str = SQLITE_ENGINE;

/// A registered storage engine.
pub struct StorageEngine {
    /// Engine tag, e.g. `"SQLite"`.
    pub tag: &'static str,
    /// Canonical database file name inside a bundle.
    pub filename: &'static str,
    /// Opens a data file at the given path.
    pub open: fn(&Path, DataFileOptions) -> StorageResult<Box<dyn DataFile>>,
    /// Deletes the engine's files at the given path without opening them.
    pub delete: fn(&Path) -> StorageResult<()>,
    /// Releases the engine's process-wide state.
    pub shutdown: fn() -> StorageResult<()>,
}

fn open_log(path: &Path, options: DataFileOptions) -> StorageResult<Box<dyn DataFile>> {
    Ok(Box::new(LogDataFile::open(path, options)?))
}

fn registry() -> &'static RwLock<Vec<StorageEngine>> {
    static REGISTRY: OnceLock<RwLock<Vec<StorageEngine>>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        RwLock::new(vec![
            StorageEngine {
                tag: SQLITE_ENGINE,
                filename: "db.sqlite3",
                open: open_log,
                delete: LogDataFile::delete_at_path,
                shutdown: LogDataFile::shutdown_engine,
            },
            StorageEngine {
                tag: FORESTDB_ENGINE,
                filename: "db.forestdb",
                open: open_log,
                delete: LogDataFile::delete_at_path,
                shutdown: LogDataFile::shutdown_engine,
            },
        ])
    })
}

/// Registers an engine, replacing any existing registration with the same
/// tag.
pub fn register_engine(engine: StorageEngine) {
    let mut engines = registry().write();
    engines.retain(|e| e.tag != engine.tag);
    engines.push(engine);
}

/// Maps an engine tag to its canonical bundle file name.
#[must_use]
pub fn canonical_filename(tag: &str) -> Option<&'static str> {
    registry()
        .read()
        .iter()
        .find(|e| e.tag == tag)
        .map(|e| e.filename)
}

/// Opens a data file with the engine registered under `tag`.
///
/// Unknown tags fail with `Unimplemented`.
pub fn open_data_file(
    tag: &str,
    path: &Path,
    options: DataFileOptions,
) -> StorageResult<Box<dyn DataFile>> {
    let open = registry()
        .read()
        .iter()
        .find(|e| e.tag == tag)
        .map(|e| e.open)
        .ok_or_else(|| {
            StorageError::unimplemented(format!("no storage engine registered for tag {tag:?}"))
        })?;
    open(path, options)
}

/// Deletes an engine's files at `path` without opening them.
pub fn delete_at_path(tag: &str, path: &Path) -> StorageResult<()> {
    let delete = registry()
        .read()
        .iter()
        .find(|e| e.tag == tag)
        .map(|e| e.delete)
        .ok_or_else(|| {
            StorageError::unimplemented(format!("no storage engine registered for tag {tag:?}"))
        })?;
    delete(path)
}

/// Releases every registered engine's process-wide state.
///
/// Idempotent and safe with no live databases. Calling it while databases
/// remain open yields undefined results; close them first.
pub fn shutdown() -> StorageResult<()> {
    for engine in registry().read().iter() {
        (engine.shutdown)()?;
    }
    tracing::debug!("storage engines shut down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn builtin_filenames() {
        assert_eq!(canonical_filename(SQLITE_ENGINE), Some("db.sqlite3"));
        assert_eq!(canonical_filename(FORESTDB_ENGINE), Some("db.forestdb"));
        assert_eq!(canonical_filename("bogus"), None);
    }

    #[test]
    fn unknown_tag_is_unimplemented() {
        let dir = tempdir().unwrap();
        let result = open_data_file(
            "bogus",
            &dir.path().join("x"),
            DataFileOptions {
                create: true,
                writeable: true,
                ..DataFileOptions::default()
            },
        );
        assert!(matches!(result.err(), Some(StorageError::Unimplemented(_))));
    }

    #[test]
    fn open_by_tag_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.sqlite3");
        let db = open_data_file(
            SQLITE_ENGINE,
            &path,
            DataFileOptions {
                create: true,
                writeable: true,
                ..DataFileOptions::default()
            },
        )
        .unwrap();
        assert!(db.is_open());
        db.close().unwrap();

        delete_at_path(SQLITE_ENGINE, &path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn shutdown_is_idempotent() {
        shutdown().unwrap();
        shutdown().unwrap();
    }
}
