//! Database configuration and schema selection.

use satchel_storage::EncryptionKey;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Open-time flags for a database.
///
/// The numeric values are an implementation detail; only the names are
/// stable.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct DatabaseFlags(u32);

impl DatabaseFlags {
    /// Create the database if it does not exist.
    pub const CREATE: Self = Self(1);
    /// Open read-only.
    pub const READ_ONLY: Self = Self(2);
    /// Treat the path as a bundle directory rather than a bare file.
    pub const BUNDLED: Self = Self(4);
    /// Use the V2 schema.
    pub const V2_FORMAT: Self = Self(8);

    /// The empty flag set.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Returns true if every bit of `other` is set in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for DatabaseFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for DatabaseFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for DatabaseFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DatabaseFlags({:#06b})", self.0)
    }
}

/// Schema variant of an open database, fixed at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schema {
    /// The original schema; the default store supports get-by-offset.
    V1,
    /// The current schema.
    V2,
}

/// Configuration for opening a database.
///
/// Immutable once a handle is open; the handle stores a copy with the
/// resolved storage engine filled in.
#[derive(Debug, Clone, Default)]
pub struct DatabaseConfig {
    /// Open-time flags.
    pub flags: DatabaseFlags,
    /// Storage engine tag, or `None` to let the open resolve one.
    pub storage_engine: Option<String>,
    /// Encryption key; `None` means the file is not encrypted, `Some`
    /// means AES-256 with the given 32-byte key.
    pub encryption_key: Option<EncryptionKey>,
}

impl DatabaseConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the open-time flags.
    #[must_use]
    pub fn flags(mut self, flags: DatabaseFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Requests a specific storage engine by tag.
    #[must_use]
    pub fn storage_engine(mut self, tag: impl Into<String>) -> Self {
        self.storage_engine = Some(tag.into());
        self
    }

    /// Sets the encryption key (AES-256).
    #[must_use]
    pub fn encryption_key(mut self, key: EncryptionKey) -> Self {
        self.encryption_key = Some(key);
        self
    }

    /// The schema variant this configuration selects.
    #[must_use]
    pub fn schema(&self) -> Schema {
        if self.flags.contains(DatabaseFlags::V2_FORMAT) {
            Schema::V2
        } else {
            Schema::V1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_set_operations() {
        let flags = DatabaseFlags::CREATE | DatabaseFlags::BUNDLED;
        assert!(flags.contains(DatabaseFlags::CREATE));
        assert!(flags.contains(DatabaseFlags::BUNDLED));
        assert!(!flags.contains(DatabaseFlags::READ_ONLY));
        assert!(flags.contains(DatabaseFlags::empty()));
    }

    #[test]
    fn schema_follows_v2_flag() {
        assert_eq!(DatabaseConfig::new().schema(), Schema::V1);
        let config = DatabaseConfig::new().flags(DatabaseFlags::V2_FORMAT);
        assert_eq!(config.schema(), Schema::V2);
    }

    #[test]
    fn builder_pattern() {
        let config = DatabaseConfig::new()
            .flags(DatabaseFlags::CREATE)
            .storage_engine("SQLite");
        assert!(config.flags.contains(DatabaseFlags::CREATE));
        assert_eq!(config.storage_engine.as_deref(), Some("SQLite"));
        assert!(config.encryption_key.is_none());
    }
}
