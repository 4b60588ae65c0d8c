//! Records, document flags, and enumeration options.

use std::fmt;

/// A single record inside a key store.
///
/// `meta` and `body` may be empty; `sequence` is the per-store monotonic
/// sequence assigned when the record was last written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Record key.
    pub key: Vec<u8>,
    /// Metadata bytes. The first byte carries the document flags.
    pub meta: Vec<u8>,
    /// Record body.
    pub body: Vec<u8>,
    /// Sequence assigned at the last write.
    pub sequence: u64,
}

impl Record {
    /// Returns the document flags decoded from this record's metadata.
    ///
    /// A record returned by a lookup always reports [`DocumentFlags::EXISTS`].
    #[must_use]
    pub fn flags(&self) -> DocumentFlags {
        DocumentFlags::from_meta(&self.meta) | DocumentFlags::EXISTS
    }
}

/// Document state flags, stored in the first metadata byte.
///
/// The document layer above the engine writes these; the engine and the
/// facade only decode them (for example to skip deleted documents when
/// counting).
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct DocumentFlags(u8);

impl DocumentFlags {
    /// The document is marked deleted (a tombstone revision).
    pub const DELETED: Self = Self(0x01);
    /// The document has unresolved conflicts.
    pub const CONFLICTED: Self = Self(0x02);
    /// The document body references attachments.
    pub const HAS_ATTACHMENTS: Self = Self(0x04);
    /// The record is present in its store. Never persisted; derived.
    pub const EXISTS: Self = Self(0x08);

    /// Decodes flags from a metadata slice. Empty metadata decodes to the
    /// empty set.
    #[must_use]
    pub fn from_meta(meta: &[u8]) -> Self {
        Self(meta.first().copied().unwrap_or(0))
    }

    /// Returns true if every bit of `other` is set in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns the raw bit pattern.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }
}

impl std::ops::BitOr for DocumentFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for DocumentFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocumentFlags({:#04x})", self.0)
    }
}

/// How much of each record an enumeration should materialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Content {
    /// Keys, metadata, and bodies.
    #[default]
    Full,
    /// Keys and metadata only; bodies are left empty.
    MetaOnly,
    /// Keys only.
    None,
}

/// Options controlling a key-store enumeration.
#[derive(Debug, Clone, Default)]
pub struct EnumerateOptions {
    /// Inclusive lower key bound, or unbounded.
    pub start: Option<Vec<u8>>,
    /// Inclusive upper key bound, or unbounded.
    pub end: Option<Vec<u8>>,
    /// Enumerate in descending key order.
    pub descending: bool,
    /// How much record content to materialize.
    pub content: Content,
}

impl EnumerateOptions {
    /// Options for a full-range, metadata-only scan.
    #[must_use]
    pub fn meta_only() -> Self {
        Self {
            content: Content::MetaOnly,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_from_meta() {
        assert_eq!(DocumentFlags::from_meta(&[]).bits(), 0);
        let flags = DocumentFlags::from_meta(&[0x03, 0xff]);
        assert!(flags.contains(DocumentFlags::DELETED));
        assert!(flags.contains(DocumentFlags::CONFLICTED));
        assert!(!flags.contains(DocumentFlags::HAS_ATTACHMENTS));
    }

    #[test]
    fn record_flags_include_exists() {
        let rec = Record {
            key: b"k".to_vec(),
            meta: vec![],
            body: vec![],
            sequence: 1,
        };
        assert!(rec.flags().contains(DocumentFlags::EXISTS));
    }

    #[test]
    fn deleted_bit_round_trip() {
        let rec = Record {
            key: b"k".to_vec(),
            meta: vec![DocumentFlags::DELETED.bits()],
            body: vec![],
            sequence: 2,
        };
        assert!(rec.flags().contains(DocumentFlags::DELETED));
    }
}
