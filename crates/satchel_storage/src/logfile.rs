//! Built-in single-file record-log engine.
//!
//! File layout:
//!
//! ```text
//! [magic 4][format u16][algorithm u8][reserved u8]      # plaintext header
//! [frame len u32][frame bytes] ...                      # one frame per commit
//! ```
//!
//! Each frame is one committed transaction batch. Unencrypted frames end
//! with a truncated SHA-256 digest; encrypted frames are AES-256-GCM
//! sealed (nonce || ciphertext || tag) and rely on the GCM tag for
//! integrity. On open the log is replayed into per-store ordered maps; a
//! torn trailing frame ends replay and is truncated away.

use crate::crypto::{EncryptionAlgorithm, EncryptionKey, FrameCipher};
use crate::datafile::{
    DataFile, DataFileOptions, EngineTransaction, KeyStore, OnCompactCallback,
};
use crate::error::{StorageError, StorageResult};
use crate::record::{Content, EnumerateOptions, Record};
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

const MAGIC: [u8; 4] = *b"SCHL";
const FORMAT_VERSION: u16 = 1;
const HEADER_SIZE: usize = 8;
const DIGEST_SIZE: usize = 8;

const OP_PUT: u8 = 1;
const OP_DEL: u8 = 2;
const OP_STORE_SEQ: u8 = 3;

/// Paths with a live data file in this process. A second open of the same
/// path fails with `Locked` without touching the filesystem.
fn open_paths() -> &'static Mutex<HashSet<PathBuf>> {
    static OPEN_PATHS: OnceLock<Mutex<HashSet<PathBuf>>> = OnceLock::new();
    OPEN_PATHS.get_or_init(|| Mutex::new(HashSet::new()))
}

fn register_path(path: &Path) -> StorageResult<()> {
    let mut paths = open_paths().lock();
    if !paths.insert(path.to_path_buf()) {
        return Err(StorageError::locked(path.display().to_string()));
    }
    Ok(())
}

fn unregister_path(path: &Path) {
    open_paths().lock().remove(path);
}

#[derive(Debug, Clone, Default)]
struct StoredRecord {
    meta: Vec<u8>,
    body: Vec<u8>,
    sequence: u64,
}

#[derive(Debug, Default)]
struct StoreState {
    records: BTreeMap<Vec<u8>, StoredRecord>,
    last_sequence: u64,
}

struct LogState {
    file: Option<File>,
    stores: BTreeMap<String, StoreState>,
    algorithm: EncryptionAlgorithm,
    cipher: Option<FrameCipher>,
}

struct LogInner {
    path: PathBuf,
    options: DataFileOptions,
    state: RwLock<LogState>,
    txn_active: AtomicBool,
    compacting: AtomicBool,
    on_compact: Mutex<Option<OnCompactCallback>>,
}

impl Drop for LogInner {
    fn drop(&mut self) {
        if self.state.get_mut().file.is_some() {
            unregister_path(&self.path);
        }
    }
}

/// The built-in record-log data file.
pub struct LogDataFile {
    inner: Arc<LogInner>,
}

impl LogDataFile {
    /// Opens or creates a record log at `path`.
    pub fn open(path: &Path, options: DataFileOptions) -> StorageResult<Self> {
        match (&options.encryption_algorithm, &options.encryption_key) {
            (EncryptionAlgorithm::None, Some(_)) => {
                return Err(StorageError::encryption(
                    "encryption key supplied without an algorithm",
                ));
            }
            (EncryptionAlgorithm::Aes256, None) => {
                return Err(StorageError::encryption(
                    "AES-256 requested without a key",
                ));
            }
            _ => {}
        }

        register_path(path)?;
        match Self::open_inner(path, options) {
            Ok(db) => Ok(db),
            Err(e) => {
                unregister_path(path);
                Err(e)
            }
        }
    }

    fn open_inner(path: &Path, options: DataFileOptions) -> StorageResult<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(options.writeable)
            .create(options.create && options.writeable)
            .truncate(false)
            .open(path)?;
        file.try_lock_exclusive()
            .map_err(|_| StorageError::locked(path.display().to_string()))?;

        let cipher = options.encryption_key.as_ref().map(FrameCipher::new);
        let mut state = LogState {
            file: None,
            stores: BTreeMap::new(),
            algorithm: options.encryption_algorithm,
            cipher,
        };

        let len = file.metadata()?.len();
        if len == 0 {
            if options.writeable {
                write_header(&mut file, state.algorithm)?;
                file.sync_all()?;
            }
        } else {
            let mut raw = Vec::with_capacity(len as usize);
            file.read_to_end(&mut raw)?;
            let valid_end = replay(&raw, &mut state)?;
            if options.writeable && (valid_end as u64) < len {
                tracing::debug!(path = %path.display(), at = valid_end, "truncating torn log tail");
                file.set_len(valid_end as u64)?;
            }
        }

        file.seek(SeekFrom::End(0))?;
        state.file = Some(file);
        tracing::debug!(path = %path.display(), stores = state.stores.len(), "opened data file");

        Ok(Self {
            inner: Arc::new(LogInner {
                path: path.to_path_buf(),
                options,
                state: RwLock::new(state),
                txn_active: AtomicBool::new(false),
                compacting: AtomicBool::new(false),
                on_compact: Mutex::new(None),
            }),
        })
    }

    /// Removes the on-disk file at `path` without opening it.
    ///
    /// Missing files are not an error. Fails with `Locked` if a live data
    /// file in this process owns the path.
    pub fn delete_at_path(path: &Path) -> StorageResult<()> {
        if open_paths().lock().contains(path) {
            return Err(StorageError::locked(path.display().to_string()));
        }
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Releases the engine's process-wide state. Idempotent; undefined if
    /// data files are still open.
    pub fn shutdown_engine() -> StorageResult<()> {
        let mut paths = open_paths().lock();
        if !paths.is_empty() {
            tracing::warn!(open = paths.len(), "engine shutdown with data files still open");
        }
        paths.clear();
        Ok(())
    }
}

impl DataFile for LogDataFile {
    fn file_path(&self) -> &Path {
        &self.inner.path
    }

    fn options(&self) -> &DataFileOptions {
        &self.inner.options
    }

    fn is_open(&self) -> bool {
        self.inner.state.read().file.is_some()
    }

    fn close(&self) -> StorageResult<()> {
        let mut state = self.inner.state.write();
        if let Some(file) = state.file.take() {
            let synced = file.sync_all();
            state.stores.clear();
            unregister_path(&self.inner.path);
            tracing::debug!(path = %self.inner.path.display(), "closed data file");
            synced?;
        }
        Ok(())
    }

    fn delete_data_file(&self) -> StorageResult<()> {
        self.close()?;
        match fs::remove_file(&self.inner.path) {
            Ok(()) => {
                tracing::debug!(path = %self.inner.path.display(), "deleted data file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn compact(&self) -> StorageResult<()> {
        self.inner.compacting.store(true, Ordering::SeqCst);
        self.notify_compact(true);

        let result = (|| {
            let mut state = self.inner.state.write();
            if state.file.is_none() {
                return Err(StorageError::Closed);
            }
            rewrite_locked(
                &self.inner.path,
                &mut state,
                self.inner.options.writeable,
                None,
            )
        })();

        self.notify_compact(false);
        self.inner.compacting.store(false, Ordering::SeqCst);
        if result.is_ok() {
            tracing::debug!(path = %self.inner.path.display(), "compacted data file");
        }
        result
    }

    fn is_compacting(&self) -> bool {
        self.inner.compacting.load(Ordering::SeqCst)
    }

    fn rekey(
        &self,
        algorithm: EncryptionAlgorithm,
        key: Option<EncryptionKey>,
    ) -> StorageResult<()> {
        let cipher = match (algorithm, &key) {
            (EncryptionAlgorithm::None, None) => None,
            (EncryptionAlgorithm::Aes256, Some(k)) => Some(FrameCipher::new(k)),
            (EncryptionAlgorithm::None, Some(_)) => {
                return Err(StorageError::encryption(
                    "encryption key supplied without an algorithm",
                ));
            }
            (EncryptionAlgorithm::Aes256, None) => {
                return Err(StorageError::encryption("AES-256 requested without a key"));
            }
        };

        let mut state = self.inner.state.write();
        if state.file.is_none() {
            return Err(StorageError::Closed);
        }
        rewrite_locked(
            &self.inner.path,
            &mut state,
            self.inner.options.writeable,
            Some((algorithm, cipher)),
        )?;
        tracing::info!(path = %self.inner.path.display(), "rekeyed data file");
        Ok(())
    }

    fn key_store(&self, name: &str) -> StorageResult<Box<dyn KeyStore>> {
        let mut state = self.inner.state.write();
        if state.file.is_none() {
            return Err(StorageError::Closed);
        }
        state.stores.entry(name.to_string()).or_default();
        Ok(Box::new(LogKeyStore {
            inner: Arc::clone(&self.inner),
            name: name.to_string(),
        }))
    }

    fn key_store_names(&self) -> StorageResult<Vec<String>> {
        let state = self.inner.state.read();
        if state.file.is_none() {
            return Err(StorageError::Closed);
        }
        Ok(state.stores.keys().cloned().collect())
    }

    fn begin_transaction(&self) -> StorageResult<Box<dyn EngineTransaction>> {
        if !self.is_open() {
            return Err(StorageError::Closed);
        }
        if self
            .inner
            .txn_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(StorageError::TransactionActive);
        }
        Ok(Box::new(LogTransaction {
            inner: Arc::clone(&self.inner),
            pending: Vec::new(),
            finished: false,
        }))
    }

    fn set_on_compact(&self, callback: Option<OnCompactCallback>) {
        *self.inner.on_compact.lock() = callback;
    }
}

impl LogDataFile {
    fn notify_compact(&self, starting: bool) {
        let guard = self.inner.on_compact.lock();
        if let Some(cb) = guard.as_ref() {
            cb(starting);
        }
    }
}

struct LogKeyStore {
    inner: Arc<LogInner>,
    name: String,
}

impl KeyStore for LogKeyStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &[u8]) -> StorageResult<Option<Record>> {
        let state = self.inner.state.read();
        if state.file.is_none() {
            return Err(StorageError::Closed);
        }
        Ok(state.stores.get(&self.name).and_then(|store| {
            store.records.get(key).map(|rec| Record {
                key: key.to_vec(),
                meta: rec.meta.clone(),
                body: rec.body.clone(),
                sequence: rec.sequence,
            })
        }))
    }

    fn last_sequence(&self) -> StorageResult<u64> {
        let state = self.inner.state.read();
        if state.file.is_none() {
            return Err(StorageError::Closed);
        }
        Ok(state
            .stores
            .get(&self.name)
            .map_or(0, |store| store.last_sequence))
    }

    fn enumerate(&self, options: &EnumerateOptions) -> StorageResult<Vec<Record>> {
        let state = self.inner.state.read();
        if state.file.is_none() {
            return Err(StorageError::Closed);
        }
        let Some(store) = state.stores.get(&self.name) else {
            return Ok(Vec::new());
        };
        if let (Some(start), Some(end)) = (&options.start, &options.end) {
            if start > end {
                return Ok(Vec::new());
            }
        }

        let lo: Bound<&[u8]> = options
            .start
            .as_deref()
            .map_or(Bound::Unbounded, Bound::Included);
        let hi: Bound<&[u8]> = options
            .end
            .as_deref()
            .map_or(Bound::Unbounded, Bound::Included);

        let materialize = |(key, rec): (&Vec<u8>, &StoredRecord)| Record {
            key: key.clone(),
            meta: match options.content {
                Content::None => Vec::new(),
                _ => rec.meta.clone(),
            },
            body: match options.content {
                Content::Full => rec.body.clone(),
                _ => Vec::new(),
            },
            sequence: rec.sequence,
        };

        let range = store.records.range::<[u8], _>((lo, hi));
        let records = if options.descending {
            range.rev().map(materialize).collect()
        } else {
            range.map(materialize).collect()
        };
        Ok(records)
    }
}

enum PendingOp {
    Put {
        store: String,
        key: Vec<u8>,
        meta: Vec<u8>,
        body: Vec<u8>,
    },
    Del {
        store: String,
        key: Vec<u8>,
    },
}

struct LogTransaction {
    inner: Arc<LogInner>,
    pending: Vec<PendingOp>,
    finished: bool,
}

impl LogTransaction {
    /// Key visibility at this point in the transaction: staged writes
    /// shadow committed state.
    fn key_exists(&self, store: &str, key: &[u8]) -> bool {
        for op in self.pending.iter().rev() {
            match op {
                PendingOp::Put { store: s, key: k, .. } if s == store && k == key => return true,
                PendingOp::Del { store: s, key: k } if s == store && k == key => return false,
                _ => {}
            }
        }
        self.inner
            .state
            .read()
            .stores
            .get(store)
            .is_some_and(|s| s.records.contains_key(key))
    }

    fn finish(&mut self) {
        self.finished = true;
        self.inner.txn_active.store(false, Ordering::SeqCst);
    }

    fn apply_pending(&mut self) -> StorageResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let mut state = self.inner.state.write();
        if state.file.is_none() {
            return Err(StorageError::Closed);
        }

        // Assign sequences first so the frame and the in-memory apply
        // agree, then write the frame, then mutate. A failed write leaves
        // the committed state untouched.
        let frame_bytes = {
            let mut next_seq: BTreeMap<&str, u64> = BTreeMap::new();
            let mut frame = FrameWriter::new(self.pending.len() as u32);
            for op in &self.pending {
                match op {
                    PendingOp::Put {
                        store,
                        key,
                        meta,
                        body,
                    } => {
                        let seq = next_seq.entry(store.as_str()).or_insert_with(|| {
                            state.stores.get(store.as_str()).map_or(0, |s| s.last_sequence)
                        });
                        *seq += 1;
                        frame.put(store, key, meta, body, *seq);
                    }
                    PendingOp::Del { store, key } => frame.del(store, key),
                }
            }
            frame.finish()
        };
        append_frame(&mut state, &frame_bytes)?;

        let mut next_seq: BTreeMap<String, u64> = BTreeMap::new();
        for op in self.pending.drain(..) {
            match op {
                PendingOp::Put {
                    store,
                    key,
                    meta,
                    body,
                } => {
                    let entry = state.stores.entry(store.clone()).or_default();
                    let seq = next_seq.entry(store).or_insert(entry.last_sequence);
                    *seq += 1;
                    entry.last_sequence = *seq;
                    entry.records.insert(
                        key,
                        StoredRecord {
                            meta,
                            body,
                            sequence: *seq,
                        },
                    );
                }
                PendingOp::Del { store, key } => {
                    if let Some(entry) = state.stores.get_mut(&store) {
                        entry.records.remove(&key);
                    }
                }
            }
        }
        Ok(())
    }
}

impl EngineTransaction for LogTransaction {
    fn set(&mut self, store: &str, key: &[u8], meta: &[u8], body: &[u8]) -> StorageResult<()> {
        self.pending.push(PendingOp::Put {
            store: store.to_string(),
            key: key.to_vec(),
            meta: meta.to_vec(),
            body: body.to_vec(),
        });
        Ok(())
    }

    fn del(&mut self, store: &str, key: &[u8]) -> StorageResult<bool> {
        let existed = self.key_exists(store, key);
        if existed {
            self.pending.push(PendingOp::Del {
                store: store.to_string(),
                key: key.to_vec(),
            });
        }
        Ok(existed)
    }

    fn commit(mut self: Box<Self>) -> StorageResult<()> {
        let result = self.apply_pending();
        self.finish();
        result
    }

    fn abort(mut self: Box<Self>) -> StorageResult<()> {
        self.pending.clear();
        self.finish();
        Ok(())
    }
}

impl Drop for LogTransaction {
    fn drop(&mut self) {
        if !self.finished {
            self.finish();
        }
    }
}

// ---------------------------------------------------------------------------
// Frame encoding
// ---------------------------------------------------------------------------

struct FrameWriter {
    buf: Vec<u8>,
}

impl FrameWriter {
    fn new(op_count: u32) -> Self {
        let mut buf = Vec::new();
        buf.extend_from_slice(&op_count.to_le_bytes());
        Self { buf }
    }

    fn put(&mut self, store: &str, key: &[u8], meta: &[u8], body: &[u8], sequence: u64) {
        self.buf.push(OP_PUT);
        self.name(store);
        self.bytes(key);
        self.bytes(meta);
        self.bytes(body);
        self.buf.extend_from_slice(&sequence.to_le_bytes());
    }

    fn del(&mut self, store: &str, key: &[u8]) {
        self.buf.push(OP_DEL);
        self.name(store);
        self.bytes(key);
    }

    fn store_seq(&mut self, store: &str, sequence: u64) {
        self.buf.push(OP_STORE_SEQ);
        self.name(store);
        self.buf.extend_from_slice(&sequence.to_le_bytes());
    }

    fn name(&mut self, s: &str) {
        self.buf
            .extend_from_slice(&(s.len() as u16).to_le_bytes());
        self.buf.extend_from_slice(s.as_bytes());
    }

    fn bytes(&mut self, b: &[u8]) {
        self.buf
            .extend_from_slice(&(b.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(b);
    }

    fn finish(self) -> Vec<u8> {
        self.buf
    }
}

struct FrameReader<'a> {
    buf: &'a [u8],
}

impl<'a> FrameReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn take(&mut self, n: usize) -> StorageResult<&'a [u8]> {
        if self.buf.len() < n {
            return Err(StorageError::corrupted("frame truncated"));
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn u8(&mut self) -> StorageResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> StorageResult<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> StorageResult<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> StorageResult<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn name(&mut self) -> StorageResult<String> {
        let len = self.u16()? as usize;
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| StorageError::corrupted("store name is not UTF-8"))
    }

    fn bytes(&mut self) -> StorageResult<Vec<u8>> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }
}

fn digest8(data: &[u8]) -> [u8; DIGEST_SIZE] {
    let digest = Sha256::digest(data);
    let mut out = [0u8; DIGEST_SIZE];
    out.copy_from_slice(&digest[..DIGEST_SIZE]);
    out
}

fn write_header(file: &mut File, algorithm: EncryptionAlgorithm) -> StorageResult<()> {
    let mut header = Vec::with_capacity(HEADER_SIZE);
    header.extend_from_slice(&MAGIC);
    header.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    header.push(algorithm.as_byte());
    header.push(0);
    file.write_all(&header)?;
    Ok(())
}

/// Replays the raw file contents into `state`. Returns the offset of the
/// last intact frame; a torn tail beyond it is for the caller to truncate.
fn replay(raw: &[u8], state: &mut LogState) -> StorageResult<usize> {
    if raw.len() < HEADER_SIZE {
        return Err(StorageError::corrupted("file shorter than header"));
    }
    if raw[..4] != MAGIC {
        return Err(StorageError::corrupted("bad magic number"));
    }
    let version = u16::from_le_bytes(raw[4..6].try_into().unwrap());
    if version != FORMAT_VERSION {
        return Err(StorageError::corrupted(format!(
            "unsupported format version {version}"
        )));
    }
    let file_algorithm = EncryptionAlgorithm::from_byte(raw[6])?;
    match (file_algorithm, state.algorithm) {
        (EncryptionAlgorithm::Aes256, EncryptionAlgorithm::None) => {
            return Err(StorageError::encryption("file is encrypted"));
        }
        (EncryptionAlgorithm::None, EncryptionAlgorithm::Aes256) => {
            return Err(StorageError::encryption("file is not encrypted"));
        }
        _ => {}
    }

    let mut offset = HEADER_SIZE;
    loop {
        if raw.len() - offset < 4 {
            break;
        }
        let frame_len = u32::from_le_bytes(raw[offset..offset + 4].try_into().unwrap()) as usize;
        if raw.len() - offset - 4 < frame_len {
            break; // torn write at the tail
        }
        let stored = &raw[offset + 4..offset + 4 + frame_len];
        let plain = match &state.cipher {
            Some(cipher) => cipher.open(stored)?,
            None => {
                if stored.len() < DIGEST_SIZE {
                    return Err(StorageError::corrupted("frame shorter than digest"));
                }
                let (plain, digest) = stored.split_at(stored.len() - DIGEST_SIZE);
                if digest != digest8(plain).as_slice() {
                    return Err(StorageError::corrupted("frame digest mismatch"));
                }
                plain.to_vec()
            }
        };
        apply_frame(&plain, state)?;
        offset += 4 + frame_len;
    }
    Ok(offset)
}

fn apply_frame(plain: &[u8], state: &mut LogState) -> StorageResult<()> {
    let mut reader = FrameReader::new(plain);
    let op_count = reader.u32()?;
    for _ in 0..op_count {
        match reader.u8()? {
            OP_PUT => {
                let store = reader.name()?;
                let key = reader.bytes()?;
                let meta = reader.bytes()?;
                let body = reader.bytes()?;
                let sequence = reader.u64()?;
                let entry = state.stores.entry(store).or_default();
                entry.last_sequence = entry.last_sequence.max(sequence);
                entry.records.insert(
                    key,
                    StoredRecord {
                        meta,
                        body,
                        sequence,
                    },
                );
            }
            OP_DEL => {
                let store = reader.name()?;
                let key = reader.bytes()?;
                if let Some(entry) = state.stores.get_mut(&store) {
                    entry.records.remove(&key);
                }
            }
            OP_STORE_SEQ => {
                let store = reader.name()?;
                let sequence = reader.u64()?;
                let entry = state.stores.entry(store).or_default();
                entry.last_sequence = entry.last_sequence.max(sequence);
            }
            other => {
                return Err(StorageError::corrupted(format!(
                    "unknown frame op {other:#04x}"
                )));
            }
        }
    }
    Ok(())
}

fn append_frame(state: &mut LogState, plain: &[u8]) -> StorageResult<()> {
    let stored = match &state.cipher {
        Some(cipher) => cipher.seal(plain)?,
        None => {
            let mut out = Vec::with_capacity(plain.len() + DIGEST_SIZE);
            out.extend_from_slice(plain);
            out.extend_from_slice(&digest8(plain));
            out
        }
    };
    let file = state.file.as_mut().ok_or(StorageError::Closed)?;
    file.seek(SeekFrom::End(0))?;
    file.write_all(&(stored.len() as u32).to_le_bytes())?;
    file.write_all(&stored)?;
    file.sync_data()?;
    Ok(())
}

/// Rewrites the whole file as one snapshot frame, via a temp file and an
/// atomic rename. `new_crypto` switches algorithm and cipher (rekey); the
/// current ones are reused otherwise (compact).
fn rewrite_locked(
    path: &Path,
    state: &mut LogState,
    writeable: bool,
    new_crypto: Option<(EncryptionAlgorithm, Option<FrameCipher>)>,
) -> StorageResult<()> {
    let (algorithm, cipher) = match &new_crypto {
        Some((alg, cipher)) => (*alg, cipher.as_ref()),
        None => (state.algorithm, state.cipher.as_ref()),
    };

    let op_count = state
        .stores
        .values()
        .map(|s| s.records.len() + 1)
        .sum::<usize>() as u32;
    let mut frame = FrameWriter::new(op_count);
    for (name, store) in &state.stores {
        frame.store_seq(name, store.last_sequence);
        for (key, rec) in &store.records {
            frame.put(name, key, &rec.meta, &rec.body, rec.sequence);
        }
    }
    let plain = frame.finish();
    let stored = match cipher {
        Some(c) => c.seal(&plain)?,
        None => {
            let mut out = Vec::with_capacity(plain.len() + DIGEST_SIZE);
            out.extend_from_slice(&plain);
            out.extend_from_slice(&digest8(&plain));
            out
        }
    };

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".rewrite");
    let tmp_path = path.with_file_name(tmp_name);

    let mut tmp = File::create(&tmp_path)?;
    write_header(&mut tmp, algorithm)?;
    tmp.write_all(&(stored.len() as u32).to_le_bytes())?;
    tmp.write_all(&stored)?;
    tmp.sync_all()?;
    drop(tmp);

    fs::rename(&tmp_path, path)?;

    let mut file = OpenOptions::new().read(true).write(writeable).open(path)?;
    file.try_lock_exclusive()
        .map_err(|_| StorageError::locked(path.display().to_string()))?;
    file.seek(SeekFrom::End(0))?;
    state.file = Some(file);
    if let Some((alg, cipher)) = new_crypto {
        state.algorithm = alg;
        state.cipher = cipher;
    }
    Ok(())
}
