use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use pixload_core::{ByteSource, CacheKey, Metadata};
use sha2::{Digest, Sha256};
use tracing::{debug, trace, warn};

use crate::journal::{self, Parsed, Record};
use crate::{DEFAULT_APP_VERSION, DiskCacheError, IMAGE_INDEX, METADATA_INDEX, VALUE_COUNT};

const JOURNAL_FILE: &str = "journal";
const JOURNAL_FILE_TMP: &str = "journal.tmp";
const REDUNDANT_OP_COMPACT_THRESHOLD: usize = 2000;

#[derive(Debug, Clone, Copy, Default)]
struct Entry {
    lengths: [u64; VALUE_COUNT],
    readable: bool,
    editing: bool,
}

struct State {
    dir: PathBuf,
    app_version: u32,
    max_size: u64,
    entries: LruCache<String, Entry>,
    size: u64,
    journal: BufWriter<File>,
    redundant: usize,
}

/// Persistent journal-backed store of two values per key: encoded image
/// bytes and [`Metadata`].
///
/// Files are named after the SHA-256 of the cache key, so any key maps to a
/// safe filename. Writes go through an [`Editor`] that writes temporary files
/// and publishes them atomically on [`commit`](Editor::commit).
///
/// ```no_run
/// use pixload_disk::DiskCache;
///
/// let cache = DiskCache::builder()
///     .path("/var/cache/images")
///     .max_size(64 * 1024 * 1024)
///     .open()?;
/// # Ok::<(), pixload_disk::DiskCacheError>(())
/// ```
///
/// Cloning is cheap. Clones share the same journal.
#[derive(Clone)]
pub struct DiskCache {
    dir: Arc<Path>,
    state: Arc<Mutex<State>>,
}

impl std::fmt::Debug for DiskCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskCache")
            .field("dir", &self.dir)
            .field("size", &self.size())
            .field("max_size", &self.max_size())
            .finish()
    }
}

impl DiskCache {
    /// Starts building a new cache.
    pub fn builder() -> DiskCacheBuilder {
        DiskCacheBuilder::default()
    }

    /// Opens the cache in `dir`, creating it if needed.
    ///
    /// An existing journal written with a different `app_version`, or one
    /// that cannot be parsed, is discarded together with every cached file.
    pub fn open(
        dir: impl AsRef<Path>,
        app_version: u32,
        max_size: u64,
    ) -> Result<Self, DiskCacheError> {
        let state = State::open(dir.as_ref().to_path_buf(), app_version, max_size)?;
        Ok(Self {
            dir: Arc::from(dir.as_ref()),
            state: Arc::new(Mutex::new(state)),
        })
    }

    /// Returns the filename stem used for `key`.
    pub fn hash_key(key: &CacheKey) -> String {
        hex::encode(Sha256::digest(key.to_string().as_bytes()))
    }

    /// Returns the cache directory.
    pub fn directory(&self) -> &Path {
        &self.dir
    }

    /// Returns a snapshot of the committed entry for `key`.
    pub fn get(&self, key: &CacheKey) -> Result<Option<Snapshot>, DiskCacheError> {
        let hashed = Self::hash_key(key);
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let lengths = match state.entries.get(&hashed) {
            Some(entry) if entry.readable => entry.lengths,
            _ => return Ok(None),
        };
        let paths: [PathBuf; VALUE_COUNT] =
            std::array::from_fn(|i| clean_path(&state.dir, &hashed, i));
        if paths.iter().any(|path| !path.exists()) {
            debug!(key = %hashed, "disk cache entry files are missing");
            return Ok(None);
        }

        state.redundant += 1;
        state.append(&Record::Read(hashed.clone()))?;
        state.compact_if_needed()?;

        Ok(Some(Snapshot {
            key: hashed,
            paths,
            lengths,
        }))
    }

    /// Returns `true` if a committed entry exists for `key`.
    pub fn contains(&self, key: &CacheKey) -> bool {
        let hashed = Self::hash_key(key);
        self.state
            .lock()
            .entries
            .peek(&hashed)
            .is_some_and(|entry| entry.readable)
    }

    /// Opens an editor for `key`.
    ///
    /// Fails with [`DiskCacheError::ConcurrentEdit`] while another editor for
    /// the same key is open.
    pub fn edit(&self, key: &CacheKey) -> Result<Editor, DiskCacheError> {
        let hashed = Self::hash_key(key);
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if state.entries.peek(&hashed).is_some_and(|entry| entry.editing) {
            return Err(DiskCacheError::ConcurrentEdit(hashed));
        }
        state.append(&Record::Dirty(hashed.clone()))?;
        match state.entries.get_mut(&hashed) {
            Some(entry) => entry.editing = true,
            None => {
                state.entries.put(
                    hashed.clone(),
                    Entry {
                        editing: true,
                        ..Entry::default()
                    },
                );
            }
        }

        Ok(Editor {
            cache: self.clone(),
            key: hashed,
            written: [false; VALUE_COUNT],
            done: false,
        })
    }

    /// Removes the entry for `key`. Entries being edited are not removed.
    pub fn remove(&self, key: &CacheKey) -> Result<bool, DiskCacheError> {
        let hashed = Self::hash_key(key);
        let mut state = self.state.lock();
        let removed = state.remove_entry(&hashed)?;
        state.compact_if_needed()?;
        Ok(removed)
    }

    /// Returns the bytes used by committed values.
    pub fn size(&self) -> u64 {
        self.state.lock().size
    }

    /// Returns the size limit.
    pub fn max_size(&self) -> u64 {
        self.state.lock().max_size
    }

    /// Returns the number of entries, including ones being created.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Returns `true` if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flushes buffered journal records.
    pub fn flush(&self) -> Result<(), DiskCacheError> {
        self.state.lock().journal.flush()?;
        Ok(())
    }

    fn dirty_path(&self, key: &str, index: usize) -> PathBuf {
        dirty_path(&self.dir, key, index)
    }

    fn complete_edit(
        &self,
        key: &str,
        written: [bool; VALUE_COUNT],
        success: bool,
    ) -> Result<(), DiskCacheError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let Some(mut entry) = state.entries.peek(key).copied() else {
            for index in 0..VALUE_COUNT {
                remove_if_exists(&dirty_path(&state.dir, key, index))?;
            }
            return Ok(());
        };

        let missing = if success && !entry.readable {
            (0..VALUE_COUNT).find(|&index| !written[index])
        } else {
            None
        };
        let success = success && missing.is_none();

        let promoted = if success {
            state.promote(key, &mut entry, written)
        } else {
            Ok(())
        };
        for index in 0..VALUE_COUNT {
            if let Err(e) = remove_if_exists(&dirty_path(&state.dir, key, index)) {
                warn!(key, index, error = %e, "failed to delete temporary cache file");
            }
        }

        entry.editing = false;
        state.redundant += 1;
        match promoted {
            Ok(()) if success || entry.readable => {
                entry.readable = true;
                if let Some(slot) = state.entries.peek_mut(key) {
                    *slot = entry;
                }
                state.append(&Record::Clean(key.to_owned(), entry.lengths))?;
                trace!(key, "committed disk cache entry");
            }
            Ok(()) => {
                state.entries.pop(key);
                state.append(&Record::Remove(key.to_owned()))?;
            }
            Err(e) => {
                if let Some(slot) = state.entries.peek_mut(key) {
                    *slot = entry;
                }
                state.remove_entry(key)?;
                return Err(e.into());
            }
        }

        state.trim_to_size()?;
        state.compact_if_needed()?;

        match missing {
            Some(index) => Err(DiskCacheError::MissingValue {
                key: key.to_owned(),
                index,
            }),
            None => Ok(()),
        }
    }
}

impl State {
    fn open(dir: PathBuf, app_version: u32, max_size: u64) -> Result<Self, DiskCacheError> {
        fs::create_dir_all(&dir)?;
        let journal_path = dir.join(JOURNAL_FILE);

        let contents = match fs::read_to_string(&journal_path) {
            Ok(contents) => Some(contents),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) if e.kind() == io::ErrorKind::InvalidData => Some(String::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = LruCache::unbounded();
        let mut redundant = 0;
        let mut needs_rebuild = true;
        match contents.map(|contents| journal::parse(&contents, app_version)) {
            Some(Parsed::Valid { records, torn }) => {
                let count = records.len();
                for record in records {
                    replay(&mut entries, record);
                }
                redundant = count.saturating_sub(entries.len());
                needs_rebuild = torn;
            }
            Some(Parsed::Invalid(reason)) => {
                warn!(dir = %dir.display(), %reason, "discarding disk cache");
                clear_dir(&dir)?;
            }
            None => debug!(dir = %dir.display(), "creating disk cache"),
        }

        // Edits interrupted by a crash never committed
        let mut size = 0;
        let mut dangling = Vec::new();
        for (key, entry) in entries.iter() {
            if entry.editing || !entry.readable {
                dangling.push(key.clone());
            } else {
                size += entry.lengths.iter().sum::<u64>();
            }
        }
        for key in dangling {
            entries.pop(&key);
            for index in 0..VALUE_COUNT {
                remove_if_exists(&clean_path(&dir, &key, index))?;
                remove_if_exists(&dirty_path(&dir, &key, index))?;
            }
            needs_rebuild = true;
        }

        let journal = open_append(&journal_path)?;
        let mut state = State {
            dir,
            app_version,
            max_size,
            entries,
            size,
            journal,
            redundant,
        };
        if needs_rebuild {
            state.rebuild_journal()?;
        }
        state.trim_to_size()?;
        Ok(state)
    }

    fn append(&mut self, record: &Record) -> io::Result<()> {
        writeln!(self.journal, "{record}")?;
        self.journal.flush()
    }

    fn promote(
        &mut self,
        key: &str,
        entry: &mut Entry,
        written: [bool; VALUE_COUNT],
    ) -> io::Result<()> {
        for (index, written) in written.into_iter().enumerate() {
            if !written {
                continue;
            }
            let clean = clean_path(&self.dir, key, index);
            fs::rename(dirty_path(&self.dir, key, index), &clean)?;
            let length = fs::metadata(&clean)?.len();
            self.size = self.size - entry.lengths[index] + length;
            entry.lengths[index] = length;
        }
        Ok(())
    }

    fn remove_entry(&mut self, key: &str) -> Result<bool, DiskCacheError> {
        let Some(entry) = self.entries.peek(key).copied() else {
            return Ok(false);
        };
        if entry.editing {
            return Ok(false);
        }

        for index in 0..VALUE_COUNT {
            remove_if_exists(&clean_path(&self.dir, key, index))?;
        }
        self.size -= entry.lengths.iter().sum::<u64>();
        self.entries.pop(key);
        self.redundant += 1;
        self.append(&Record::Remove(key.to_owned()))?;
        Ok(true)
    }

    fn trim_to_size(&mut self) -> Result<(), DiskCacheError> {
        while self.size > self.max_size {
            let victim = self
                .entries
                .iter()
                .rev()
                .find(|(_, entry)| !entry.editing)
                .map(|(key, _)| key.clone());
            let Some(key) = victim else {
                break;
            };
            trace!(key = %key, "evicting disk cache entry");
            self.remove_entry(&key)?;
        }
        Ok(())
    }

    fn compact_if_needed(&mut self) -> Result<(), DiskCacheError> {
        if self.redundant >= REDUNDANT_OP_COMPACT_THRESHOLD
            && self.redundant >= self.entries.len()
        {
            self.rebuild_journal()?;
        }
        Ok(())
    }

    fn rebuild_journal(&mut self) -> Result<(), DiskCacheError> {
        debug!(
            dir = %self.dir.display(),
            entries = self.entries.len(),
            "rebuilding disk cache journal"
        );
        self.journal.flush()?;

        let tmp = self.dir.join(JOURNAL_FILE_TMP);
        {
            let mut w = BufWriter::new(File::create(&tmp)?);
            journal::write_header(&mut w, self.app_version)?;
            for (key, entry) in self.entries.iter().rev() {
                let record = if entry.editing {
                    Record::Dirty(key.clone())
                } else {
                    Record::Clean(key.clone(), entry.lengths)
                };
                writeln!(w, "{record}")?;
            }
            w.flush()?;
        }
        let path = self.dir.join(JOURNAL_FILE);
        fs::rename(&tmp, &path)?;

        self.journal = open_append(&path)?;
        self.redundant = 0;
        Ok(())
    }
}

fn replay(entries: &mut LruCache<String, Entry>, record: Record) {
    match record {
        Record::Dirty(key) => match entries.get_mut(&key) {
            Some(entry) => entry.editing = true,
            None => {
                entries.put(
                    key,
                    Entry {
                        editing: true,
                        ..Entry::default()
                    },
                );
            }
        },
        Record::Clean(key, lengths) => {
            entries.put(
                key,
                Entry {
                    lengths,
                    readable: true,
                    editing: false,
                },
            );
        }
        Record::Remove(key) => {
            entries.pop(&key);
        }
        Record::Read(key) => {
            entries.get(&key);
        }
    }
}

fn clean_path(dir: &Path, key: &str, index: usize) -> PathBuf {
    dir.join(format!("{key}.{index}"))
}

fn dirty_path(dir: &Path, key: &str, index: usize) -> PathBuf {
    dir.join(format!("{key}.{index}.tmp"))
}

fn open_append(path: &Path) -> io::Result<BufWriter<File>> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(BufWriter::new(file))
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

fn clear_dir(dir: &Path) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            remove_if_exists(&entry.path())?;
        }
    }
    Ok(())
}

/// Read-only view of a committed entry.
#[derive(Debug, Clone)]
pub struct Snapshot {
    key: String,
    paths: [PathBuf; VALUE_COUNT],
    lengths: [u64; VALUE_COUNT],
}

impl Snapshot {
    /// Returns the hashed key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the length of the value at `index`.
    pub fn length(&self, index: usize) -> Option<u64> {
        self.lengths.get(index).copied()
    }

    /// Returns a lazily opened source for the value at `index`.
    pub fn source(&self, index: usize) -> Option<ByteSource> {
        let path = self.paths.get(index)?;
        Some(ByteSource::file(path, self.lengths[index]))
    }

    /// Returns a lazily opened source for the image bytes.
    pub fn image(&self) -> ByteSource {
        ByteSource::file(&self.paths[IMAGE_INDEX], self.lengths[IMAGE_INDEX])
    }

    /// Reads the value at `index`.
    pub fn read(&self, index: usize) -> Result<Vec<u8>, DiskCacheError> {
        let path = self.paths.get(index).ok_or(DiskCacheError::InvalidIndex(index))?;
        Ok(fs::read(path)?)
    }

    /// Reads and decodes the stored metadata.
    pub fn metadata(&self) -> Result<Metadata, DiskCacheError> {
        let bytes = self.read(METADATA_INDEX)?;
        Ok(Metadata::from_slice(&bytes)?)
    }
}

/// Pending write to one entry.
///
/// Values that are not written keep their committed contents. Dropping an
/// editor without committing aborts it.
pub struct Editor {
    cache: DiskCache,
    key: String,
    written: [bool; VALUE_COUNT],
    done: bool,
}

impl std::fmt::Debug for Editor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Editor")
            .field("key", &self.key)
            .field("written", &self.written)
            .finish()
    }
}

impl Editor {
    /// Returns the hashed key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Writes the value at `index`.
    pub fn set(&mut self, index: usize, data: &[u8]) -> Result<(), DiskCacheError> {
        self.copy_from(index, &mut &*data)?;
        Ok(())
    }

    /// Streams the value at `index` from `reader`, returning the bytes written.
    pub fn copy_from<R: Read + ?Sized>(
        &mut self,
        index: usize,
        reader: &mut R,
    ) -> Result<u64, DiskCacheError> {
        if index >= VALUE_COUNT {
            return Err(DiskCacheError::InvalidIndex(index));
        }
        let mut w = BufWriter::new(File::create(self.cache.dirty_path(&self.key, index))?);
        let written = io::copy(reader, &mut w)?;
        w.flush()?;
        self.written[index] = true;
        Ok(written)
    }

    /// Writes the image bytes.
    pub fn set_image(&mut self, data: &[u8]) -> Result<(), DiskCacheError> {
        self.set(IMAGE_INDEX, data)
    }

    /// Encodes and writes the metadata.
    pub fn set_metadata(&mut self, metadata: &Metadata) -> Result<(), DiskCacheError> {
        let bytes = metadata.to_bytes()?;
        self.set(METADATA_INDEX, &bytes)
    }

    /// Publishes the written values.
    ///
    /// A new entry must have every value written.
    pub fn commit(mut self) -> Result<(), DiskCacheError> {
        self.done = true;
        self.cache.complete_edit(&self.key, self.written, true)
    }

    /// Discards the written values.
    pub fn abort(mut self) -> Result<(), DiskCacheError> {
        self.done = true;
        self.cache.complete_edit(&self.key, self.written, false)
    }
}

impl Drop for Editor {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        if let Err(e) = self.cache.complete_edit(&self.key, self.written, false) {
            warn!(key = %self.key, error = %e, "failed to abort disk cache edit");
        }
    }
}

/// Builder for [`DiskCache`].
#[derive(Debug, Clone)]
pub struct DiskCacheBuilder {
    path: Option<PathBuf>,
    max_size: u64,
    app_version: u32,
}

impl Default for DiskCacheBuilder {
    fn default() -> Self {
        Self {
            path: None,
            max_size: 10 * 1024 * 1024,
            app_version: DEFAULT_APP_VERSION,
        }
    }
}

impl DiskCacheBuilder {
    /// Sets the cache directory. Required.
    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Sets the size limit in bytes. Defaults to 10 MiB.
    pub fn max_size(mut self, bytes: u64) -> Self {
        self.max_size = bytes;
        self
    }

    /// Sets the schema version. Journals written with another version are
    /// discarded on open.
    pub fn app_version(mut self, version: u32) -> Self {
        self.app_version = version;
        self
    }

    /// Opens the cache.
    pub fn open(self) -> Result<DiskCache, DiskCacheError> {
        let path = self
            .path
            .ok_or_else(|| DiskCacheError::InvalidConfig("cache directory is not set".into()))?;
        if self.max_size == 0 {
            return Err(DiskCacheError::InvalidConfig("max_size must be positive".into()));
        }
        DiskCache::open(path, self.app_version, self.max_size)
    }
}
