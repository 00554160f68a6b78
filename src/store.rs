//! Filesystem-backed disk store
//!
//! Persists managed-disk containers under a root directory and tracks them
//! in memory. Visible state only ever changes atomically: a put streams the
//! whole container into a temp file first (slow, no store lock), then
//! commits with a rename under the store-wide lock. A crash mid-put leaves
//! a stray temp file, never a partially-visible disk.
//!
//! ```text
//! root/
//!   uuid                      store identity
//!   session                   last issued session
//!   temp/                     in-flight puts
//!   disks/<diskID>/<date.index>/data
//!                              /digest
//!                              /attrs/<key>
//! ```
//!
//! Locking discipline: the store-wide lock covers session issuance, put
//! commits, and index reads. A per-path lock table serializes the slow
//! byte-copy work on each temp file and the writes to each attribute file,
//! so one large put never stalls unrelated operations. Random-access reads
//! of committed containers take no store lock at all; committed containers
//! are immutable and every reader owns its own cursor.

use crate::container::ManagedDisk;
use crate::descriptor::DiskDescriptor;
use crate::digest::{GrainDigest, HashAlgorithm};
use crate::error::{Result, VaultError};
use crate::sector::sectors_to_bytes;
use crate::session::Session;
use crate::stream::DEFAULT_GRAIN_SECTORS;
use chrono::{Local, NaiveDate};
use parking_lot::Mutex;
use regex::Regex;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

const UUID_FILE: &str = "uuid";
const SESSION_FILE: &str = "session";
const TEMP_DIR: &str = "temp";
const DISKS_DIR: &str = "disks";
const DATA_FILE: &str = "data";
const DIGEST_FILE: &str = "digest";
const ATTRS_DIR: &str = "attrs";

const ATTR_KEY_PATTERN: &str = r"^[A-Za-z0-9][A-Za-z0-9._-]*$";
const ATTR_KEY_MAX_LENGTH: usize = 128;

/// The store contract consumed by network proxies, FUSE exposure, and
/// search tooling. [`FsStore`] is the local implementation; a remote proxy
/// must preserve these semantics exactly, including the
/// [`VaultError::AlreadyExists`] failure on duplicate put.
pub trait Store {
    /// Persisted identity of this store
    fn uuid(&self) -> Uuid;

    /// Bytes available on the backing filesystem
    fn usable_space(&self) -> Result<u64>;

    /// Issue the next acquisition session; never hands the same session to
    /// two callers
    fn new_session(&self) -> Result<Session>;

    /// Commit an unmanaged-mode container; fails with `AlreadyExists` if
    /// the descriptor is already stored
    fn put(&self, disk: ManagedDisk) -> Result<DiskDescriptor>;

    /// `put`, reporting cumulative bytes written at most once per
    /// `every_bytes`
    fn put_with_progress(
        &self,
        disk: ManagedDisk,
        progress: &dyn Fn(u64),
        every_bytes: u64,
    ) -> Result<DiskDescriptor>;

    /// Cached-or-computed per-grain digest of a stored container
    fn digest(&self, descriptor: &DiskDescriptor) -> Result<GrainDigest>;

    fn set_attribute(&self, descriptor: &DiskDescriptor, key: &str, value: &[u8]) -> Result<()>;

    /// `Ok(None)` for a key never set; errors are reserved for unknown
    /// descriptors and I/O failures
    fn get_attribute(&self, descriptor: &DiskDescriptor, key: &str) -> Result<Option<Vec<u8>>>;

    fn list_attributes(&self, descriptor: &DiskDescriptor) -> Result<Vec<String>>;

    /// In-process handle to a stored container; not serializable
    fn locate(&self, descriptor: &DiskDescriptor) -> Result<Arc<ManagedDisk>>;

    /// Snapshot of all stored descriptors, sorted
    fn enumerate(&self) -> Vec<DiskDescriptor>;
}

struct StoreState {
    index: HashMap<DiskDescriptor, Arc<ManagedDisk>>,
    by_uuid: HashMap<Uuid, DiskDescriptor>,
    last_session: Option<Session>,
}

/// Directory-backed [`Store`] implementation
pub struct FsStore {
    root: PathBuf,
    uuid: Uuid,
    state: Mutex<StoreState>,
    file_locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl FsStore {
    /// Open (or initialize) a store rooted at `root`.
    ///
    /// Scans the disks area, reconstructs parent links by matching recorded
    /// parent UUIDs against creation UUIDs, and removes temp files orphaned
    /// by interrupted puts. Containers whose parent chain cannot be
    /// resolved are excluded from the index and logged, not linked wrongly;
    /// the store still comes up with the resolvable subset.
    pub fn open(root: impl AsRef<Path>) -> Result<FsStore> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(TEMP_DIR))?;
        fs::create_dir_all(root.join(DISKS_DIR))?;

        let uuid = load_or_create_uuid(&root)?;
        let last_session = load_session_marker(&root)?;
        clean_temp(&root)?;
        let (index, by_uuid) = load_disks(&root)?;

        tracing::info!(
            "opened store {} at {} with {} stored disks",
            uuid,
            root.display(),
            index.len()
        );

        Ok(FsStore {
            root,
            uuid,
            state: Mutex::new(StoreState {
                index,
                by_uuid,
                last_session,
            }),
            file_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Free bytes on the filesystem backing the store root
    pub fn usable_space(&self) -> Result<u64> {
        use std::os::unix::ffi::OsStrExt;
        let path = std::ffi::CString::new(self.root.as_os_str().as_bytes())
            .map_err(|_| VaultError::Corrupt("store root path contains NUL".to_string()))?;
        let mut stats: libc::statvfs = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::statvfs(path.as_ptr(), &mut stats) };
        if rc != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(stats.f_bavail as u64 * stats.f_frsize as u64)
    }

    pub fn new_session(&self) -> Result<Session> {
        self.new_session_on(Local::now().date_naive())
    }

    /// Issue the next session as of a given day.
    ///
    /// The successor is persisted before it is returned, and issuance runs
    /// under the store lock, so two concurrent callers always receive
    /// distinct, strictly ordered sessions.
    pub fn new_session_on(&self, today: NaiveDate) -> Result<Session> {
        let mut state = self.state.lock();
        let next = match &state.last_session {
            Some(last) => last.successor(today),
            None => Session::initial(self.uuid, today),
        };
        fs::write(self.root.join(SESSION_FILE), format!("{next}\n"))?;
        state.last_session = Some(next.clone());
        Ok(next)
    }

    pub fn put(&self, disk: ManagedDisk) -> Result<DiskDescriptor> {
        self.put_inner(disk, None)
    }

    pub fn put_with_progress(
        &self,
        disk: ManagedDisk,
        progress: &dyn Fn(u64),
        every_bytes: u64,
    ) -> Result<DiskDescriptor> {
        self.put_inner(disk, Some((progress, every_bytes.max(1))))
    }

    fn put_inner(
        &self,
        disk: ManagedDisk,
        progress: Option<(&dyn Fn(u64), u64)>,
    ) -> Result<DiskDescriptor> {
        if disk.is_stored() {
            return Err(VaultError::AlreadyStored);
        }
        let descriptor = disk.descriptor();

        {
            let state = self.state.lock();
            if state.index.contains_key(&descriptor) {
                return Err(VaultError::AlreadyExists(descriptor.to_string()));
            }
            if let Some(parent) = disk.parent_uuid() {
                if !state.by_uuid.contains_key(&parent) {
                    return Err(VaultError::UnresolvedParent(parent));
                }
            }
        }

        let temp_path = self.root.join(TEMP_DIR).join(format!(
            "{}_{}.part",
            descriptor.disk(),
            descriptor.session().short()
        ));

        // Phase 1: stream the whole container into the temp area. Guarded
        // by the temp file's own lock only, so puts of different disks run
        // in parallel.
        let temp_lock = self.file_lock(&temp_path);
        let _temp_guard = temp_lock.lock();
        tracing::debug!("writing {} to {}", descriptor, temp_path.display());
        if let Err(e) = self.write_temp(&disk, &temp_path, progress) {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }

        // Phase 2: commit. Directory creation, rename, and index update all
        // happen under the store lock; nothing is visible until the rename.
        let mut state = self.state.lock();
        if state.index.contains_key(&descriptor) {
            let _ = fs::remove_file(&temp_path);
            return Err(VaultError::AlreadyExists(descriptor.to_string()));
        }

        let final_dir = self.descriptor_dir(&descriptor);
        fs::create_dir_all(final_dir.join(ATTRS_DIR))?;
        let data_path = final_dir.join(DATA_FILE);
        fs::rename(&temp_path, &data_path)?;

        let mut stored = ManagedDisk::open(&data_path)?;
        if let Some(parent_uuid) = stored.parent_uuid() {
            let parent = state
                .by_uuid
                .get(&parent_uuid)
                .and_then(|d| state.index.get(d))
                .ok_or(VaultError::UnresolvedParent(parent_uuid))?;
            stored.set_parent(Arc::clone(parent));
        }
        let uuid = stored.uuid();
        state.index.insert(descriptor.clone(), Arc::new(stored));
        state.by_uuid.insert(uuid, descriptor.clone());

        tracing::info!("stored {} as container {}", descriptor, uuid);
        Ok(descriptor)
    }

    fn write_temp(
        &self,
        disk: &ManagedDisk,
        temp_path: &Path,
        progress: Option<(&dyn Fn(u64), u64)>,
    ) -> Result<()> {
        let file = File::create(temp_path)?;
        let mut writer = ProgressWriter {
            inner: BufWriter::new(&file),
            written: 0,
            last_report: 0,
            progress,
        };
        disk.write_to(&mut writer)?;
        writer.flush()?;
        if let Some((callback, _)) = writer.progress {
            if writer.last_report != writer.written {
                callback(writer.written);
            }
        }
        file.sync_all()?;
        Ok(())
    }

    pub fn set_attribute(
        &self,
        descriptor: &DiskDescriptor,
        key: &str,
        value: &[u8],
    ) -> Result<()> {
        validate_attr_key(key)?;
        self.require_known(descriptor)?;
        let path = self
            .descriptor_dir(descriptor)
            .join(ATTRS_DIR)
            .join(key);
        let lock = self.file_lock(&path);
        let _guard = lock.lock();
        fs::write(&path, value)?;
        Ok(())
    }

    pub fn get_attribute(&self, descriptor: &DiskDescriptor, key: &str) -> Result<Option<Vec<u8>>> {
        validate_attr_key(key)?;
        self.require_known(descriptor)?;
        let path = self
            .descriptor_dir(descriptor)
            .join(ATTRS_DIR)
            .join(key);
        let lock = self.file_lock(&path);
        let _guard = lock.lock();
        match fs::read(&path) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_attributes(&self, descriptor: &DiskDescriptor) -> Result<Vec<String>> {
        self.require_known(descriptor)?;
        let attrs_dir = self.descriptor_dir(descriptor).join(ATTRS_DIR);
        let mut keys = Vec::new();
        match fs::read_dir(&attrs_dir) {
            Ok(entries) => {
                for entry in entries {
                    let entry = entry?;
                    if let Ok(name) = entry.file_name().into_string() {
                        keys.push(name);
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        keys.sort();
        Ok(keys)
    }

    pub fn locate(&self, descriptor: &DiskDescriptor) -> Result<Arc<ManagedDisk>> {
        self.state
            .lock()
            .index
            .get(descriptor)
            .cloned()
            .ok_or_else(|| VaultError::UnknownDescriptor(descriptor.to_string()))
    }

    pub fn enumerate(&self) -> Vec<DiskDescriptor> {
        let state = self.state.lock();
        let mut all: Vec<DiskDescriptor> = state.index.keys().cloned().collect();
        all.sort();
        all
    }

    pub fn digest(&self, descriptor: &DiskDescriptor) -> Result<GrainDigest> {
        self.digest_with(descriptor, HashAlgorithm::default())
    }

    /// Per-grain digest with an explicit algorithm. The digest is cached
    /// beside the container; a cached digest with a different algorithm is
    /// recomputed, not trusted.
    pub fn digest_with(
        &self,
        descriptor: &DiskDescriptor,
        algorithm: HashAlgorithm,
    ) -> Result<GrainDigest> {
        let disk = self.locate(descriptor)?;
        let digest_path = self.descriptor_dir(descriptor).join(DIGEST_FILE);
        let lock = self.file_lock(&digest_path);
        let _guard = lock.lock();

        if digest_path.is_file() {
            let cached = GrainDigest::read_from(File::open(&digest_path)?)?;
            if cached.algorithm() == algorithm {
                return Ok(cached);
            }
        }

        let grain_sectors = match disk.header().grain_sectors {
            0 => DEFAULT_GRAIN_SECTORS,
            sectors => sectors,
        };
        let mut reader = disk.reader()?;
        let digest = GrainDigest::compute(
            &mut reader,
            disk.capacity_bytes(),
            sectors_to_bytes(grain_sectors),
            algorithm,
        )?;

        let mut file = File::create(&digest_path)?;
        digest.write_to(&mut file)?;
        file.flush()?;
        Ok(digest)
    }

    fn descriptor_dir(&self, descriptor: &DiskDescriptor) -> PathBuf {
        self.root
            .join(DISKS_DIR)
            .join(descriptor.disk().as_str())
            .join(descriptor.session().short())
    }

    fn require_known(&self, descriptor: &DiskDescriptor) -> Result<()> {
        if self.state.lock().index.contains_key(descriptor) {
            Ok(())
        } else {
            Err(VaultError::UnknownDescriptor(descriptor.to_string()))
        }
    }

    fn file_lock(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.file_locks.lock();
        Arc::clone(locks.entry(path.to_path_buf()).or_default())
    }
}

impl Store for FsStore {
    fn uuid(&self) -> Uuid {
        FsStore::uuid(self)
    }

    fn usable_space(&self) -> Result<u64> {
        FsStore::usable_space(self)
    }

    fn new_session(&self) -> Result<Session> {
        FsStore::new_session(self)
    }

    fn put(&self, disk: ManagedDisk) -> Result<DiskDescriptor> {
        FsStore::put(self, disk)
    }

    fn put_with_progress(
        &self,
        disk: ManagedDisk,
        progress: &dyn Fn(u64),
        every_bytes: u64,
    ) -> Result<DiskDescriptor> {
        FsStore::put_with_progress(self, disk, progress, every_bytes)
    }

    fn digest(&self, descriptor: &DiskDescriptor) -> Result<GrainDigest> {
        FsStore::digest(self, descriptor)
    }

    fn set_attribute(&self, descriptor: &DiskDescriptor, key: &str, value: &[u8]) -> Result<()> {
        FsStore::set_attribute(self, descriptor, key, value)
    }

    fn get_attribute(&self, descriptor: &DiskDescriptor, key: &str) -> Result<Option<Vec<u8>>> {
        FsStore::get_attribute(self, descriptor, key)
    }

    fn list_attributes(&self, descriptor: &DiskDescriptor) -> Result<Vec<String>> {
        FsStore::list_attributes(self, descriptor)
    }

    fn locate(&self, descriptor: &DiskDescriptor) -> Result<Arc<ManagedDisk>> {
        FsStore::locate(self, descriptor)
    }

    fn enumerate(&self) -> Vec<DiskDescriptor> {
        FsStore::enumerate(self)
    }
}

struct ProgressWriter<'a, W: Write> {
    inner: W,
    written: u64,
    last_report: u64,
    progress: Option<(&'a dyn Fn(u64), u64)>,
}

impl<W: Write> Write for ProgressWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        if let Some((callback, every)) = self.progress {
            if self.written - self.last_report >= every {
                callback(self.written);
                self.last_report = self.written;
            }
        }
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

fn load_or_create_uuid(root: &Path) -> Result<Uuid> {
    let path = root.join(UUID_FILE);
    match fs::read_to_string(&path) {
        Ok(text) => Uuid::parse_str(text.trim())
            .map_err(|_| VaultError::Corrupt(format!("unreadable store uuid in {}", path.display()))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let uuid = Uuid::new_v4();
            fs::write(&path, format!("{uuid}\n"))?;
            Ok(uuid)
        }
        Err(e) => Err(e.into()),
    }
}

fn load_session_marker(root: &Path) -> Result<Option<Session>> {
    let path = root.join(SESSION_FILE);
    match fs::read_to_string(&path) {
        Ok(text) => Ok(Some(text.trim().parse()?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn clean_temp(root: &Path) -> Result<()> {
    for entry in fs::read_dir(root.join(TEMP_DIR))? {
        let entry = entry?;
        tracing::warn!(
            "removing orphaned temp file {} from an interrupted put",
            entry.path().display()
        );
        let _ = fs::remove_file(entry.path());
    }
    Ok(())
}

fn load_disks(
    root: &Path,
) -> Result<(
    HashMap<DiskDescriptor, Arc<ManagedDisk>>,
    HashMap<Uuid, DiskDescriptor>,
)> {
    let mut pending: HashMap<Uuid, ManagedDisk> = HashMap::new();

    for disk_entry in fs::read_dir(root.join(DISKS_DIR))? {
        let disk_entry = disk_entry?;
        if !disk_entry.file_type()?.is_dir() {
            continue;
        }
        for session_entry in fs::read_dir(disk_entry.path())? {
            let data = session_entry?.path().join(DATA_FILE);
            if !data.is_file() {
                continue;
            }
            match ManagedDisk::open(&data) {
                Ok(disk) => {
                    if pending.contains_key(&disk.uuid()) {
                        tracing::warn!(
                            "skipping {}: duplicate container uuid {}",
                            data.display(),
                            disk.uuid()
                        );
                        continue;
                    }
                    pending.insert(disk.uuid(), disk);
                }
                Err(e) => {
                    tracing::warn!("skipping unreadable container {}: {}", data.display(), e);
                }
            }
        }
    }

    // Resolve parent chains bottom-up: a container is indexable once its
    // parent is, so repeat until a pass makes no progress. Whatever is left
    // has a missing or cyclic parent chain.
    let mut wrapped: HashMap<Uuid, Arc<ManagedDisk>> = HashMap::new();
    loop {
        let ready: Vec<Uuid> = pending
            .iter()
            .filter(|(_, disk)| match disk.parent_uuid() {
                None => true,
                Some(parent) => wrapped.contains_key(&parent),
            })
            .map(|(uuid, _)| *uuid)
            .collect();
        if ready.is_empty() {
            break;
        }
        for uuid in ready {
            let mut disk = pending.remove(&uuid).unwrap();
            if let Some(parent) = disk.parent_uuid() {
                disk.set_parent(Arc::clone(&wrapped[&parent]));
            }
            wrapped.insert(uuid, Arc::new(disk));
        }
    }
    for (uuid, disk) in &pending {
        tracing::warn!(
            "excluding container {} ({}) from the index: parent {:?} cannot be resolved",
            uuid,
            disk.descriptor(),
            disk.parent_uuid()
        );
    }

    let mut index = HashMap::new();
    let mut by_uuid = HashMap::new();
    for (uuid, disk) in wrapped {
        let descriptor = disk.descriptor();
        if index.contains_key(&descriptor) {
            tracing::warn!(
                "skipping container {}: duplicate descriptor {}",
                uuid,
                descriptor
            );
            continue;
        }
        by_uuid.insert(uuid, descriptor.clone());
        index.insert(descriptor, disk);
    }
    Ok((index, by_uuid))
}

fn validate_attr_key(key: &str) -> Result<()> {
    if key.is_empty() || key.len() > ATTR_KEY_MAX_LENGTH {
        return Err(VaultError::InvalidAttributeKey(key.to_string()));
    }
    let re = Regex::new(ATTR_KEY_PATTERN).unwrap();
    if !re.is_match(key) {
        return Err(VaultError::InvalidAttributeKey(key.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attr_key_validation() {
        assert!(validate_attr_key("filehash.md5").is_ok());
        assert!(validate_attr_key("case-number").is_ok());
        assert!(validate_attr_key("").is_err());
        assert!(validate_attr_key(".hidden").is_err());
        assert!(validate_attr_key("a/b").is_err());
        assert!(validate_attr_key("a b").is_err());
        assert!(validate_attr_key(&"k".repeat(129)).is_err());
    }
}
