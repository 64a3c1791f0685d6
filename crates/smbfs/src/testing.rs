//! In-memory share server implementing the remote contract.
//!
//! Used by the test suites and handy for embedding the filesystem without a
//! network. Shares hold a flat map of share-relative keys (`a/b/c`, the
//! root is the empty key). Faults can be injected to exercise the
//! reconnect and fallback paths: dropped connections, failing or slow
//! connects, missing server-side copy and write-protected objects.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use tracing::trace;

use crate::config::Credentials;
use crate::remote::{
    AccessMask, BasicInformationUpdate, CreateDisposition, CreateOptions, DirectoryEntry, DiskShare,
    FileAllInformation, FileAttributes, FileBasicInformation, FileStandardInformation, NtStatus,
    RemoteError, RemoteFile, RemoteResult, ShareAccess, ShareInformation, SmbClient, SmbConnection,
    SmbSession,
};

const BLOCK: u64 = 4096;
/// Largest file the server holds; writes and truncations past it are refused.
const MAX_FILE_SIZE: u64 = 1 << 30;

fn err(status: NtStatus, message: impl Into<String>) -> RemoteError {
    RemoteError::new(status, message)
}

/// Canonical key of a share-relative path.
fn key_of(path: &str) -> RemoteResult<String> {
    let mut parts = Vec::new();
    for part in path.split(['/', '\\']).filter(|p| !p.is_empty()) {
        if part == "." || part == ".." {
            return Err(err(
                NtStatus::InvalidParameter,
                format!("'{}' is not a canonical share path", path),
            ));
        }
        parts.push(part);
    }
    Ok(parts.join("/"))
}

fn parent_of(key: &str) -> Option<&str> {
    if key.is_empty() {
        return None;
    }
    Some(key.rsplit_once('/').map_or("", |(parent, _)| parent))
}

fn is_child(parent: &str, key: &str) -> bool {
    if key.is_empty() {
        return false;
    }
    let rest = if parent.is_empty() {
        key
    } else {
        match key.strip_prefix(parent).and_then(|r| r.strip_prefix('/')) {
            Some(rest) => rest,
            None => return false,
        }
    };
    !rest.contains('/')
}

fn is_descendant_or_self(ancestor: &str, key: &str) -> bool {
    key == ancestor
        || ancestor.is_empty()
        || key
            .strip_prefix(ancestor)
            .map_or(false, |rest| rest.starts_with('/'))
}

#[derive(Debug, Clone)]
struct Node {
    /// `None` for directories.
    data: Option<Vec<u8>>,
    basic: FileBasicInformation,
    delete_pending: bool,
    write_protected: bool,
}

impl Node {
    fn new(directory: bool) -> Self {
        let now = SystemTime::now();
        Self {
            data: if directory { None } else { Some(Vec::new()) },
            basic: FileBasicInformation {
                creation_time: now,
                last_access_time: now,
                last_write_time: now,
                change_time: now,
                attributes: if directory {
                    FileAttributes::DIRECTORY
                } else {
                    FileAttributes::NORMAL
                },
            },
            delete_pending: false,
            write_protected: false,
        }
    }

    fn is_dir(&self) -> bool {
        self.data.is_none()
    }

    fn len(&self) -> u64 {
        self.data.as_ref().map_or(0, |d| d.len() as u64)
    }

    fn touch(&mut self) {
        let now = SystemTime::now();
        self.basic.last_write_time = now;
        self.basic.change_time = now;
    }

    fn apply(&mut self, update: &BasicInformationUpdate) {
        if let Some(t) = update.creation_time {
            self.basic.creation_time = t;
        }
        if let Some(t) = update.last_access_time {
            self.basic.last_access_time = t;
        }
        if let Some(t) = update.last_write_time {
            self.basic.last_write_time = t;
        }
        if let Some(t) = update.change_time {
            self.basic.change_time = t;
        }
        if let Some(attributes) = update.attributes {
            self.basic.attributes = attributes;
        }
    }

    fn information(&self, key: &str) -> FileAllInformation {
        let len = self.len();
        FileAllInformation {
            basic: self.basic.clone(),
            standard: FileStandardInformation {
                end_of_file: len,
                allocation_size: len.div_ceil(BLOCK) * BLOCK,
                directory: self.is_dir(),
                delete_pending: self.delete_pending,
            },
            name: key.to_string(),
        }
    }
}

struct ShareState {
    name: String,
    nodes: Mutex<BTreeMap<String, Node>>,
    capacity: Mutex<ShareInformation>,
}

impl ShareState {
    fn new(name: &str) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(String::new(), Node::new(true));
        Self {
            name: name.to_string(),
            nodes: Mutex::new(nodes),
            capacity: Mutex::new(ShareInformation {
                total_space: 1 << 30,
                caller_free_space: 1 << 29,
                free_space: 1 << 29,
            }),
        }
    }

    /// Checks that `key` can be created: parent is a writable directory.
    fn check_parent(nodes: &BTreeMap<String, Node>, key: &str) -> RemoteResult<()> {
        let parent = parent_of(key).unwrap_or("");
        match nodes.get(parent) {
            Some(node) if node.is_dir() && node.write_protected => {
                Err(err(NtStatus::AccessDenied, format!("'{}' is write protected", parent)))
            }
            Some(node) if node.is_dir() => Ok(()),
            _ => Err(err(
                NtStatus::ObjectPathNotFound,
                format!("parent of '{}' does not exist", key),
            )),
        }
    }

    fn ensure_dirs(nodes: &mut BTreeMap<String, Node>, key: &str) {
        let mut current = String::new();
        for part in key.split('/').filter(|p| !p.is_empty()) {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(part);
            nodes.entry(current.clone()).or_insert_with(|| Node::new(true));
        }
    }
}

/// Close flags of the connection, session and share a handle came through.
#[derive(Clone, Default)]
struct Upstream(Vec<Arc<AtomicBool>>);

impl Upstream {
    fn through(&self, closed: &Arc<AtomicBool>) -> Self {
        let mut flags = self.0.clone();
        flags.push(closed.clone());
        Self(flags)
    }

    fn check(&self) -> RemoteResult<()> {
        if self.0.iter().any(|closed| closed.load(Ordering::Acquire)) {
            Err(err(NtStatus::ConnectionDisconnected, "opened through a closed connection"))
        } else {
            Ok(())
        }
    }
}

struct ServerState {
    host: Mutex<Option<String>>,
    shares: Mutex<HashMap<String, Arc<ShareState>>>,
    generation: AtomicU64,
    connects: AtomicU64,
    authentications: AtomicU64,
    mounts: AtomicU64,
    remote_copies: AtomicU64,
    open_handles: AtomicUsize,
    failing_connects: AtomicU32,
    connect_delay: Mutex<Duration>,
    remote_copy_supported: AtomicBool,
    logon_failure: AtomicBool,
    drop_after_mount: AtomicBool,
}

impl ServerState {
    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn check_live(&self, generation: u64) -> RemoteResult<()> {
        if self.generation() == generation {
            Ok(())
        } else {
            Err(err(NtStatus::ConnectionDisconnected, "connection was dropped"))
        }
    }
}

/// In-memory server; clones share state.
#[derive(Clone)]
pub struct MemoryServer {
    state: Arc<ServerState>,
}

impl Default for MemoryServer {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryServer {
    /// Server without shares.
    pub fn new() -> Self {
        Self {
            state: Arc::new(ServerState {
                host: Mutex::new(None),
                shares: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
                connects: AtomicU64::new(0),
                authentications: AtomicU64::new(0),
                mounts: AtomicU64::new(0),
                remote_copies: AtomicU64::new(0),
                open_handles: AtomicUsize::new(0),
                failing_connects: AtomicU32::new(0),
                connect_delay: Mutex::new(Duration::ZERO),
                remote_copy_supported: AtomicBool::new(true),
                logon_failure: AtomicBool::new(false),
                drop_after_mount: AtomicBool::new(false),
            }),
        }
    }

    /// Server with an empty share per name.
    pub fn with_shares(names: &[&str]) -> Self {
        let server = Self::new();
        for name in names {
            server.add_share(name);
        }
        server
    }

    /// Adds an empty share unless it exists.
    pub fn add_share(&self, name: &str) {
        self.share(name);
    }

    fn share(&self, name: &str) -> Arc<ShareState> {
        self.state
            .shares
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(ShareState::new(name)))
            .clone()
    }

    fn with_node<R>(&self, share: &str, path: &str, f: impl FnOnce(&mut Node) -> R) -> Option<R> {
        let key = key_of(path).ok()?;
        let share = self.share(share);
        let mut nodes = share.nodes.lock();
        nodes.get_mut(&key).map(f)
    }

    /// Creates `path` and any missing ancestors as directories.
    pub fn create_dir_all(&self, share: &str, path: &str) {
        if let Ok(key) = key_of(path) {
            let share = self.share(share);
            ShareState::ensure_dirs(&mut share.nodes.lock(), &key);
        }
    }

    /// Writes a whole file, creating missing ancestors.
    pub fn write_file(&self, share: &str, path: &str, content: &[u8]) {
        let Ok(key) = key_of(path) else { return };
        let share = self.share(share);
        let mut nodes = share.nodes.lock();
        if let Some(parent) = parent_of(&key) {
            ShareState::ensure_dirs(&mut nodes, parent);
        }
        let node = nodes.entry(key).or_insert_with(|| Node::new(false));
        node.data = Some(content.to_vec());
        node.touch();
    }

    /// Content of a file; `None` for directories and missing paths.
    pub fn read_file(&self, share: &str, path: &str) -> Option<Vec<u8>> {
        self.with_node(share, path, |node| node.data.clone()).flatten()
    }

    /// True if anything is at `path`.
    pub fn exists(&self, share: &str, path: &str) -> bool {
        self.with_node(share, path, |_| ()).is_some()
    }

    /// True if `path` is a directory.
    pub fn is_dir(&self, share: &str, path: &str) -> bool {
        self.with_node(share, path, |node| node.is_dir()).unwrap_or(false)
    }

    /// Sets the hidden attribute bit.
    pub fn set_hidden(&self, share: &str, path: &str) {
        self.with_node(share, path, |node| {
            let bits = (node.basic.attributes.bits() & !FileAttributes::NORMAL.bits())
                | FileAttributes::HIDDEN.bits();
            node.basic.attributes = FileAttributes(bits);
        });
    }

    /// Denies write and delete access to `path`, and creation inside it.
    pub fn write_protect(&self, share: &str, path: &str) {
        self.with_node(share, path, |node| node.write_protected = true);
    }

    /// Replaces the capacity figures of a share.
    pub fn set_capacity(&self, share: &str, capacity: ShareInformation) {
        *self.share(share).capacity.lock() = capacity;
    }

    /// Invalidates every open connection, session, share and handle.
    pub fn drop_connections(&self) {
        self.state.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// The next successful mount hands out a share whose connection is
    /// dropped right away.
    pub fn drop_connections_after_next_mount(&self) {
        self.state.drop_after_mount.store(true, Ordering::Release);
    }

    /// Makes the next `n` connect attempts fail.
    pub fn fail_next_connects(&self, n: u32) {
        self.state.failing_connects.store(n, Ordering::Release);
    }

    /// Sleeps this long in every connect.
    pub fn set_connect_delay(&self, delay: Duration) {
        *self.state.connect_delay.lock() = delay;
    }

    /// Switches server-side copy on or off.
    pub fn set_remote_copy_supported(&self, supported: bool) {
        self.state.remote_copy_supported.store(supported, Ordering::Release);
    }

    /// Makes every authentication fail with a logon failure.
    pub fn set_logon_failure(&self, fail: bool) {
        self.state.logon_failure.store(fail, Ordering::Release);
    }

    /// Connect attempts, failed ones included.
    pub fn connect_count(&self) -> u64 {
        self.state.connects.load(Ordering::Acquire)
    }

    /// Authentication attempts.
    pub fn authentication_count(&self) -> u64 {
        self.state.authentications.load(Ordering::Acquire)
    }

    /// Successful mounts.
    pub fn mount_count(&self) -> u64 {
        self.state.mounts.load(Ordering::Acquire)
    }

    /// Completed server-side copies.
    pub fn remote_copy_count(&self) -> u64 {
        self.state.remote_copies.load(Ordering::Acquire)
    }

    /// Handles opened and not yet closed.
    pub fn open_handle_count(&self) -> usize {
        self.state.open_handles.load(Ordering::Acquire)
    }

    /// Host named by the most recent connect.
    pub fn last_host(&self) -> Option<String> {
        self.state.host.lock().clone()
    }
}

impl fmt::Debug for MemoryServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut shares: Vec<String> = self.state.shares.lock().keys().cloned().collect();
        shares.sort();
        f.debug_struct("MemoryServer")
            .field("shares", &shares)
            .field("generation", &self.state.generation())
            .finish()
    }
}

impl SmbClient for MemoryServer {
    fn connect(&self, host: &str, _port: Option<u16>) -> RemoteResult<Box<dyn SmbConnection>> {
        let delay = *self.state.connect_delay.lock();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        self.state.connects.fetch_add(1, Ordering::AcqRel);
        *self.state.host.lock() = Some(host.to_string());

        let failing = self
            .state
            .failing_connects
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(err(
                NtStatus::ConnectionDisconnected,
                format!("connection to {} refused", host),
            ));
        }
        trace!(host, "memory server accepted connection");
        Ok(Box::new(MemoryConnection {
            server: self.state.clone(),
            generation: self.state.generation(),
            closed: Arc::new(AtomicBool::new(false)),
        }))
    }
}

struct MemoryConnection {
    server: Arc<ServerState>,
    generation: u64,
    closed: Arc<AtomicBool>,
}

impl SmbConnection for MemoryConnection {
    fn authenticate(&self, _credentials: &Credentials) -> RemoteResult<Box<dyn SmbSession>> {
        if !self.is_connected() {
            return Err(err(NtStatus::ConnectionDisconnected, "connection is not open"));
        }
        self.server.authentications.fetch_add(1, Ordering::AcqRel);
        if self.server.logon_failure.load(Ordering::Acquire) {
            return Err(err(NtStatus::LogonFailure, "authentication rejected"));
        }
        Ok(Box::new(MemorySession {
            server: self.server.clone(),
            generation: self.generation,
            upstream: Upstream::default().through(&self.closed),
            closed: Arc::new(AtomicBool::new(false)),
        }))
    }

    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && self.server.generation() == self.generation
    }

    fn close(&self) -> RemoteResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(err(NtStatus::FileClosed, "connection already closed"));
        }
        Ok(())
    }
}

struct MemorySession {
    server: Arc<ServerState>,
    generation: u64,
    upstream: Upstream,
    closed: Arc<AtomicBool>,
}

impl SmbSession for MemorySession {
    fn mount(&self, share_name: &str) -> RemoteResult<Arc<dyn DiskShare>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(err(NtStatus::ConnectionDisconnected, "session is logged off"));
        }
        self.upstream.check()?;
        self.server.check_live(self.generation)?;
        let share = self
            .server
            .shares
            .lock()
            .get(share_name)
            .cloned()
            .ok_or_else(|| err(NtStatus::BadNetworkName, format!("no share named '{}'", share_name)))?;
        self.server.mounts.fetch_add(1, Ordering::AcqRel);
        let mounted = Arc::new(MemoryShare {
            server: self.server.clone(),
            share,
            generation: self.generation,
            upstream: self.upstream.through(&self.closed),
            closed: Arc::new(AtomicBool::new(false)),
        });
        if self.server.drop_after_mount.swap(false, Ordering::AcqRel) {
            self.server.generation.fetch_add(1, Ordering::AcqRel);
        }
        Ok(mounted)
    }

    fn close(&self) -> RemoteResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(err(NtStatus::FileClosed, "session already logged off"));
        }
        Ok(())
    }
}

struct MemoryShare {
    server: Arc<ServerState>,
    share: Arc<ShareState>,
    generation: u64,
    upstream: Upstream,
    closed: Arc<AtomicBool>,
}

impl MemoryShare {
    fn check(&self) -> RemoteResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(err(NtStatus::ConnectionDisconnected, "share is disconnected"));
        }
        self.upstream.check()?;
        self.server.check_live(self.generation)
    }
}

fn not_found(key: &str) -> RemoteError {
    err(NtStatus::ObjectNameNotFound, format!("'{}' does not exist", key))
}

impl DiskShare for MemoryShare {
    fn unc_path(&self) -> String {
        let host = self.server.host.lock().clone().unwrap_or_default();
        format!("\\\\{}\\{}", host, self.share.name)
    }

    fn list(&self, path: &str) -> RemoteResult<Vec<DirectoryEntry>> {
        self.check()?;
        let key = key_of(path)?;
        let nodes = self.share.nodes.lock();
        let dir = nodes.get(&key).ok_or_else(|| not_found(&key))?;
        if !dir.is_dir() {
            return Err(err(NtStatus::NotADirectory, format!("'{}' is a file", key)));
        }
        let mut entries = vec![
            DirectoryEntry {
                file_name: ".".to_string(),
                attributes: FileAttributes::DIRECTORY,
                end_of_file: 0,
            },
            DirectoryEntry {
                file_name: "..".to_string(),
                attributes: FileAttributes::DIRECTORY,
                end_of_file: 0,
            },
        ];
        entries.extend(
            nodes
                .iter()
                .filter(|(child, _)| is_child(&key, child))
                .map(|(child, node)| DirectoryEntry {
                    file_name: child.rsplit('/').next().unwrap_or(child.as_str()).to_string(),
                    attributes: node.basic.attributes,
                    end_of_file: node.len(),
                }),
        );
        Ok(entries)
    }

    fn open(
        &self,
        path: &str,
        access: AccessMask,
        _attributes: FileAttributes,
        _share_access: ShareAccess,
        disposition: CreateDisposition,
        options: CreateOptions,
    ) -> RemoteResult<Box<dyn RemoteFile>> {
        self.check()?;
        let key = key_of(path)?;
        let mut nodes = self.share.nodes.lock();
        let mutating = AccessMask::GENERIC_WRITE | AccessMask::DELETE;

        match nodes.get_mut(&key) {
            Some(node) => {
                if node.delete_pending {
                    return Err(err(NtStatus::DeletePending, format!("'{}' is being deleted", key)));
                }
                if disposition == CreateDisposition::Create {
                    return Err(err(NtStatus::ObjectNameCollision, format!("'{}' exists", key)));
                }
                if options.contains(CreateOptions::DIRECTORY_FILE) && !node.is_dir() {
                    return Err(err(NtStatus::NotADirectory, format!("'{}' is a file", key)));
                }
                if options.contains(CreateOptions::NON_DIRECTORY_FILE) && node.is_dir() {
                    return Err(err(NtStatus::FileIsADirectory, format!("'{}' is a directory", key)));
                }
                if node.write_protected && access.intersects(mutating) {
                    return Err(err(NtStatus::AccessDenied, format!("'{}' is write protected", key)));
                }
                if matches!(
                    disposition,
                    CreateDisposition::Supersede | CreateDisposition::Overwrite | CreateDisposition::OverwriteIf
                ) {
                    if let Some(data) = node.data.as_mut() {
                        data.clear();
                        node.touch();
                    }
                }
            }
            None => {
                if matches!(disposition, CreateDisposition::Open | CreateDisposition::Overwrite) {
                    return Err(not_found(&key));
                }
                ShareState::check_parent(&nodes, &key)?;
                nodes.insert(
                    key.clone(),
                    Node::new(options.contains(CreateOptions::DIRECTORY_FILE)),
                );
            }
        }
        drop(nodes);

        self.server.open_handles.fetch_add(1, Ordering::AcqRel);
        Ok(Box::new(MemoryFile {
            server: self.server.clone(),
            share: self.share.clone(),
            generation: self.generation,
            upstream: self.upstream.through(&self.closed),
            key: Mutex::new(key),
            access,
            delete_on_close: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }))
    }

    fn delete(&self, path: &str) -> RemoteResult<()> {
        self.check()?;
        let key = key_of(path)?;
        if key.is_empty() {
            return Err(err(NtStatus::AccessDenied, "the share root cannot be deleted"));
        }
        let mut nodes = self.share.nodes.lock();
        let node = nodes.get(&key).ok_or_else(|| not_found(&key))?;
        if node.delete_pending {
            return Err(err(NtStatus::DeletePending, format!("'{}' is being deleted", key)));
        }
        if node.write_protected {
            return Err(err(NtStatus::AccessDenied, format!("'{}' is write protected", key)));
        }
        if node.is_dir() && nodes.keys().any(|k| is_child(&key, k)) {
            return Err(err(NtStatus::DirectoryNotEmpty, format!("'{}' is not empty", key)));
        }
        nodes.remove(&key);
        Ok(())
    }

    fn file_information(&self, path: &str) -> RemoteResult<FileAllInformation> {
        self.check()?;
        let key = key_of(path)?;
        let nodes = self.share.nodes.lock();
        let node = nodes.get(&key).ok_or_else(|| not_found(&key))?;
        Ok(node.information(&key))
    }

    fn set_basic_information(&self, path: &str, update: &BasicInformationUpdate) -> RemoteResult<()> {
        self.check()?;
        let key = key_of(path)?;
        let mut nodes = self.share.nodes.lock();
        let node = nodes.get_mut(&key).ok_or_else(|| not_found(&key))?;
        if node.write_protected {
            return Err(err(NtStatus::AccessDenied, format!("'{}' is write protected", key)));
        }
        node.apply(update);
        Ok(())
    }

    fn share_information(&self) -> RemoteResult<ShareInformation> {
        self.check()?;
        Ok(*self.share.capacity.lock())
    }

    fn is_connected(&self) -> bool {
        self.check().is_ok()
    }

    fn close(&self) -> RemoteResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(err(NtStatus::FileClosed, "share already disconnected"));
        }
        Ok(())
    }
}

struct MemoryFile {
    server: Arc<ServerState>,
    share: Arc<ShareState>,
    generation: u64,
    upstream: Upstream,
    key: Mutex<String>,
    access: AccessMask,
    delete_on_close: AtomicBool,
    closed: AtomicBool,
}

impl MemoryFile {
    fn check(&self) -> RemoteResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(err(NtStatus::FileClosed, "handle is closed"));
        }
        self.upstream.check()?;
        self.server.check_live(self.generation)
    }

    fn require(&self, right: AccessMask, what: &str) -> RemoteResult<()> {
        if self.access.contains(right) {
            Ok(())
        } else {
            Err(err(
                NtStatus::AccessDenied,
                format!("handle was not opened for {}", what),
            ))
        }
    }

    fn with_node<R>(&self, f: impl FnOnce(&str, &mut Node) -> RemoteResult<R>) -> RemoteResult<R> {
        self.check()?;
        let key = self.key.lock().clone();
        let mut nodes = self.share.nodes.lock();
        let node = nodes.get_mut(&key).ok_or_else(|| not_found(&key))?;
        f(&key, node)
    }

    fn file_data<'a>(key: &str, node: &'a mut Node) -> RemoteResult<&'a mut Vec<u8>> {
        node.data
            .as_mut()
            .ok_or_else(|| err(NtStatus::FileIsADirectory, format!("'{}' is a directory", key)))
    }
}

impl RemoteFile for MemoryFile {
    fn read(&self, buf: &mut [u8], offset: u64) -> RemoteResult<usize> {
        self.require(AccessMask::GENERIC_READ, "reading")?;
        self.with_node(|key, node| {
            let data = Self::file_data(key, node)?;
            let start = usize::try_from(offset).unwrap_or(usize::MAX).min(data.len());
            let n = buf.len().min(data.len() - start);
            buf[..n].copy_from_slice(&data[start..start + n]);
            Ok(n)
        })
    }

    fn write(&self, buf: &[u8], offset: u64) -> RemoteResult<usize> {
        self.require(AccessMask::GENERIC_WRITE, "writing")?;
        self.with_node(|key, node| {
            let data = Self::file_data(key, node)?;
            let end = usize::try_from(offset)
                .ok()
                .and_then(|start| start.checked_add(buf.len()))
                .filter(|end| *end as u64 <= MAX_FILE_SIZE)
                .ok_or_else(|| err(NtStatus::InvalidParameter, "offset out of range"))?;
            let start = end - buf.len();
            if data.len() < end {
                data.resize(end, 0);
            }
            data[start..end].copy_from_slice(buf);
            node.touch();
            Ok(buf.len())
        })
    }

    fn set_length(&self, length: u64) -> RemoteResult<()> {
        self.require(AccessMask::GENERIC_WRITE, "writing")?;
        self.with_node(|key, node| {
            let length = usize::try_from(length)
                .ok()
                .filter(|length| *length as u64 <= MAX_FILE_SIZE)
                .ok_or_else(|| err(NtStatus::InvalidParameter, "length out of range"))?;
            Self::file_data(key, node)?.resize(length, 0);
            node.touch();
            Ok(())
        })
    }

    fn file_information(&self) -> RemoteResult<FileAllInformation> {
        self.with_node(|key, node| Ok(node.information(key)))
    }

    fn set_basic_information(&self, update: &BasicInformationUpdate) -> RemoteResult<()> {
        self.require(AccessMask::GENERIC_WRITE, "writing")?;
        self.with_node(|_, node| {
            node.apply(update);
            Ok(())
        })
    }

    fn rename(&self, new_path: &str, replace: bool) -> RemoteResult<()> {
        self.require(AccessMask::DELETE, "deleting")?;
        self.check()?;
        let target = key_of(new_path)?;
        let mut key = self.key.lock();
        if *key == target {
            return Ok(());
        }
        let mut nodes = self.share.nodes.lock();
        if !nodes.contains_key(key.as_str()) {
            return Err(not_found(&key));
        }
        if is_descendant_or_self(&key, &target) {
            return Err(err(
                NtStatus::InvalidParameter,
                format!("cannot move '{}' into itself", key),
            ));
        }
        if let Some(existing) = nodes.get(&target) {
            if !replace {
                return Err(err(NtStatus::ObjectNameCollision, format!("'{}' exists", target)));
            }
            if existing.is_dir() || existing.write_protected {
                return Err(err(NtStatus::AccessDenied, format!("'{}' cannot be replaced", target)));
            }
            nodes.remove(&target);
        }
        ShareState::check_parent(&nodes, &target)?;

        let moved: Vec<String> = nodes
            .keys()
            .filter(|k| is_descendant_or_self(&key, k))
            .cloned()
            .collect();
        for old in moved {
            if let Some(node) = nodes.remove(&old) {
                let new_key = format!("{}{}", target, &old[key.len()..]);
                nodes.insert(new_key, node);
            }
        }
        if let Some(node) = nodes.get_mut(&target) {
            node.basic.change_time = SystemTime::now();
        }
        *key = target;
        Ok(())
    }

    fn remote_copy_to(&self, dst: &dyn RemoteFile) -> RemoteResult<()> {
        self.require(AccessMask::GENERIC_READ, "reading")?;
        if !self.server.remote_copy_supported.load(Ordering::Acquire) {
            self.check()?;
            return Err(err(NtStatus::NotSupported, "server-side copy is not available"));
        }
        // Copy out first; `dst` may live on this very share.
        let content = self.with_node(|key, node| Ok(Self::file_data(key, node)?.clone()))?;
        dst.set_length(0)?;
        dst.write(&content, 0)?;
        self.server.remote_copies.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn delete_on_close(&self) -> RemoteResult<()> {
        self.require(AccessMask::DELETE, "deleting")?;
        self.with_node(|key, node| {
            if node.write_protected {
                return Err(err(NtStatus::AccessDenied, format!("'{}' is write protected", key)));
            }
            node.delete_pending = true;
            Ok(())
        })?;
        self.delete_on_close.store(true, Ordering::Release);
        Ok(())
    }

    fn close(&self) -> RemoteResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(err(NtStatus::FileClosed, "handle already closed"));
        }
        self.server.open_handles.fetch_sub(1, Ordering::AcqRel);
        self.upstream.check()?;
        self.server.check_live(self.generation)?;
        if self.delete_on_close.load(Ordering::Acquire) {
            let key = self.key.lock().clone();
            self.share.nodes.lock().remove(&key);
        }
        Ok(())
    }
}
