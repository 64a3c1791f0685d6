//! Process-wide table of open filesystems, keyed by identity.

use std::fmt;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::info;

use crate::config::{ConfigCredentialResolver, CredentialResolver, SmbFsConfig};
use crate::connection::ConnectionManager;
use crate::error::{Result, SmbFsError};
use crate::filesystem::{FileSystemInner, SmbFileSystem, SEPARATOR};
use crate::identity::FsIdentity;
use crate::path::SmbPath;
use crate::remote::SmbClient;

/// How `lookup_or_create` treats a present or absent entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupMode {
    /// Fail with `FileSystemNotFound` if absent.
    LookupOnly,
    /// Fail with `FileSystemAlreadyExists` if present.
    CreateOnly,
    /// Return the present entry or create one.
    Either,
}

pub(crate) struct RegistryInner {
    filesystems: DashMap<FsIdentity, Arc<FileSystemInner>>,
    client: Arc<dyn SmbClient>,
    credentials: Arc<dyn CredentialResolver>,
}

impl RegistryInner {
    /// Drops the entry for `identity`, but only if it still maps to `fs`.
    pub(crate) fn remove(&self, identity: &FsIdentity, fs: &Arc<FileSystemInner>) {
        self.filesystems
            .remove_if(identity, |_, current| Arc::ptr_eq(current, fs));
    }
}

/// Process-wide map from identity to open filesystem. Clones share the map.
#[derive(Clone)]
pub struct FileSystemRegistry {
    inner: Arc<RegistryInner>,
}

impl FileSystemRegistry {
    /// Registry whose filesystems authenticate from `config`.
    pub fn new(client: Arc<dyn SmbClient>, config: SmbFsConfig) -> Self {
        Self::with_resolver(client, Arc::new(ConfigCredentialResolver::new(config)))
    }

    /// Registry whose filesystems authenticate with credentials from `credentials`.
    pub fn with_resolver(client: Arc<dyn SmbClient>, credentials: Arc<dyn CredentialResolver>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                filesystems: DashMap::new(),
                client,
                credentials,
            }),
        }
    }

    /// Atomically looks up or creates the filesystem for `identity`.
    ///
    /// Concurrent callers with the same identity observe the same instance.
    /// Creation builds the connection manager but never touches the network.
    pub fn lookup_or_create(&self, identity: &FsIdentity, mode: LookupMode) -> Result<SmbFileSystem> {
        match self.inner.filesystems.entry(identity.clone()) {
            Entry::Occupied(entry) => {
                if mode == LookupMode::CreateOnly {
                    return Err(SmbFsError::FileSystemAlreadyExists {
                        identity: identity.to_string(),
                    });
                }
                Ok(SmbFileSystem::from_inner(entry.get().clone()))
            }
            Entry::Vacant(entry) => {
                if mode == LookupMode::LookupOnly {
                    return Err(SmbFsError::FileSystemNotFound {
                        identity: identity.to_string(),
                    });
                }
                let fs = self.create(identity)?;
                entry.insert(fs.inner().clone());
                Ok(fs)
            }
        }
    }

    fn create(&self, identity: &FsIdentity) -> Result<SmbFileSystem> {
        info!(target = %identity, "creating new filesystem");
        let identity = Arc::new(identity.clone());
        let credentials = self.inner.credentials.resolve(&identity)?;
        let connection = ConnectionManager::new(identity.clone(), self.inner.client.clone(), credentials);
        Ok(SmbFileSystem::new(
            identity,
            connection,
            Arc::downgrade(&self.inner),
        ))
    }

    /// Creates the filesystem for `uri`; fails if one is already open.
    pub fn new_file_system(&self, uri: &str) -> Result<SmbFileSystem> {
        self.lookup_or_create(&FsIdentity::from_uri(uri)?, LookupMode::CreateOnly)
    }

    /// Returns the open filesystem for `uri`; fails if there is none.
    pub fn get_file_system(&self, uri: &str) -> Result<SmbFileSystem> {
        self.lookup_or_create(&FsIdentity::from_uri(uri)?, LookupMode::LookupOnly)
    }

    /// Resolves an address to a path, creating its filesystem on demand.
    ///
    /// The path is whatever follows the share segment, or `/` if nothing does.
    pub fn get_path(&self, uri: &str) -> Result<SmbPath> {
        let (identity, rest) = FsIdentity::split_uri(uri)?;
        let fs = self.lookup_or_create(&identity, LookupMode::Either)?;
        let rest = if rest.is_empty() { SEPARATOR } else { rest.as_str() };
        fs.get_encoded_path(rest)
    }

    /// True if a filesystem is registered for `identity`.
    pub fn is_open(&self, identity: &FsIdentity) -> bool {
        self.inner.filesystems.contains_key(identity)
    }

    /// Number of registered filesystems.
    pub fn len(&self) -> usize {
        self.inner.filesystems.len()
    }

    /// True if no filesystem is registered.
    pub fn is_empty(&self) -> bool {
        self.inner.filesystems.is_empty()
    }

    /// Closes every registered filesystem; reports the first failure.
    pub fn close_all(&self) -> Result<()> {
        let open: Vec<Arc<FileSystemInner>> = self
            .inner
            .filesystems
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        let mut first_error = None;
        for fs in open {
            if let Err(e) = SmbFileSystem::from_inner(fs).close() {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for FileSystemRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSystemRegistry")
            .field("filesystems", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryServer;
    use std::thread;

    fn registry() -> (MemoryServer, FileSystemRegistry) {
        let server = MemoryServer::with_shares(&["share", "other"]);
        let registry = FileSystemRegistry::new(Arc::new(server.clone()), SmbFsConfig::default());
        (server, registry)
    }

    #[test]
    fn test_create_only_then_lookup_only() {
        let (_, registry) = registry();
        let created = registry.new_file_system("smb://host/share").unwrap();
        let found = registry.get_file_system("smb://host/share/any/path").unwrap();
        assert_eq!(created, found);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_create_only_fails_when_present() {
        let (_, registry) = registry();
        registry.new_file_system("smb://host/share").unwrap();
        let err = registry.new_file_system("smb://HOST/share").unwrap_err();
        assert!(matches!(err, SmbFsError::FileSystemAlreadyExists { .. }));
    }

    #[test]
    fn test_lookup_only_fails_when_absent() {
        let (_, registry) = registry();
        let err = registry.get_file_system("smb://host/share").unwrap_err();
        assert!(matches!(err, SmbFsError::FileSystemNotFound { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_creation_does_not_connect() {
        let (server, registry) = registry();
        registry.new_file_system("smb://host/share").unwrap();
        assert_eq!(server.connect_count(), 0);
    }

    #[test]
    fn test_get_path_creates_on_demand() {
        let (_, registry) = registry();
        let path = registry.get_path("smb://host/share/a/b%20c").unwrap();
        assert_eq!(path.to_string(), "/a/b c");
        assert!(registry.is_open(path.identity()));

        let root = registry.get_path("smb://host/share").unwrap();
        assert_eq!(root.to_string(), "/");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_distinct_shares_are_distinct_filesystems() {
        let (_, registry) = registry();
        let a = registry.get_path("smb://host/share/x").unwrap();
        let b = registry.get_path("smb://host/other/x").unwrap();
        assert_ne!(a.file_system().unwrap(), b.file_system().unwrap());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_close_deregisters_and_allows_recreation() {
        let (_, registry) = registry();
        let fs = registry.new_file_system("smb://host/share").unwrap();
        fs.close().unwrap();
        assert!(!registry.is_open(fs.identity()));
        assert!(registry.get_file_system("smb://host/share").is_err());

        let again = registry.new_file_system("smb://host/share").unwrap();
        assert_ne!(again, fs);
        assert!(again.is_open());
    }

    #[test]
    fn test_concurrent_creation_yields_one_instance() {
        let (_, registry) = registry();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                thread::spawn(move || registry.get_path("smb://host/share/x").unwrap())
            })
            .collect();
        let paths: Vec<SmbPath> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let first = paths[0].file_system().unwrap();
        for path in &paths[1..] {
            assert_eq!(path.file_system().unwrap(), first);
        }
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_close_all() {
        let (_, registry) = registry();
        let a = registry.new_file_system("smb://host/share").unwrap();
        let b = registry.new_file_system("smb://host/other").unwrap();
        registry.close_all().unwrap();
        assert!(registry.is_empty());
        assert!(!a.is_open());
        assert!(!b.is_open());
    }

    #[test]
    fn test_invalid_ticket_service_rejected_at_creation() {
        let server = MemoryServer::with_shares(&["share"]);
        let config = SmbFsConfig {
            ticket_service: Some(String::new()),
            ..Default::default()
        };
        let registry = FileSystemRegistry::new(Arc::new(server), config);
        assert!(registry.new_file_system("smb://host/share").is_err());
        assert!(registry.is_empty());
    }
}
