//! Capacity view of a mounted share.

use std::fmt;

use crate::attributes::AttributeViewKind;
use crate::dispatch;
use crate::error::{Result, SmbFsError};
use crate::path::SmbPath;
use crate::remote::ShareInformation;

/// Type reported by every store.
pub const STORE_TYPE: &str = "basic";

/// The share a filesystem is mounted on, seen as one store.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SmbFileStore {
    path: SmbPath,
}

impl SmbFileStore {
    /// Store of the filesystem `path` belongs to.
    pub fn new(path: SmbPath) -> Self {
        Self { path }
    }

    /// Root of the store.
    pub fn path(&self) -> &SmbPath {
        &self.path
    }

    /// The identity string of the owning filesystem.
    pub fn name(&self) -> String {
        self.path.identity().to_string()
    }

    /// Always `basic`.
    pub fn store_type(&self) -> &'static str {
        STORE_TYPE
    }

    /// Always false.
    pub fn is_read_only(&self) -> bool {
        false
    }

    fn share_information(&self) -> Result<ShareInformation> {
        dispatch::call(&self.path, "share_information", |share, _| share.share_information())
    }

    /// Size of the share in bytes.
    pub fn total_space(&self) -> Result<u64> {
        Ok(self.share_information()?.total_space)
    }

    /// Space available to the authenticated caller.
    pub fn usable_space(&self) -> Result<u64> {
        Ok(self.share_information()?.caller_free_space)
    }

    /// Free space on the share.
    pub fn unallocated_space(&self) -> Result<u64> {
        Ok(self.share_information()?.free_space)
    }

    /// True for the views in [`AttributeViewKind::SUPPORTED`].
    pub fn supports_attribute_view(&self, kind: AttributeViewKind) -> bool {
        AttributeViewKind::SUPPORTED.contains(&kind)
    }

    /// Same check by view name.
    pub fn supports_attribute_view_name(&self, name: &str) -> bool {
        AttributeViewKind::from_name(name).is_some()
    }

    /// Store attributes by name are not offered.
    pub fn attribute(&self, name: &str) -> Result<u64> {
        Err(SmbFsError::unsupported(format!("file store attribute '{}'", name)))
    }
}

impl fmt::Debug for SmbFileStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SmbFileStore({})", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SmbFsConfig;
    use crate::registry::FileSystemRegistry;
    use crate::testing::MemoryServer;
    use std::sync::Arc;

    fn store() -> (FileSystemRegistry, SmbFileStore) {
        let server = MemoryServer::with_shares(&["share"]);
        server.set_capacity(
            "share",
            ShareInformation {
                total_space: 1000,
                caller_free_space: 300,
                free_space: 400,
            },
        );
        let registry = FileSystemRegistry::new(Arc::new(server.clone()), SmbFsConfig::default());
        let fs = registry.new_file_system("smb://host/share").unwrap();
        let store = fs.file_stores().unwrap().remove(0);
        (registry, store)
    }

    #[test]
    fn test_capacity_figures() {
        let (_registry, store) = store();
        assert_eq!(store.total_space().unwrap(), 1000);
        assert_eq!(store.usable_space().unwrap(), 300);
        assert_eq!(store.unallocated_space().unwrap(), 400);
    }

    #[test]
    fn test_descriptive_properties() {
        let (_registry, store) = store();
        assert_eq!(store.name(), "smb://host/share");
        assert_eq!(store.store_type(), "basic");
        assert!(!store.is_read_only());
        assert!(store.supports_attribute_view(AttributeViewKind::Basic));
        assert!(store.supports_attribute_view_name("basic"));
        assert!(!store.supports_attribute_view_name("acl"));
        assert!(store.attribute("totalSpace").is_err());
    }

    #[test]
    fn test_store_of_closed_filesystem() {
        let (_registry, store) = store();
        store.path().file_system().unwrap().close().unwrap();
        assert!(store.total_space().is_err());
    }
}
