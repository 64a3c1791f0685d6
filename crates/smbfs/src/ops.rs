//! Filesystem operations on paths: create, delete, copy, move and queries.

use tracing::debug;

use crate::attributes::{self, AttributeViewKind, BasicFileAttributeView, BasicFileAttributes};
use crate::channel::{OpenOptions, SmbByteChannel};
use crate::directory::DirectoryStream;
use crate::dispatch::{self, FileGuard};
use crate::error::{Result, SmbFsError};
use crate::path::SmbPath;
use crate::remote::{
    AccessMask, BasicInformationUpdate, CreateDisposition, CreateOptions, DiskShare, FileAttributes,
    NtStatus, RemoteError, RemoteFile, RemoteResult, ShareAccess,
};
use crate::store::SmbFileStore;

/// Chunk size of the client-side copy fallback.
const COPY_CHUNK: usize = 64 * 1024;

/// Flags for [`copy`] and [`move_path`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyOptions {
    /// Overwrite an existing target instead of failing `AlreadyExists`.
    pub replace_existing: bool,
    /// Carry timestamps and attribute bits over to the target.
    pub copy_attributes: bool,
}

impl CopyOptions {
    /// Options that overwrite an existing target.
    pub fn replace_existing() -> Self {
        Self {
            replace_existing: true,
            ..Self::default()
        }
    }
}

/// Access checked by [`check_access`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    /// Read the content
    Read,
    /// Write the content
    Write,
    /// Execute the file
    Execute,
}

impl AccessMode {
    fn mask(self) -> AccessMask {
        match self {
            AccessMode::Read => AccessMask::GENERIC_READ,
            AccessMode::Write => AccessMask::GENERIC_WRITE,
            AccessMode::Execute => AccessMask::GENERIC_EXECUTE,
        }
    }
}

/// Opens a byte channel on `path`.
pub fn new_byte_channel(path: &SmbPath, options: &OpenOptions) -> Result<SmbByteChannel> {
    debug!(path = %path, ?options, "new byte channel");
    SmbByteChannel::open(path, options)
}

/// Opens a single-use listing of `dir`.
pub fn read_dir(dir: &SmbPath) -> Result<DirectoryStream> {
    debug!(dir = %dir, "new directory stream");
    DirectoryStream::open(dir)
}

/// Creates `dir`; fails `AlreadyExists` if anything is there already.
pub fn create_dir(dir: &SmbPath) -> Result<()> {
    debug!(dir = %dir, "create directory");
    dispatch::call(dir, "create_dir", |share, relative| {
        let handle = share.open(
            relative,
            AccessMask::GENERIC_WRITE,
            FileAttributes::DIRECTORY,
            ShareAccess::ALL,
            CreateDisposition::Create,
            CreateOptions::DIRECTORY_FILE,
        )?;
        FileGuard::new(handle).finish()
    })
}

/// Deletes a file or an empty directory.
pub fn remove(path: &SmbPath) -> Result<()> {
    debug!(path = %path, "delete");
    dispatch::call(path, "delete", |share, relative| share.delete(relative))
}

fn open_target(
    share: &dyn DiskShare,
    relative: &str,
    options: &CopyOptions,
) -> RemoteResult<FileGuard> {
    let disposition = if options.replace_existing {
        CreateDisposition::OverwriteIf
    } else {
        CreateDisposition::Create
    };
    share
        .open(
            relative,
            AccessMask::GENERIC_WRITE,
            FileAttributes::NORMAL,
            ShareAccess::WRITE,
            disposition,
            CreateOptions::NON_DIRECTORY_FILE,
        )
        .map(FileGuard::new)
}

/// Server-side copy, falling back to streaming when the server cannot.
fn transfer(source: &dyn RemoteFile, target: &dyn RemoteFile, options: &CopyOptions) -> RemoteResult<()> {
    match source.remote_copy_to(target) {
        Ok(()) => {}
        Err(e) if e.status == NtStatus::NotSupported => {
            debug!("remote copy unsupported, fallback to streaming");
            stream_copy(source, target)?;
        }
        Err(e) => return Err(e),
    }
    if options.copy_attributes {
        let info = source.file_information()?;
        target.set_basic_information(&BasicInformationUpdate::from(&info.basic))?;
    }
    Ok(())
}

fn stream_copy(source: &dyn RemoteFile, target: &dyn RemoteFile) -> RemoteResult<u64> {
    let mut buf = vec![0u8; COPY_CHUNK];
    let mut offset = 0u64;
    loop {
        let n = source.read(&mut buf, offset)?;
        if n == 0 {
            break;
        }
        let mut written = 0;
        while written < n {
            let w = target.write(&buf[written..n], offset + written as u64)?;
            if w == 0 {
                // STATUS_DISK_FULL
                return Err(RemoteError::new(
                    NtStatus::Other(0xC000_007F),
                    "target accepted no bytes",
                ));
            }
            written += w;
        }
        offset += n as u64;
    }
    Ok(offset)
}

/// Copies the content of `source` to `target`, which may live on another share.
pub fn copy(source: &SmbPath, target: &SmbPath, options: &CopyOptions) -> Result<()> {
    debug!(source = %source, target = %target, ?options, "copy");
    dispatch::call2(source, target, "copy", |share, relative, other_share, other_relative| {
        let src = FileGuard::new(share.open(
            relative,
            AccessMask::GENERIC_READ,
            FileAttributes::NORMAL,
            ShareAccess::READ,
            CreateDisposition::Open,
            CreateOptions::NON_DIRECTORY_FILE,
        )?);
        let dst = open_target(&**other_share, other_relative, options)?;
        transfer(&*src, &*dst, options)?;
        dst.finish()?;
        src.finish()
    })
}

/// Moves `source` to `target`.
///
/// Within one share this is a rename. Across shares the content is copied
/// and the source is deleted when its handle closes.
pub fn move_path(source: &SmbPath, target: &SmbPath, options: &CopyOptions) -> Result<()> {
    debug!(source = %source, target = %target, ?options, "move");
    let same_share = source.identity() == target.identity();
    dispatch::call2(source, target, "move", |share, relative, other_share, other_relative| {
        if same_share {
            // The target lease was taken last, so it is the one that
            // survived a reconnect between the two.
            let src = FileGuard::new(other_share.open(
                relative,
                AccessMask::DELETE,
                FileAttributes::NORMAL,
                ShareAccess::DELETE,
                CreateDisposition::Open,
                CreateOptions::empty(),
            )?);
            src.rename(other_relative, options.replace_existing)?;
            return src.finish();
        }

        debug!("different shares, copy and delete");
        let src = FileGuard::new(share.open(
            relative,
            AccessMask::GENERIC_READ | AccessMask::DELETE,
            FileAttributes::NORMAL,
            ShareAccess::READ | ShareAccess::DELETE,
            CreateDisposition::Open,
            CreateOptions::NON_DIRECTORY_FILE,
        )?);
        let dst = open_target(&**other_share, other_relative, options)?;
        transfer(&*src, &*dst, options)?;
        dst.finish()?;
        src.delete_on_close()?;
        src.finish()
    })
}

/// True if both paths name the same object. Makes no remote call.
pub fn is_same_file(a: &SmbPath, b: &SmbPath) -> bool {
    a.identity() == b.identity()
        && a.to_absolute_path().normalize().components() == b.to_absolute_path().normalize().components()
}

/// True if the hidden bit of `path` is set.
pub fn is_hidden(path: &SmbPath) -> Result<bool> {
    let info = dispatch::call(path, "file_information", |share, relative| {
        share.file_information(relative)
    })?;
    Ok(info.basic.attributes.contains(FileAttributes::HIDDEN))
}

/// Opens `path` with the rights `modes` map to and closes it again.
///
/// With no modes this only checks that the path exists.
pub fn check_access(path: &SmbPath, modes: &[AccessMode]) -> Result<()> {
    let mask = modes
        .iter()
        .fold(AccessMask::empty(), |mask, mode| mask | mode.mask());
    debug!(path = %path, ?modes, "check access");
    dispatch::call(path, "check_access", |share, relative| {
        let handle = share.open(
            relative,
            mask,
            FileAttributes::NORMAL,
            ShareAccess::ALL,
            CreateDisposition::Open,
            CreateOptions::empty(),
        )?;
        FileGuard::new(handle).finish()
    })
}

/// Fetches the basic attributes of `path`.
pub fn metadata(path: &SmbPath) -> Result<BasicFileAttributes> {
    attributes::metadata(path)
}

/// The attribute view of `kind` bound to `path`.
pub fn attribute_view(path: &SmbPath, kind: AttributeViewKind) -> BasicFileAttributeView {
    attributes::attribute_view(path, kind)
}

/// Reading attributes by name is not offered; use [`metadata`].
pub fn read_attributes_by_name(_path: &SmbPath, attributes: &str) -> Result<BasicFileAttributes> {
    Err(SmbFsError::unsupported(format!("reading attributes '{}' by name", attributes)))
}

/// Setting attributes by name is not offered; use [`attribute_view`].
pub fn set_attribute(_path: &SmbPath, attribute: &str) -> Result<()> {
    Err(SmbFsError::unsupported(format!("setting attribute '{}'", attribute)))
}

/// The store holding `path`, i.e. its share.
pub fn file_store(path: &SmbPath) -> Result<SmbFileStore> {
    let fs = path.file_system()?;
    fs.ensure_open()?;
    Ok(SmbFileStore::new(fs.root()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SmbFsConfig;
    use crate::error::ErrorKind;
    use crate::registry::FileSystemRegistry;
    use crate::testing::MemoryServer;
    use std::sync::Arc;
    use std::time::{Duration, SystemTime};

    fn setup() -> (MemoryServer, FileSystemRegistry) {
        let server = MemoryServer::with_shares(&["share", "other"]);
        server.write_file("share", "src.txt", b"0123456789");
        let registry = FileSystemRegistry::new(Arc::new(server.clone()), SmbFsConfig::default());
        (server, registry)
    }

    fn path(registry: &FileSystemRegistry, uri: &str) -> SmbPath {
        registry.get_path(uri).unwrap()
    }

    #[test]
    fn test_create_and_remove_directory() {
        let (server, registry) = setup();
        let dir = path(&registry, "smb://host/share/newdir");
        create_dir(&dir).unwrap();
        assert!(server.is_dir("share", "newdir"));
        assert_eq!(create_dir(&dir).unwrap_err().kind(), ErrorKind::AlreadyExists);
        remove(&dir).unwrap();
        assert!(!server.exists("share", "newdir"));
    }

    #[test]
    fn test_create_dir_with_missing_parent() {
        let (_, registry) = setup();
        let dir = path(&registry, "smb://host/share/a/b");
        assert_eq!(create_dir(&dir).unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_remove_missing_and_non_empty() {
        let (server, registry) = setup();
        assert_eq!(
            remove(&path(&registry, "smb://host/share/missing")).unwrap_err().kind(),
            ErrorKind::NotFound
        );
        server.write_file("share", "full/x", b"x");
        let err = remove(&path(&registry, "smb://host/share/full")).unwrap_err();
        assert_eq!(err.status(), Some(NtStatus::DirectoryNotEmpty));
    }

    #[test]
    fn test_copy_within_share() {
        let (server, registry) = setup();
        copy(
            &path(&registry, "smb://host/share/src.txt"),
            &path(&registry, "smb://host/share/dst.txt"),
            &CopyOptions::default(),
        )
        .unwrap();
        assert_eq!(server.read_file("share", "dst.txt").unwrap(), b"0123456789");
        assert_eq!(server.read_file("share", "src.txt").unwrap(), b"0123456789");
        assert_eq!(server.open_handle_count(), 0);
    }

    #[test]
    fn test_copy_onto_existing_target() {
        let (server, registry) = setup();
        server.write_file("share", "dst.txt", b"old content that is longer");
        let source = path(&registry, "smb://host/share/src.txt");
        let target = path(&registry, "smb://host/share/dst.txt");

        let err = copy(&source, &target, &CopyOptions::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert!(err.to_string().contains("/dst.txt"));

        copy(&source, &target, &CopyOptions::replace_existing()).unwrap();
        assert_eq!(server.read_file("share", "dst.txt").unwrap(), b"0123456789");
    }

    #[test]
    fn test_copy_falls_back_to_streaming() {
        let (server, registry) = setup();
        server.set_remote_copy_supported(false);
        copy(
            &path(&registry, "smb://host/share/src.txt"),
            &path(&registry, "smb://host/other/dst.txt"),
            &CopyOptions::default(),
        )
        .unwrap();
        assert_eq!(server.read_file("other", "dst.txt").unwrap(), b"0123456789");
        assert_eq!(server.remote_copy_count(), 0);
    }

    #[test]
    fn test_copy_uses_server_side_copy_when_available() {
        let (server, registry) = setup();
        copy(
            &path(&registry, "smb://host/share/src.txt"),
            &path(&registry, "smb://host/other/dst.txt"),
            &CopyOptions::default(),
        )
        .unwrap();
        assert_eq!(server.remote_copy_count(), 1);
    }

    #[test]
    fn test_copy_attributes() {
        let (server, registry) = setup();
        let source = path(&registry, "smb://host/share/src.txt");
        let stamp = SystemTime::UNIX_EPOCH + Duration::from_secs(86_400);
        attribute_view(&source, AttributeViewKind::Basic)
            .set_times(Some(stamp), None, None)
            .unwrap();

        let target = path(&registry, "smb://host/share/dst.txt");
        copy(
            &source,
            &target,
            &CopyOptions {
                copy_attributes: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(metadata(&target).unwrap().last_modified_time, stamp);
        assert!(server.exists("share", "dst.txt"));
    }

    #[test]
    fn test_copy_missing_source() {
        let (_, registry) = setup();
        let err = copy(
            &path(&registry, "smb://host/share/missing"),
            &path(&registry, "smb://host/share/dst.txt"),
            &CopyOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_move_within_share_renames() {
        let (server, registry) = setup();
        move_path(
            &path(&registry, "smb://host/share/src.txt"),
            &path(&registry, "smb://host/share/moved.txt"),
            &CopyOptions::default(),
        )
        .unwrap();
        assert!(!server.exists("share", "src.txt"));
        assert_eq!(server.read_file("share", "moved.txt").unwrap(), b"0123456789");
        assert_eq!(server.remote_copy_count(), 0);
    }

    #[test]
    fn test_move_within_share_renames_across_a_reconnect() {
        let (server, registry) = setup();
        let source = path(&registry, "smb://host/share/src.txt");
        let target = path(&registry, "smb://host/share/moved.txt");
        server.drop_connections_after_next_mount();

        move_path(&source, &target, &CopyOptions::default()).unwrap();
        assert_eq!(server.read_file("share", "moved.txt").unwrap(), b"0123456789");
        assert!(!server.exists("share", "src.txt"));
        assert_eq!(server.remote_copy_count(), 0);
        assert_eq!(server.mount_count(), 2);
        assert_eq!(source.file_system().unwrap().connection().reconnect_count(), 2);
    }

    #[test]
    fn test_move_within_share_onto_existing() {
        let (server, registry) = setup();
        server.write_file("share", "taken.txt", b"x");
        let source = path(&registry, "smb://host/share/src.txt");
        let target = path(&registry, "smb://host/share/taken.txt");
        assert_eq!(
            move_path(&source, &target, &CopyOptions::default()).unwrap_err().kind(),
            ErrorKind::AlreadyExists
        );
        move_path(&source, &target, &CopyOptions::replace_existing()).unwrap();
        assert_eq!(server.read_file("share", "taken.txt").unwrap(), b"0123456789");
    }

    #[test]
    fn test_move_across_shares() {
        let (server, registry) = setup();
        let source = path(&registry, "smb://host/share/src.txt");
        move_path(
            &source,
            &path(&registry, "smb://host/other/dst.txt"),
            &CopyOptions::default(),
        )
        .unwrap();
        assert_eq!(server.read_file("other", "dst.txt").unwrap(), b"0123456789");
        assert!(!server.exists("share", "src.txt"));
        assert_eq!(metadata(&source).unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(server.open_handle_count(), 0);
    }

    #[test]
    fn test_is_same_file() {
        let (_, registry) = setup();
        let a = path(&registry, "smb://host/share/a/b");
        let fs = a.file_system().unwrap();
        assert!(is_same_file(&a, &fs.get_path("a/b", &[]).unwrap()));
        assert!(is_same_file(&a, &fs.get_path("/a/./b", &[]).unwrap()));
        assert!(!is_same_file(&a, &path(&registry, "smb://host/other/a/b")));
    }

    #[test]
    fn test_is_hidden() {
        let (server, registry) = setup();
        server.write_file("share", "secret", b"");
        server.set_hidden("share", "secret");
        assert!(is_hidden(&path(&registry, "smb://host/share/secret")).unwrap());
        assert!(!is_hidden(&path(&registry, "smb://host/share/src.txt")).unwrap());
    }

    #[test]
    fn test_check_access() {
        let (server, registry) = setup();
        let source = path(&registry, "smb://host/share/src.txt");
        check_access(&source, &[]).unwrap();
        check_access(&source, &[AccessMode::Read, AccessMode::Write]).unwrap();

        server.write_protect("share", "src.txt");
        assert_eq!(
            check_access(&source, &[AccessMode::Write]).unwrap_err().kind(),
            ErrorKind::AccessDenied
        );
        check_access(&source, &[AccessMode::Read]).unwrap();
        assert_eq!(
            check_access(&path(&registry, "smb://host/share/missing"), &[]).unwrap_err().kind(),
            ErrorKind::NotFound
        );
        assert_eq!(server.open_handle_count(), 0);
    }

    #[test]
    fn test_unsupported_attribute_access() {
        let (_, registry) = setup();
        let source = path(&registry, "smb://host/share/src.txt");
        assert_eq!(
            read_attributes_by_name(&source, "*").unwrap_err().kind(),
            ErrorKind::Unsupported
        );
        assert_eq!(
            set_attribute(&source, "dos:hidden").unwrap_err().kind(),
            ErrorKind::Unsupported
        );
    }

    #[test]
    fn test_file_store_of_path() {
        let (_, registry) = setup();
        let store = file_store(&path(&registry, "smb://host/share/src.txt")).unwrap();
        assert_eq!(store.path().to_string(), "/");
    }

    #[test]
    fn test_write_protected_target_denies_copy() {
        let (server, registry) = setup();
        server.create_dir_all("other", "locked");
        server.write_protect("other", "locked");
        let err = copy(
            &path(&registry, "smb://host/share/src.txt"),
            &path(&registry, "smb://host/other/locked/dst.txt"),
            &CopyOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AccessDenied);
    }
}
