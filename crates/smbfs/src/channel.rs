//! Positioned byte channel over one remote file handle.

use std::fmt;
use std::io::{self, Read, Seek, SeekFrom, Write};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::dispatch;
use crate::error::{Result, SmbFsError};
use crate::path::SmbPath;
use crate::remote::{
    AccessMask, CreateDisposition, CreateOptions, FileAttributes, RemoteError, RemoteFile, ShareAccess,
};

/// How a channel is opened. Mirrors `std::fs::OpenOptions`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenOptions {
    read: bool,
    write: bool,
    append: bool,
    truncate_existing: bool,
    create: bool,
    create_new: bool,
    delete_on_close: bool,
    sparse: bool,
    sync: bool,
    dsync: bool,
}

impl OpenOptions {
    /// All options off.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open for reading.
    pub fn read(&mut self, read: bool) -> &mut Self {
        self.read = read;
        self
    }

    /// Open for writing.
    pub fn write(&mut self, write: bool) -> &mut Self {
        self.write = write;
        self
    }

    /// Start writing at the current end of file. Implies write access.
    pub fn append(&mut self, append: bool) -> &mut Self {
        self.append = append;
        self
    }

    /// Empty an existing file on open. Only honoured with write access.
    pub fn truncate_existing(&mut self, truncate: bool) -> &mut Self {
        self.truncate_existing = truncate;
        self
    }

    /// Create the file if it is missing.
    pub fn create(&mut self, create: bool) -> &mut Self {
        self.create = create;
        self
    }

    /// Create the file and fail with `AlreadyExists` if it is present.
    pub fn create_new(&mut self, create_new: bool) -> &mut Self {
        self.create_new = create_new;
        self
    }

    /// Not supported; opening fails with `Unsupported` when set.
    pub fn delete_on_close(&mut self, delete_on_close: bool) -> &mut Self {
        self.delete_on_close = delete_on_close;
        self
    }

    /// Not supported; opening fails with `Unsupported` when set.
    pub fn sparse(&mut self, sparse: bool) -> &mut Self {
        self.sparse = sparse;
        self
    }

    /// Not supported; opening fails with `Unsupported` when set.
    pub fn sync(&mut self, sync: bool) -> &mut Self {
        self.sync = sync;
        self
    }

    /// Not supported; opening fails with `Unsupported` when set.
    pub fn dsync(&mut self, dsync: bool) -> &mut Self {
        self.dsync = dsync;
        self
    }

    /// Opens a channel on `path` with these options.
    pub fn open(&self, path: &SmbPath) -> Result<SmbByteChannel> {
        SmbByteChannel::open(path, self)
    }

    fn writing(&self) -> bool {
        self.write || self.append
    }

    fn disposition(&self) -> CreateDisposition {
        if self.create_new {
            CreateDisposition::Create
        } else if self.create {
            CreateDisposition::OpenIf
        } else {
            CreateDisposition::Open
        }
    }

    fn check_supported(&self) -> Result<()> {
        let unsupported = [
            (self.sync, "sync"),
            (self.dsync, "dsync"),
            (self.sparse, "sparse"),
            (self.delete_on_close, "delete-on-close"),
        ];
        match unsupported.iter().find(|(set, _)| *set) {
            Some((_, name)) => Err(SmbFsError::unsupported(format!("open option {}", name))),
            None => Ok(()),
        }
    }
}

struct ChannelState {
    file: Option<Box<dyn RemoteFile>>,
    position: u64,
}

/// Seekable channel on a remote file.
///
/// Reads and writes start at the channel position and advance it by the
/// number of bytes transferred. All operations serialize on the channel.
pub struct SmbByteChannel {
    path: SmbPath,
    state: Mutex<ChannelState>,
}

impl SmbByteChannel {
    /// Opens `path`. Write or append access opens for writing, anything
    /// else for reading; the position starts at 0, or at the end for append.
    pub fn open(path: &SmbPath, options: &OpenOptions) -> Result<Self> {
        options.check_supported()?;
        let writing = options.writing();
        let (access, share_access) = if writing {
            (AccessMask::GENERIC_WRITE, ShareAccess::READ)
        } else {
            (AccessMask::GENERIC_READ, ShareAccess::READ | ShareAccess::WRITE)
        };
        let disposition = options.disposition();
        debug!(path = %path, ?disposition, writing, "opening channel");

        let file = dispatch::call(path, "open", |share, relative| {
            share.open(
                relative,
                access,
                FileAttributes::NORMAL,
                share_access,
                disposition,
                CreateOptions::NON_DIRECTORY_FILE,
            )
        })?;
        let channel = Self {
            path: path.clone(),
            state: Mutex::new(ChannelState {
                file: Some(file),
                position: 0,
            }),
        };

        if writing {
            if options.truncate_existing {
                channel.truncate(0)?;
            }
            if options.append {
                let size = channel.size()?;
                channel.set_position(size)?;
            }
        }
        Ok(channel)
    }

    /// The path the channel was opened on.
    pub fn path(&self) -> &SmbPath {
        &self.path
    }

    fn translate(&self, err: RemoteError) -> SmbFsError {
        SmbFsError::from_remote(err, self.path.to_string(), None)
    }

    fn closed(&self) -> SmbFsError {
        SmbFsError::closed(format!("channel on {}", self.path))
    }

    /// Fails with `Closed` once the owning filesystem has been closed.
    fn ensure_file_system_open(&self) -> Result<()> {
        self.path.file_system()?.ensure_open()
    }

    /// The open handle, provided both the channel and its filesystem are open.
    fn handle<'a>(&self, state: &'a ChannelState) -> Result<&'a dyn RemoteFile> {
        let file = state.file.as_deref().ok_or_else(|| self.closed())?;
        self.ensure_file_system_open()?;
        Ok(file)
    }

    /// Reads at the current position; returns 0 at end of file.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.state.lock();
        let position = state.position;
        let n = self
            .handle(&state)?
            .read(buf, position)
            .map_err(|e| self.translate(e))?;
        state.position += n as u64;
        Ok(n)
    }

    /// Writes at the current position, extending the file as needed.
    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        let mut state = self.state.lock();
        let position = state.position;
        let n = self
            .handle(&state)?
            .write(buf, position)
            .map_err(|e| self.translate(e))?;
        state.position += n as u64;
        Ok(n)
    }

    /// Current position.
    pub fn position(&self) -> Result<u64> {
        let state = self.state.lock();
        self.handle(&state)?;
        Ok(state.position)
    }

    /// Moves the position; it may go past the end of file.
    pub fn set_position(&self, position: u64) -> Result<()> {
        let mut state = self.state.lock();
        self.handle(&state)?;
        state.position = position;
        Ok(())
    }

    /// Current end-of-file as reported by the server.
    pub fn size(&self) -> Result<u64> {
        let state = self.state.lock();
        let info = self
            .handle(&state)?
            .file_information()
            .map_err(|e| self.translate(e))?;
        Ok(info.standard.end_of_file)
    }

    /// Sets the end of file to `size`, pulling the position back if needed.
    pub fn truncate(&self, size: u64) -> Result<()> {
        let mut state = self.state.lock();
        self.handle(&state)?
            .set_length(size)
            .map_err(|e| self.translate(e))?;
        state.position = state.position.min(size);
        Ok(())
    }

    /// False once the channel or its filesystem has been closed.
    pub fn is_open(&self) -> bool {
        self.state.lock().file.is_some() && self.ensure_file_system_open().is_ok()
    }

    /// Releases the remote handle. Later calls are no-ops.
    ///
    /// After the filesystem was closed the handle went down with its
    /// connection, so a failing release is only logged.
    pub fn close(&self) -> Result<()> {
        let file = self.state.lock().file.take();
        let Some(file) = file else {
            return Ok(());
        };
        match file.close() {
            Ok(()) => Ok(()),
            Err(e) if self.ensure_file_system_open().is_err() => {
                debug!(path = %self.path, error = %e, "handle released with its filesystem");
                Ok(())
            }
            Err(e) => Err(self.translate(e)),
        }
    }
}

impl Drop for SmbByteChannel {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(path = %self.path, error = %e, "closing channel handle failed");
        }
    }
}

impl fmt::Debug for SmbByteChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmbByteChannel")
            .field("path", &self.path)
            .field("open", &self.is_open())
            .finish()
    }
}

impl Read for SmbByteChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        SmbByteChannel::read(self, buf).map_err(io::Error::from)
    }
}

impl Write for SmbByteChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        SmbByteChannel::write(self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(io::Error::from(self.closed()))
        }
    }
}

impl Seek for SmbByteChannel {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let (base, offset) = match pos {
            SeekFrom::Start(n) => {
                self.set_position(n)?;
                return Ok(n);
            }
            SeekFrom::End(offset) => (self.size()?, offset),
            SeekFrom::Current(offset) => (self.position()?, offset),
        };
        let target = base.checked_add_signed(offset).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative or overflowing position",
            )
        })?;
        self.set_position(target)?;
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SmbFsConfig;
    use crate::error::ErrorKind;
    use crate::registry::FileSystemRegistry;
    use crate::testing::MemoryServer;
    use std::sync::Arc;

    fn setup() -> (MemoryServer, FileSystemRegistry) {
        let server = MemoryServer::with_shares(&["share"]);
        server.write_file("share", "file.txt", b"hello world");
        server.create_dir_all("share", "dir");
        let registry = FileSystemRegistry::new(Arc::new(server.clone()), SmbFsConfig::default());
        (server, registry)
    }

    fn path(registry: &FileSystemRegistry, raw: &str) -> SmbPath {
        registry.get_path(&format!("smb://host/share{}", raw)).unwrap()
    }

    #[test]
    fn test_read_advances_position() {
        let (_, registry) = setup();
        let channel = OpenOptions::new().read(true).open(&path(&registry, "/file.txt")).unwrap();
        let mut buf = [0u8; 5];
        assert_eq!(channel.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");
        assert_eq!(channel.position().unwrap(), 5);
        assert_eq!(channel.size().unwrap(), 11);
    }

    #[test]
    fn test_read_at_end_returns_zero() {
        let (_, registry) = setup();
        let channel = OpenOptions::new().read(true).open(&path(&registry, "/file.txt")).unwrap();
        channel.set_position(11).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(channel.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_write_then_size() {
        let (server, registry) = setup();
        let channel = OpenOptions::new()
            .write(true)
            .create(true)
            .open(&path(&registry, "/new.bin"))
            .unwrap();
        assert_eq!(channel.write(b"abc").unwrap(), 3);
        assert_eq!(channel.write(b"de").unwrap(), 2);
        assert_eq!(channel.size().unwrap(), 5);
        channel.close().unwrap();
        assert_eq!(server.read_file("share", "new.bin").unwrap(), b"abcde");
    }

    #[test]
    fn test_create_new_on_existing_file_fails() {
        let (_, registry) = setup();
        let err = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path(&registry, "/file.txt"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[test]
    fn test_open_missing_without_create_is_not_found() {
        let (_, registry) = setup();
        let err = OpenOptions::new().read(true).open(&path(&registry, "/missing")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_truncate_existing_empties_file() {
        let (_, registry) = setup();
        let channel = OpenOptions::new()
            .write(true)
            .truncate_existing(true)
            .open(&path(&registry, "/file.txt"))
            .unwrap();
        assert_eq!(channel.size().unwrap(), 0);
        assert_eq!(channel.position().unwrap(), 0);
    }

    #[test]
    fn test_append_starts_at_end() {
        let (server, registry) = setup();
        let channel = OpenOptions::new().append(true).open(&path(&registry, "/file.txt")).unwrap();
        assert_eq!(channel.position().unwrap(), 11);
        channel.write(b"!").unwrap();
        channel.close().unwrap();
        assert_eq!(server.read_file("share", "file.txt").unwrap(), b"hello world!");
    }

    #[test]
    fn test_truncate_pulls_position_back() {
        let (_, registry) = setup();
        let channel = OpenOptions::new().write(true).open(&path(&registry, "/file.txt")).unwrap();
        channel.set_position(8).unwrap();
        channel.truncate(4).unwrap();
        assert_eq!(channel.position().unwrap(), 4);
        channel.truncate(10).unwrap();
        assert_eq!(channel.position().unwrap(), 4);
    }

    #[test]
    fn test_unsupported_options() {
        let (_, registry) = setup();
        let target = path(&registry, "/file.txt");
        for options in [
            OpenOptions::new().read(true).sync(true).clone(),
            OpenOptions::new().read(true).dsync(true).clone(),
            OpenOptions::new().write(true).sparse(true).clone(),
            OpenOptions::new().write(true).delete_on_close(true).clone(),
        ] {
            let err = options.open(&target).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Unsupported);
        }
    }

    #[test]
    fn test_opening_a_directory_is_access_denied() {
        let (_, registry) = setup();
        let err = OpenOptions::new().read(true).open(&path(&registry, "/dir")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AccessDenied);
    }

    #[test]
    fn test_everything_fails_closed_after_close() {
        let (server, registry) = setup();
        let channel = OpenOptions::new().read(true).open(&path(&registry, "/file.txt")).unwrap();
        channel.close().unwrap();
        assert!(!channel.is_open());
        let mut buf = [0u8; 1];
        assert_eq!(channel.read(&mut buf).unwrap_err().kind(), ErrorKind::ClosedResource);
        assert_eq!(channel.write(b"x").unwrap_err().kind(), ErrorKind::ClosedResource);
        assert_eq!(channel.position().unwrap_err().kind(), ErrorKind::ClosedResource);
        assert_eq!(channel.set_position(1).unwrap_err().kind(), ErrorKind::ClosedResource);
        assert_eq!(channel.size().unwrap_err().kind(), ErrorKind::ClosedResource);
        assert_eq!(channel.truncate(0).unwrap_err().kind(), ErrorKind::ClosedResource);
        assert!(channel.close().is_ok());
        assert_eq!(server.open_handle_count(), 0);
    }

    #[test]
    fn test_file_system_close_closes_channel() {
        let (server, registry) = setup();
        let target = path(&registry, "/file.txt");
        let channel = OpenOptions::new().read(true).open(&target).unwrap();
        target.file_system().unwrap().close().unwrap();

        let mut buf = [0u8; 1];
        assert_eq!(channel.read(&mut buf).unwrap_err().kind(), ErrorKind::ClosedResource);
        assert_eq!(channel.size().unwrap_err().kind(), ErrorKind::ClosedResource);
        assert!(!channel.is_open());
        drop(channel);
        assert_eq!(server.open_handle_count(), 0);
    }

    #[test]
    fn test_drop_releases_handle() {
        let (server, registry) = setup();
        {
            let _channel = OpenOptions::new().read(true).open(&path(&registry, "/file.txt")).unwrap();
            assert_eq!(server.open_handle_count(), 1);
        }
        assert_eq!(server.open_handle_count(), 0);
    }

    #[test]
    fn test_std_io_traits() {
        let (_, registry) = setup();
        let mut channel = OpenOptions::new().read(true).open(&path(&registry, "/file.txt")).unwrap();
        let mut text = String::new();
        channel.seek(SeekFrom::Start(6)).unwrap();
        channel.read_to_string(&mut text).unwrap();
        assert_eq!(text, "world");
        assert_eq!(channel.seek(SeekFrom::End(-5)).unwrap(), 6);
        assert_eq!(channel.seek(SeekFrom::Current(-6)).unwrap(), 0);
        assert!(channel.seek(SeekFrom::Current(-1)).is_err());
    }

    #[test]
    fn test_reading_from_write_only_channel_is_denied() {
        let (_, registry) = setup();
        let channel = OpenOptions::new().write(true).open(&path(&registry, "/file.txt")).unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(channel.read(&mut buf).unwrap_err().kind(), ErrorKind::AccessDenied);
    }
}
