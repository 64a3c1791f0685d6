//! Basic file attributes and the `basic` attribute view.

use std::time::SystemTime;

use serde::Serialize;
use tracing::debug;

use crate::dispatch;
use crate::error::Result;
use crate::path::SmbPath;
use crate::remote::{BasicInformationUpdate, FileAllInformation, FileAttributes};

/// Attribute views a filesystem can expose. Only `basic` exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AttributeViewKind {
    /// The `basic` view: timestamps, attribute bits and size
    Basic,
}

impl AttributeViewKind {
    /// Every view this crate offers.
    pub const SUPPORTED: &'static [AttributeViewKind] = &[AttributeViewKind::Basic];

    /// Name used to request the view, e.g. `basic`.
    pub fn name(&self) -> &'static str {
        match self {
            AttributeViewKind::Basic => "basic",
        }
    }

    /// Looks a view up by name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::SUPPORTED.iter().copied().find(|kind| kind.name() == name)
    }
}

/// Snapshot of a remote object's metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BasicFileAttributes {
    /// Creation timestamp
    pub creation_time: SystemTime,
    /// Last access timestamp
    pub last_access_time: SystemTime,
    /// Last write timestamp
    pub last_modified_time: SystemTime,
    /// Raw attribute bits
    pub attributes: FileAttributes,
    /// End of file in bytes
    pub size: u64,
    /// Remote name of the object.
    pub file_key: String,
}

impl BasicFileAttributes {
    /// True for directories.
    pub fn is_directory(&self) -> bool {
        self.attributes.contains(FileAttributes::DIRECTORY)
    }

    /// True for anything that is not a directory.
    pub fn is_regular_file(&self) -> bool {
        !self.is_directory()
    }

    /// Always false; links are not surfaced.
    pub fn is_symlink(&self) -> bool {
        false
    }

    /// Always false.
    pub fn is_other(&self) -> bool {
        false
    }

    /// True if the hidden bit is set.
    pub fn is_hidden(&self) -> bool {
        self.attributes.contains(FileAttributes::HIDDEN)
    }
}

impl From<FileAllInformation> for BasicFileAttributes {
    fn from(info: FileAllInformation) -> Self {
        Self {
            creation_time: info.basic.creation_time,
            last_access_time: info.basic.last_access_time,
            last_modified_time: info.basic.last_write_time,
            attributes: info.basic.attributes,
            size: info.standard.end_of_file,
            file_key: info.name,
        }
    }
}

/// Fetches the attributes of `path` with one remote query.
pub fn metadata(path: &SmbPath) -> Result<BasicFileAttributes> {
    let info = dispatch::call(path, "file_information", |share, relative| {
        share.file_information(relative)
    })?;
    Ok(info.into())
}

/// The `basic` view bound to one path.
#[derive(Debug, Clone)]
pub struct BasicFileAttributeView {
    path: SmbPath,
}

impl BasicFileAttributeView {
    /// Binds the view to `path`. Makes no remote call.
    pub fn new(path: SmbPath) -> Self {
        Self { path }
    }

    /// Always `basic`.
    pub fn name(&self) -> &'static str {
        AttributeViewKind::Basic.name()
    }

    /// Fetches the current attributes of the bound path.
    pub fn read_attributes(&self) -> Result<BasicFileAttributes> {
        metadata(&self.path)
    }

    /// Updates the given timestamps; `None` leaves a timestamp unchanged.
    ///
    /// The change time follows the modified time. Passing `None` for all
    /// three does not touch the server.
    pub fn set_times(
        &self,
        last_modified: Option<SystemTime>,
        last_access: Option<SystemTime>,
        creation: Option<SystemTime>,
    ) -> Result<()> {
        let update = BasicInformationUpdate {
            creation_time: creation,
            last_access_time: last_access,
            last_write_time: last_modified,
            change_time: last_modified,
            attributes: None,
        };
        if update.is_empty() {
            debug!(path = %self.path, "no timestamps to set");
            return Ok(());
        }
        dispatch::call(&self.path, "set_basic_information", |share, relative| {
            share.set_basic_information(relative, &update)
        })
    }
}

/// Returns the requested view of `path`.
pub fn attribute_view(path: &SmbPath, kind: AttributeViewKind) -> BasicFileAttributeView {
    match kind {
        AttributeViewKind::Basic => BasicFileAttributeView::new(path.clone()),
    }
}
