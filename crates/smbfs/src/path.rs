//! Hierarchical path algebra.
//!
//! A path is an ordered list of decoded components plus an absolute flag
//! and a trailing-directory flag. Nothing in here talks to the network;
//! every failure is an `InvalidArgument`.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use crate::codec;
use crate::error::{Result, SmbFsError};
use crate::filesystem::{FileSystemInner, SmbFileSystem};
use crate::identity::FsIdentity;

/// Component separator.
pub const SEPARATOR: char = '/';

const CURRENT: &str = ".";
const PARENT: &str = "..";

/// Splits a display-form path into `(components, absolute, directory)`.
///
/// Empty segments from repeated separators are dropped.
pub fn split_path(raw: &str) -> (Vec<String>, bool, bool) {
    let absolute = raw.starts_with(SEPARATOR);
    let directory = raw.ends_with(SEPARATOR);
    let components = raw
        .split(SEPARATOR)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect();
    (components, absolute, directory)
}

/// Inverse of [`split_path`].
pub fn render_path(components: &[String], absolute: bool, directory: bool) -> String {
    let mut out = String::new();
    if absolute {
        out.push(SEPARATOR);
    }
    out.push_str(&components.join("/"));
    if directory && !components.is_empty() {
        out.push(SEPARATOR);
    }
    out
}

/// Drops `.` and cancels `..` against the preceding real component.
///
/// An absolute path never climbs above the root; a relative path keeps
/// the `..` components it cannot cancel.
pub fn normalize_components(components: &[String], absolute: bool) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(components.len());
    for component in components {
        match component.as_str() {
            CURRENT => {}
            PARENT => match out.last() {
                Some(last) if last != PARENT => {
                    out.pop();
                }
                _ if absolute => {}
                _ => out.push(PARENT.to_string()),
            },
            _ => out.push(component.clone()),
        }
    }
    out
}

/// A path on one remote filesystem.
///
/// Holds a non-owning reference to its filesystem; operations that need
/// the filesystem fail with `Closed` once it is gone.
#[derive(Clone)]
pub struct SmbPath {
    identity: Arc<FsIdentity>,
    fs: Weak<FileSystemInner>,
    components: Vec<String>,
    absolute: bool,
    directory: bool,
}

impl SmbPath {
    pub(crate) fn new(
        identity: Arc<FsIdentity>,
        fs: Weak<FileSystemInner>,
        components: Vec<String>,
        absolute: bool,
        directory: bool,
    ) -> Self {
        // The root is always a directory; the empty path never is.
        let directory = if components.is_empty() {
            absolute
        } else {
            directory
        };
        Self {
            identity,
            fs,
            components,
            absolute,
            directory,
        }
    }

    pub(crate) fn parse_in(identity: Arc<FsIdentity>, fs: Weak<FileSystemInner>, raw: &str) -> Self {
        let (components, absolute, directory) = split_path(raw);
        Self::new(identity, fs, components, absolute, directory)
    }

    /// Parses a percent-encoded (wire form) path; each component is decoded.
    pub(crate) fn parse_encoded_in(
        identity: Arc<FsIdentity>,
        fs: Weak<FileSystemInner>,
        encoded: &str,
    ) -> Result<Self> {
        let absolute = encoded.starts_with(SEPARATOR);
        let directory = encoded.ends_with(SEPARATOR);
        let components = encoded
            .split(SEPARATOR)
            .filter(|c| !c.is_empty())
            .map(codec::decode_uri_component)
            .collect::<Result<Vec<_>>>()?;
        if components.iter().any(|c| c.contains(SEPARATOR)) {
            return Err(SmbFsError::invalid(format!(
                "'{}' encodes a separator inside a component",
                encoded
            )));
        }
        Ok(Self::new(identity, fs, components, absolute, directory))
    }

    fn with_parts(&self, components: Vec<String>, absolute: bool, directory: bool) -> Self {
        Self::new(
            self.identity.clone(),
            self.fs.clone(),
            components,
            absolute,
            directory,
        )
    }

    /// Parses `raw` as a path on the same filesystem as `self`.
    pub fn sibling_parse(&self, raw: &str) -> Self {
        Self::parse_in(self.identity.clone(), self.fs.clone(), raw)
    }

    /// The owning filesystem; `Closed` once it has been dropped.
    pub fn file_system(&self) -> Result<SmbFileSystem> {
        self.fs
            .upgrade()
            .map(SmbFileSystem::from_inner)
            .ok_or_else(|| SmbFsError::closed(format!("filesystem {}", self.identity)))
    }

    /// Identity of the owning filesystem.
    pub fn identity(&self) -> &FsIdentity {
        &self.identity
    }

    /// True if the path starts at the root.
    pub fn is_absolute(&self) -> bool {
        self.absolute
    }

    /// True if the path was written with a trailing separator.
    pub fn is_directory(&self) -> bool {
        self.directory
    }

    /// Decoded components, root first.
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Number of components; 0 for the root.
    pub fn name_count(&self) -> usize {
        self.components.len()
    }

    /// The root, if this path is absolute.
    pub fn root(&self) -> Option<SmbPath> {
        self.absolute.then(|| self.with_parts(Vec::new(), true, true))
    }

    /// Last component as a relative path.
    pub fn file_name(&self) -> Option<SmbPath> {
        self.components
            .last()
            .map(|last| self.with_parts(vec![last.clone()], false, false))
    }

    /// Everything but the last component. The root is the parent of a
    /// single-component absolute path; a single relative name has none.
    pub fn parent(&self) -> Option<SmbPath> {
        match self.components.len() {
            0 => None,
            1 if !self.absolute => None,
            n => Some(self.with_parts(self.components[..n - 1].to_vec(), self.absolute, false)),
        }
    }

    /// Component `index` as a relative path.
    pub fn name(&self, index: usize) -> Result<SmbPath> {
        let component = self.components.get(index).ok_or_else(|| {
            SmbFsError::invalid(format!(
                "index {} is out of bounds for {} components",
                index,
                self.components.len()
            ))
        })?;
        let last = index + 1 == self.components.len();
        Ok(self.with_parts(vec![component.clone()], false, last && self.directory))
    }

    /// Iterates over the components as single-name relative paths.
    pub fn names(&self) -> impl Iterator<Item = SmbPath> + '_ {
        let count = self.components.len();
        self.components.iter().enumerate().map(move |(i, c)| {
            self.with_parts(vec![c.clone()], false, i + 1 == count && self.directory)
        })
    }

    /// Components `begin..end` as a relative path.
    pub fn subpath(&self, begin: usize, end: usize) -> Result<SmbPath> {
        if end > self.components.len() {
            return Err(SmbFsError::invalid(format!(
                "end index {} is out of bounds for {} components",
                end,
                self.components.len()
            )));
        }
        if begin >= end {
            return Err(SmbFsError::invalid(format!(
                "begin index {} must be smaller than end index {}",
                begin, end
            )));
        }
        let last = end == self.components.len();
        Ok(self.with_parts(
            self.components[begin..end].to_vec(),
            false,
            last && self.directory,
        ))
    }

    /// Component-wise prefix test on the same filesystem.
    pub fn starts_with(&self, other: &SmbPath) -> bool {
        self.identity == other.identity
            && self.absolute == other.absolute
            && self.components.starts_with(&other.components)
    }

    /// Component-wise suffix test on the same filesystem.
    pub fn ends_with(&self, other: &SmbPath) -> bool {
        if self.identity != other.identity {
            return false;
        }
        if other.absolute {
            return self.absolute && self.components == other.components;
        }
        if other.components.is_empty() {
            return self.components.is_empty();
        }
        self.components.ends_with(&other.components)
    }

    /// Removes `.` and cancels `..`; see [`normalize_components`].
    pub fn normalize(&self) -> SmbPath {
        let components = normalize_components(&self.components, self.absolute);
        self.with_parts(components, self.absolute, self.directory)
    }

    /// Appends `other` unless it is absolute. The result takes the
    /// directory flag of `other`.
    pub fn resolve(&self, other: &SmbPath) -> Result<SmbPath> {
        self.check_same_filesystem(other)?;
        Ok(self.resolve_unchecked(other))
    }

    /// Resolves a display-form string against this path.
    pub fn join(&self, other: &str) -> SmbPath {
        self.resolve_unchecked(&self.sibling_parse(other))
    }

    fn resolve_unchecked(&self, other: &SmbPath) -> SmbPath {
        if other.absolute {
            return other.clone();
        }
        let mut components = self.components.clone();
        components.extend(other.components.iter().cloned());
        self.with_parts(components, self.absolute, other.directory)
    }

    /// Appends a single, already decoded name.
    pub(crate) fn child(&self, name: &str) -> SmbPath {
        let mut components = self.components.clone();
        components.push(name.to_string());
        self.with_parts(components, self.absolute, false)
    }

    /// Builds the relative path that leads from `self` to `other`.
    pub fn relativize(&self, other: &SmbPath) -> Result<SmbPath> {
        self.check_same_filesystem(other)?;
        let common = self
            .components
            .iter()
            .zip(&other.components)
            .take_while(|(a, b)| a == b)
            .count();
        let mut components: Vec<String> = std::iter::repeat(PARENT.to_string())
            .take(self.components.len() - common)
            .collect();
        components.extend(other.components[common..].iter().cloned());
        Ok(self.with_parts(components, false, other.directory))
    }

    /// The same components anchored at the root.
    pub fn to_absolute_path(&self) -> SmbPath {
        if self.absolute {
            return self.clone();
        }
        self.with_parts(self.components.clone(), true, self.directory)
    }

    /// `smb://host/share/<encoded absolute path>`
    pub fn to_uri(&self) -> String {
        let absolute = self.to_absolute_path();
        format!(
            "{}{}",
            self.identity,
            codec::encode_path(&absolute.to_string())
        )
    }

    /// Path handed to the remote share: components joined without a
    /// leading separator.
    pub(crate) fn share_relative(&self) -> String {
        self.components.join("/")
    }

    /// Ordering by rendered path; fails across filesystems.
    pub fn try_compare(&self, other: &SmbPath) -> Result<Ordering> {
        self.check_same_filesystem(other)?;
        Ok(self.to_string().cmp(&other.to_string()))
    }

    fn check_same_filesystem(&self, other: &SmbPath) -> Result<()> {
        if self.identity != other.identity {
            return Err(SmbFsError::invalid(format!(
                "path '{}' is on {} but must be on {}",
                other, other.identity, self.identity
            )));
        }
        Ok(())
    }
}

impl fmt::Display for SmbPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&render_path(&self.components, self.absolute, self.directory))
    }
}

impl fmt::Debug for SmbPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SmbPath({}, {:?})", self.identity, self.to_string())
    }
}

impl PartialEq for SmbPath {
    fn eq(&self, other: &Self) -> bool {
        self.identity == other.identity
            && self.absolute == other.absolute
            && self.directory == other.directory
            && self.components == other.components
    }
}

impl Eq for SmbPath {}

impl Hash for SmbPath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity.hash(state);
        self.to_string().hash(state);
    }
}

impl PartialOrd for SmbPath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SmbPath {
    fn cmp(&self, other: &Self) -> Ordering {
        self.identity
            .cmp(&other.identity)
            .then_with(|| self.to_string().cmp(&other.to_string()))
    }
}
