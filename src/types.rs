//! Public data types shared by the store, the harvester and the resolver.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use md5::Md5;
use sha1::{Digest, Sha1};

use crate::WcError;

/// A Subversion property list (`name -> raw bytes`).
///
/// Property values can be binary; callers should treat the value as opaque
/// bytes unless they know it is UTF-8.
pub type PropertyList = BTreeMap<String, Vec<u8>>;

/// Property marking a node as special (a symlink on disk).
pub const PROP_SPECIAL: &str = "svn:special";

/// The kind of a versioned node.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
pub enum NodeKind {
    /// No node exists at the requested path.
    None,
    /// A file node.
    File,
    /// A directory node.
    Dir,
    /// A symbolic link.
    Symlink,
    /// An unknown kind (usually a forward-compatibility fallback).
    Unknown,
}

impl NodeKind {
    /// Returns a stable string representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::File => "file",
            Self::Dir => "dir",
            Self::Symlink => "symlink",
            Self::Unknown => "unknown",
        }
    }

    /// Parses the string form produced by [`NodeKind::as_str`].
    pub fn from_word(word: &str) -> Option<Self> {
        Some(match word {
            "none" => Self::None,
            "file" => Self::File,
            "dir" => Self::Dir,
            "symlink" => Self::Symlink,
            "unknown" => Self::Unknown,
            _ => return None,
        })
    }

    /// Returns `true` for files and symlinks.
    pub fn is_file_like(self) -> bool {
        matches!(self, Self::File | Self::Symlink)
    }
}

impl Display for NodeKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Subversion depth value.
///
/// Variants are ordered from shallowest to deepest so depths can be compared.
#[derive(serde::Serialize, serde::Deserialize)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Depth {
    /// Depth not recorded.
    Unknown,
    /// The node is excluded from the working copy.
    Exclude,
    /// The target itself only.
    Empty,
    /// The target and its file children.
    Files,
    /// The target and all immediate children.
    Immediates,
    /// Fully recursive.
    Infinity,
}

impl Depth {
    /// Returns the word used for this depth in user-facing output.
    pub fn as_word(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Exclude => "exclude",
            Self::Empty => "empty",
            Self::Files => "files",
            Self::Immediates => "immediates",
            Self::Infinity => "infinity",
        }
    }

    /// Parses the word produced by [`Depth::as_word`].
    pub fn from_word(word: &str) -> Option<Self> {
        Some(match word {
            "unknown" => Self::Unknown,
            "exclude" => Self::Exclude,
            "empty" => Self::Empty,
            "files" => Self::Files,
            "immediates" => Self::Immediates,
            "infinity" => Self::Infinity,
            _ => return None,
        })
    }

    /// Depth to use one level below a node walked at `self`.
    pub fn below(self) -> Self {
        match self {
            Self::Files | Self::Immediates => Self::Empty,
            other => other,
        }
    }
}

/// Presence of a single node row in one op-depth layer.
#[derive(serde::Serialize, serde::Deserialize)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Presence {
    /// The node exists.
    Normal,
    /// The node is known not to exist at this layer's revision.
    NotPresent,
    /// The node was excluded by the user.
    Excluded,
    /// The server denied access to the node.
    Absent,
    /// The node is being fetched and is not complete yet.
    Incomplete,
    /// The node shadows a lower layer and marks it deleted.
    BaseDeleted,
}

impl Presence {
    /// Returns the word stored in the working-copy database.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::NotPresent => "not-present",
            Self::Excluded => "excluded",
            Self::Absent => "server-excluded",
            Self::Incomplete => "incomplete",
            Self::BaseDeleted => "base-deleted",
        }
    }

    /// Parses the word produced by [`Presence::as_str`].
    pub fn from_word(word: &str) -> Option<Self> {
        Some(match word {
            "normal" => Self::Normal,
            "not-present" => Self::NotPresent,
            "excluded" => Self::Excluded,
            "server-excluded" => Self::Absent,
            "incomplete" => Self::Incomplete,
            "base-deleted" => Self::BaseDeleted,
            _ => return None,
        })
    }

    /// Returns `true` when this row describes a node that exists.
    pub fn is_real(self) -> bool {
        matches!(self, Self::Normal | Self::Incomplete)
    }
}

/// Status of the effective node at a path.
#[derive(serde::Serialize, serde::Deserialize)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NodeStatus {
    /// Unmodified versioned node.
    Normal,
    /// Added, copied or moved here.
    Added,
    /// Deleted or moved away.
    Deleted,
    /// Excluded by the user.
    Excluded,
    /// Not readable on the server.
    Absent,
    /// Known not to exist in the repository at the base revision.
    NotPresent,
    /// Incompletely fetched.
    Incomplete,
}

/// Algorithm used by a [`Checksum`].
#[derive(serde::Serialize, serde::Deserialize)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ChecksumKind {
    /// SHA-1 (the pristine store key).
    Sha1,
    /// MD5 (legacy, as sent on the wire).
    Md5,
}

/// A content checksum, tagged with its algorithm.
///
/// The string form is `$sha1$<hex>` or `$md5 $<hex>`.
#[derive(serde::Serialize, serde::Deserialize)]
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Checksum {
    /// Digest algorithm.
    pub kind: ChecksumKind,
    /// Lowercase hex digest.
    pub digest: String,
}

impl Checksum {
    /// Computes the SHA-1 checksum of `contents`.
    pub fn sha1(contents: &[u8]) -> Self {
        Self {
            kind: ChecksumKind::Sha1,
            digest: hex::encode(Sha1::digest(contents)),
        }
    }

    /// Computes the MD5 checksum of `contents`.
    pub fn md5(contents: &[u8]) -> Self {
        Self {
            kind: ChecksumKind::Md5,
            digest: hex::encode(Md5::digest(contents)),
        }
    }

    /// Parses the tagged string form.
    pub fn parse(input: &str) -> Result<Self, WcError> {
        let (kind, digest, len) = if let Some(digest) = input.strip_prefix("$sha1$") {
            (ChecksumKind::Sha1, digest, 40)
        } else if let Some(digest) = input.strip_prefix("$md5 $") {
            (ChecksumKind::Md5, digest, 32)
        } else {
            return Err(WcError::Corrupt(format!("unknown checksum form '{input}'")));
        };
        if digest.len() != len || hex::decode(digest).is_err() {
            return Err(WcError::Corrupt(format!("malformed checksum '{input}'")));
        }
        Ok(Self {
            kind,
            digest: digest.to_ascii_lowercase(),
        })
    }
}

impl Display for Checksum {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            ChecksumKind::Sha1 => write!(f, "$sha1${}", self.digest),
            ChecksumKind::Md5 => write!(f, "$md5 ${}", self.digest),
        }
    }
}
