//! Protocol revisions and the capability table.
//!
//! The daemon's operation table grew over several revisions. Which slots exist,
//! whether they carry the per-open-file context and which argument and result
//! shapes they use is fixed per revision and looked up here.

use std::fmt;
use std::str::FromStr;

use enum_primitive::*;
use log::error;

use crate::error::Error;
use crate::utils::Result;

/// Environment variable selecting the protocol revision
pub const API_VERSION_ENV: &str = "FUSEBRIDGE_API_VERSION";

/// Native operation-table revision.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ApiVersion(u32);

impl ApiVersion {
    pub const V21: ApiVersion = ApiVersion(21);
    pub const V22: ApiVersion = ApiVersion(22);
    pub const V23: ApiVersion = ApiVersion(23);
    pub const V25: ApiVersion = ApiVersion(25);
    pub const V26: ApiVersion = ApiVersion(26);
    pub const V28: ApiVersion = ApiVersion(28);

    /// Oldest revision the bridge speaks
    pub const OLDEST: ApiVersion = ApiVersion::V21;
    /// Revision used when none is requested
    pub const CURRENT: ApiVersion = ApiVersion::V28;

    pub fn new(n: u32) -> Result<ApiVersion> {
        if n < Self::OLDEST.0 || n > Self::CURRENT.0 {
            return res!(Error::UnsupportedVersion(n));
        }
        Ok(ApiVersion(n))
    }

    /// The revision named by `FUSEBRIDGE_API_VERSION`, or [`ApiVersion::CURRENT`].
    pub fn from_env() -> Result<ApiVersion> {
        match std::env::var(API_VERSION_ENV) {
            Ok(s) => s.parse(),
            Err(_) => Ok(Self::CURRENT),
        }
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl Default for ApiVersion {
    fn default() -> Self {
        ApiVersion::CURRENT
    }
}

impl FromStr for ApiVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<ApiVersion> {
        let n = s
            .trim()
            .parse::<u32>()
            .map_err(|_| Error::InvalidArgs(format!("invalid API version {s:?}")))?;
        ApiVersion::new(n)
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

enum_from_primitive! {
    #[doc = "Slots of the daemon's operation table"]
    #[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub enum Operation {
        Getattr         = 0,
        Readlink,
        Readdir,
        Mknod,
        Mkdir,
        Unlink,
        Rmdir,
        Symlink,
        Rename,
        Link,
        Chmod,
        Chown,
        Truncate,
        Utime,
        Open,
        Read,
        Write,
        Statfs,
        Flush,
        Release,
        Fsync,
        Setxattr,
        Getxattr,
        Listxattr,
        Removexattr,
        Opendir,
        Releasedir,
        Fsyncdir,
        Init,
        Destroy,
        Access,
        Create,
        Ftruncate,
        Fgetattr,
        Lock,
        Utimens,
        Bmap,
        Ioctl,
        Poll,
    }
}

impl Operation {
    /// Number of slots
    pub const COUNT: usize = Operation::Poll as usize + 1;

    /// Every operation in slot order.
    pub fn all() -> impl Iterator<Item = Operation> {
        (0..Self::COUNT).filter_map(Operation::from_usize)
    }

    pub fn capability(self) -> &'static Capability {
        &CAPABILITIES[self as usize]
    }

    /// Handler name of the operation.
    pub fn name(self) -> &'static str {
        self.capability().name
    }
}

impl FromStr for Operation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Operation> {
        let name = match s {
            "fsinit" => "init",
            "fsdestroy" => "destroy",
            "getdir" => "readdir",
            other => other,
        };

        Operation::all()
            .find(|op| op.name() == name)
            .ok_or_else(|| Error::UnknownOperation(s.to_owned()))
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Something a filesystem can require of the protocol revision.
///
/// Parsed from the same names the handlers use: `stateful_files`,
/// `stateful_dirs`, `stateful_io`, `keep_cache`, `direct_io`, `has_<op>` and
/// `*` for everything.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Feature {
    /// Per-descriptor sessions returned from open
    StatefulFiles,
    /// Per-descriptor sessions returned from opendir
    StatefulDirs,
    /// Both of the above
    StatefulIo,
    KeepCache,
    DirectIo,
    /// The slot for an operation
    Has(Operation),
    All,
}

impl Feature {
    /// Oldest revision providing the feature.
    pub fn needs(self) -> ApiVersion {
        match self {
            Feature::StatefulFiles => ApiVersion::V22,
            Feature::StatefulDirs | Feature::StatefulIo => ApiVersion::V23,
            Feature::KeepCache | Feature::DirectIo => ApiVersion::V23,
            Feature::Has(op) => op.capability().since,
            Feature::All => ApiVersion::CURRENT,
        }
    }
}

impl FromStr for Feature {
    type Err = Error;

    fn from_str(s: &str) -> Result<Feature> {
        Ok(match s {
            "stateful_files" => Feature::StatefulFiles,
            "stateful_dirs" => Feature::StatefulDirs,
            "stateful_io" => Feature::StatefulIo,
            "keep_cache" | "stateful_files_keep_cache" => Feature::KeepCache,
            "direct_io" | "stateful_files_direct_io" => Feature::DirectIo,
            "*" => Feature::All,
            other => match other.strip_prefix("has_") {
                Some(op) => Feature::Has(op.parse()?),
                None => return res!(Error::InvalidArgs(format!("unknown feature {other:?}"))),
            },
        })
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Feature::StatefulFiles => f.write_str("stateful_files"),
            Feature::StatefulDirs => f.write_str("stateful_dirs"),
            Feature::StatefulIo => f.write_str("stateful_io"),
            Feature::KeepCache => f.write_str("keep_cache"),
            Feature::DirectIo => f.write_str("direct_io"),
            Feature::Has(op) => write!(f, "has_{op}"),
            Feature::All => f.write_str("*"),
        }
    }
}

impl ApiVersion {
    /// Oldest revision providing every feature in `features`.
    pub fn required_for(features: &[Feature]) -> ApiVersion {
        features
            .iter()
            .map(|f| f.needs())
            .fold(ApiVersion::OLDEST, Ord::max)
    }

    /// Fail with [`Error::UnsupportedVersion`] unless this revision provides
    /// every feature in `features`.
    pub fn check(self, features: &[Feature]) -> Result<()> {
        match features.iter().find(|f| self < f.needs()) {
            Some(f) => {
                error!(
                    "API version {} is required for feature `{f}` but only {self} is available",
                    f.needs()
                );
                res!(Error::UnsupportedVersion(self.0))
            }
            None => Ok(()),
        }
    }
}

/// Static properties of one slot.
#[derive(Debug)]
pub struct Capability {
    pub op: Operation,
    pub name: &'static str,
    /// First revision that has the slot
    pub since: ApiVersion,
    /// First revision that hands the per-open-file context to the slot
    pub file_info: Option<ApiVersion>,
}

macro_rules! cap {
    ($op:ident, $name:expr, $since:ident) => {
        Capability {
            op: Operation::$op,
            name: $name,
            since: ApiVersion::$since,
            file_info: None,
        }
    };
    ($op:ident, $name:expr, $since:ident, fi = $fi:ident) => {
        Capability {
            op: Operation::$op,
            name: $name,
            since: ApiVersion::$since,
            file_info: Some(ApiVersion::$fi),
        }
    };
}

/// The capability table, in slot order.
pub static CAPABILITIES: [Capability; Operation::COUNT] = [
    cap!(Getattr, "getattr", V21),
    cap!(Readlink, "readlink", V21),
    cap!(Readdir, "readdir", V21, fi = V23),
    cap!(Mknod, "mknod", V21),
    cap!(Mkdir, "mkdir", V21),
    cap!(Unlink, "unlink", V21),
    cap!(Rmdir, "rmdir", V21),
    cap!(Symlink, "symlink", V21),
    cap!(Rename, "rename", V21),
    cap!(Link, "link", V21),
    cap!(Chmod, "chmod", V21),
    cap!(Chown, "chown", V21),
    cap!(Truncate, "truncate", V21),
    cap!(Utime, "utime", V21),
    cap!(Open, "open", V21),
    cap!(Read, "read", V21, fi = V22),
    cap!(Write, "write", V21, fi = V22),
    cap!(Statfs, "statfs", V21),
    cap!(Flush, "flush", V21, fi = V22),
    cap!(Release, "release", V21, fi = V22),
    cap!(Fsync, "fsync", V21, fi = V22),
    cap!(Setxattr, "setxattr", V21),
    cap!(Getxattr, "getxattr", V21),
    cap!(Listxattr, "listxattr", V21),
    cap!(Removexattr, "removexattr", V21),
    cap!(Opendir, "opendir", V23),
    cap!(Releasedir, "releasedir", V23, fi = V23),
    cap!(Fsyncdir, "fsyncdir", V23, fi = V23),
    cap!(Init, "init", V23),
    cap!(Destroy, "destroy", V23),
    cap!(Access, "access", V25),
    cap!(Create, "create", V25),
    cap!(Ftruncate, "ftruncate", V25, fi = V25),
    cap!(Fgetattr, "fgetattr", V25, fi = V25),
    cap!(Lock, "lock", V26, fi = V26),
    cap!(Utimens, "utimens", V26),
    cap!(Bmap, "bmap", V26),
    cap!(Ioctl, "ioctl", V28, fi = V28),
    cap!(Poll, "poll", V28, fi = V28),
];

/// Form of the directory filler.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DirFill {
    /// `(name, type nibble, ino)`, no offsets
    Legacy,
    /// `(name, stat, offset)`
    Stat,
}

/// Form of the statfs result.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StatfsShape {
    Legacy,
    Vfs,
}

/// The capability table resolved for one revision.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Profile {
    version: ApiVersion,
}

impl Profile {
    pub fn new(version: ApiVersion) -> Profile {
        Profile { version }
    }

    pub fn version(&self) -> ApiVersion {
        self.version
    }

    /// Whether the slot exists at this revision.
    pub fn supports(&self, op: Operation) -> bool {
        self.version >= op.capability().since
    }

    /// Whether the slot carries the per-open-file context at this revision.
    pub fn passes_file(&self, op: Operation) -> bool {
        self.supports(op) && op.capability().file_info.is_some_and(|v| self.version >= v)
    }

    /// Whether a successful call of `op` may attach a session to the descriptor.
    pub fn attaches_session(&self, op: Operation) -> bool {
        match op {
            Operation::Open => self.version >= ApiVersion::V22,
            Operation::Opendir | Operation::Create => self.supports(op),
            _ => false,
        }
    }

    /// Whether keep_cache and direct_io reach the native file-info.
    pub fn propagates_cache_hints(&self) -> bool {
        self.version >= ApiVersion::V23
    }

    pub fn dir_fill(&self) -> DirFill {
        if self.version >= ApiVersion::V23 {
            DirFill::Stat
        } else {
            DirFill::Legacy
        }
    }

    pub fn statfs_shape(&self) -> StatfsShape {
        if self.version >= ApiVersion::V25 {
            StatfsShape::Vfs
        } else {
            StatfsShape::Legacy
        }
    }

    /// Read and write sizes as handed to the handler.
    ///
    /// Before revision 25 the daemon passed sizes as a native `int`.
    pub fn transfer_size(&self, len: usize) -> usize {
        if self.version >= ApiVersion::V25 {
            len
        } else {
            len.min(i32::MAX as usize)
        }
    }
}
