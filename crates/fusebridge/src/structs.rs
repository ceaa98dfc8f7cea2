//! Typed builders for the structured values handlers exchange with the bridge.
//!
//! Each builder converts into a [`Value::Record`] carrying the field names the
//! extractor looks for, so handlers never have to spell them out by hand.

use std::fs;
use std::os::unix::fs::MetadataExt;

use crate::marshal::{MarshalError, coerce, coerce_soft};
use crate::native::{NativeFlock, NativeTimespec};
use crate::value::{Record, Value};

/// File attributes as returned from getattr and fgetattr.
///
/// `st_mode` and `st_nlink` start out undefined: a getattr result that leaves them
/// unset fails the call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Stat {
    pub st_mode: Option<u32>,
    pub st_ino: u64,
    pub st_dev: u64,
    pub st_nlink: Option<u64>,
    pub st_uid: u32,
    pub st_gid: u32,
    pub st_size: i64,
    pub st_atime: i64,
    pub st_mtime: i64,
    pub st_ctime: i64,
    pub st_rdev: Option<u64>,
    pub st_blksize: Option<i64>,
    pub st_blocks: Option<i64>,
}

impl From<&fs::Metadata> for Stat {
    fn from(m: &fs::Metadata) -> Stat {
        Stat {
            st_mode: Some(m.mode()),
            st_ino: m.ino(),
            st_dev: m.dev(),
            st_nlink: Some(m.nlink()),
            st_uid: m.uid(),
            st_gid: m.gid(),
            st_size: m.size() as i64,
            st_atime: m.atime(),
            st_mtime: m.mtime(),
            st_ctime: m.ctime(),
            st_rdev: Some(m.rdev()),
            st_blksize: Some(m.blksize() as i64),
            st_blocks: Some(m.blocks() as i64),
        }
    }
}

impl From<Stat> for Value {
    fn from(s: Stat) -> Value {
        Record::new()
            .with("st_mode", s.st_mode)
            .with("st_ino", s.st_ino)
            .with("st_dev", s.st_dev)
            .with("st_nlink", s.st_nlink)
            .with("st_uid", s.st_uid)
            .with("st_gid", s.st_gid)
            .with("st_size", s.st_size)
            .with("st_atime", s.st_atime)
            .with("st_mtime", s.st_mtime)
            .with("st_ctime", s.st_ctime)
            .with("st_rdev", s.st_rdev)
            .with("st_blksize", s.st_blksize)
            .with("st_blocks", s.st_blocks)
            .into()
    }
}

/// Filesystem statistics as returned from statfs. Every field defaults to 0.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct StatVfs {
    pub f_bsize: u64,
    pub f_frsize: u64,
    pub f_blocks: u64,
    pub f_bfree: u64,
    pub f_bavail: u64,
    pub f_files: u64,
    pub f_ffree: u64,
    pub f_favail: u64,
    pub f_flag: u64,
    pub f_namemax: u64,
}

impl From<StatVfs> for Value {
    fn from(s: StatVfs) -> Value {
        Record::new()
            .with("f_bsize", s.f_bsize)
            .with("f_frsize", s.f_frsize)
            .with("f_blocks", s.f_blocks)
            .with("f_bfree", s.f_bfree)
            .with("f_bavail", s.f_bavail)
            .with("f_files", s.f_files)
            .with("f_ffree", s.f_ffree)
            .with("f_favail", s.f_favail)
            .with("f_flag", s.f_flag)
            .with("f_namemax", s.f_namemax)
            .into()
    }
}

/// One entry of a readdir listing.
///
/// `offset` is the bookmark the daemon hands back to resume the listing; leave it
/// at 0 for stateless directories.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub offset: i64,
    /// File type bits (`S_IFDIR`, `S_IFREG`, ...)
    pub typ: u32,
    pub ino: u64,
}

impl DirEntry {
    pub fn new(name: impl Into<String>) -> DirEntry {
        DirEntry {
            name: name.into(),
            offset: 0,
            typ: 0,
            ino: 0,
        }
    }

    pub fn offset(mut self, offset: i64) -> DirEntry {
        self.offset = offset;
        self
    }

    pub fn typ(mut self, typ: u32) -> DirEntry {
        self.typ = typ;
        self
    }

    pub fn ino(mut self, ino: u64) -> DirEntry {
        self.ino = ino;
        self
    }
}

impl From<DirEntry> for Value {
    fn from(e: DirEntry) -> Value {
        Record::new()
            .with("name", e.name)
            .with("offset", e.offset)
            .with("type", e.typ)
            .with("ino", e.ino)
            .into()
    }
}

/// A byte-range lock description (cf. fcntl(2)). Unset fields are left alone
/// when the bridge writes a lock result back.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Flock {
    pub l_type: Option<i16>,
    pub l_start: Option<i64>,
    pub l_len: Option<i64>,
    pub l_pid: Option<i32>,
}

impl From<&NativeFlock> for Flock {
    fn from(l: &NativeFlock) -> Flock {
        Flock {
            l_type: Some(l.l_type),
            l_start: Some(l.l_start),
            l_len: Some(l.l_len),
            l_pid: Some(l.l_pid),
        }
    }
}

impl From<Flock> for Value {
    fn from(l: Flock) -> Value {
        Record::new()
            .with("l_type", l.l_type)
            .with("l_start", l.l_start)
            .with("l_len", l.l_len)
            .with("l_pid", l.l_pid)
            .into()
    }
}

impl TryFrom<&Value> for Flock {
    type Error = MarshalError;

    fn try_from(v: &Value) -> Result<Flock, MarshalError> {
        let field = |name| v.attr(name);
        Ok(Flock {
            l_type: coerce_soft("l_type", field("l_type").as_ref())?,
            l_start: coerce_soft("l_start", field("l_start").as_ref())?,
            l_len: coerce_soft("l_len", field("l_len").as_ref())?,
            l_pid: coerce_soft("l_pid", field("l_pid").as_ref())?,
        })
    }
}

/// Seconds and nanoseconds, as handed to utimens.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Timespec {
    pub tv_sec: i64,
    pub tv_nsec: i64,
}

impl From<NativeTimespec> for Timespec {
    fn from(t: NativeTimespec) -> Timespec {
        Timespec {
            tv_sec: t.tv_sec as i64,
            tv_nsec: t.tv_nsec as i64,
        }
    }
}

impl From<Timespec> for Value {
    fn from(t: Timespec) -> Value {
        Record::new()
            .with("tv_sec", t.tv_sec)
            .with("tv_nsec", t.tv_nsec)
            .into()
    }
}

impl TryFrom<&Value> for Timespec {
    type Error = MarshalError;

    fn try_from(v: &Value) -> Result<Timespec, MarshalError> {
        let field = |name: &'static str| v.attr(name).ok_or(MarshalError::Missing(name));
        Ok(Timespec {
            tv_sec: coerce("tv_sec", &field("tv_sec")?)?,
            tv_nsec: coerce("tv_nsec", &field("tv_nsec")?)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stat_leaves_mandatory_fields_undefined() {
        let v = Value::from(Stat::default());
        assert_eq!(v.attr("st_mode"), Some(Value::None));
        assert_eq!(v.attr("st_nlink"), Some(Value::None));
        assert_eq!(v.attr("st_size"), Some(Value::Int(0)));
        assert_eq!(v.attr("st_blksize"), Some(Value::None));
    }

    #[test]
    fn dir_entry_fields() {
        let v = Value::from(DirEntry::new("a").offset(3).typ(nix::libc::S_IFDIR).ino(9));
        assert_eq!(v.attr("name"), Some(Value::from("a")));
        assert_eq!(v.attr("offset"), Some(Value::Int(3)));
        assert_eq!(v.attr("type"), Some(Value::Int(nix::libc::S_IFDIR as i128)));
        assert_eq!(v.attr("ino"), Some(Value::Int(9)));
    }

    #[test]
    fn flock_survives_record_form() {
        let native = NativeFlock {
            l_type: nix::libc::F_WRLCK as i16,
            l_whence: 0,
            l_start: 10,
            l_len: 20,
            l_pid: 42,
        };
        let v = Value::from(Flock::from(&native));
        let back = Flock::try_from(&v).unwrap();
        assert_eq!(back.l_start, Some(10));
        assert_eq!(back.l_pid, Some(42));
    }

    #[test]
    fn timespec_requires_both_fields() {
        let v = Value::from(Record::new().with("tv_sec", 1));
        assert_eq!(
            Timespec::try_from(&v),
            Err(MarshalError::Missing("tv_nsec"))
        );
    }
}
