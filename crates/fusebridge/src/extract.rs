//! Structured result extraction.
//!
//! Handlers answer getattr, statfs, lock and readdir with records (or, for getattr
//! on old revisions, a positional sequence). The functions here pull the named
//! fields off such a value into the native structures.

use nix::libc::{blkcnt_t, off_t};
use num_traits::FromPrimitive;

use crate::marshal::{MarshalError, coerce, coerce_soft};
use crate::native::{
    BLOCK_UNIT, DEFAULT_BLKSIZE, FileStat, LegacyStatFs, NativeFlock, StatVfs,
};
use crate::value::Value;

/// Positional layout of a getattr sequence result.
pub const STAT_SEQUENCE: &[&str] = &[
    "st_mode", "st_ino", "st_dev", "st_nlink", "st_uid", "st_gid", "st_size", "st_atime",
    "st_mtime", "st_ctime",
];

/// Named view over a structured handler result.
pub struct Fields<'a> {
    src: &'a Value,
    order: &'static [&'static str],
}

impl<'a> Fields<'a> {
    /// A view over a record-like value. `order` names the positions of a
    /// sequence result; pass an empty slice when only records are accepted.
    pub fn new(src: &'a Value, order: &'static [&'static str]) -> Result<Self, MarshalError> {
        match src {
            Value::Record(_) | Value::Handle(_) | Value::CacheHints(_) => Ok(Fields { src, order }),
            Value::Seq(_) if !order.is_empty() => Ok(Fields { src, order }),
            other => Err(MarshalError::Shape {
                expected: "record",
                found: other.type_name(),
            }),
        }
    }

    fn lookup(&self, name: &str) -> Option<Value> {
        match self.src {
            Value::Seq(items) => self
                .order
                .iter()
                .position(|f| *f == name)
                .and_then(|i| items.get(i))
                .cloned(),
            other => other.attr(name),
        }
    }

    /// A field the result must carry, with a numeric value that fits `T`.
    pub fn required<T: FromPrimitive>(&self, name: &'static str) -> Result<T, MarshalError> {
        match self.lookup(name) {
            Some(v) => coerce(name, &v),
            None => Err(MarshalError::Missing(name)),
        }
    }

    /// A field that may be absent or `None`.
    pub fn optional<T: FromPrimitive>(&self, name: &'static str) -> Result<Option<T>, MarshalError> {
        coerce_soft(name, self.lookup(name).as_ref())
    }

    /// The string value of a mandatory field.
    pub fn string(&self, name: &'static str) -> Result<String, MarshalError> {
        match self.lookup(name) {
            Some(Value::Str(s)) => Ok(s),
            Some(other) => Err(MarshalError::Shape {
                expected: "string",
                found: other.type_name(),
            }),
            None => Err(MarshalError::Missing(name)),
        }
    }
}

/// Fill a native `stat` from a getattr result.
pub fn stat(v: &Value) -> Result<FileStat, MarshalError> {
    let f = Fields::new(v, STAT_SEQUENCE)?;

    let mut st = FileStat {
        st_mode: f.required("st_mode")?,
        st_ino: f.required("st_ino")?,
        st_dev: f.required("st_dev")?,
        st_nlink: f.required("st_nlink")?,
        st_uid: f.required("st_uid")?,
        st_gid: f.required("st_gid")?,
        st_size: f.required("st_size")?,
        st_atime: f.required("st_atime")?,
        st_mtime: f.required("st_mtime")?,
        st_ctime: f.required("st_ctime")?,
        ..Default::default()
    };

    st.st_rdev = f.optional("st_rdev")?.unwrap_or(0);
    st.st_blksize = f.optional("st_blksize")?.unwrap_or(DEFAULT_BLKSIZE);
    st.st_blocks = match f.optional("st_blocks")? {
        Some(blocks) => blocks,
        None => default_blocks(st.st_size),
    };

    Ok(st)
}

/// Number of 512-byte units needed to hold `size` bytes.
pub fn default_blocks(size: off_t) -> blkcnt_t {
    (size.saturating_add(BLOCK_UNIT - 1) / BLOCK_UNIT) as blkcnt_t
}

/// Fill a native `statvfs` from a statfs result.
pub fn statvfs(v: &Value) -> Result<StatVfs, MarshalError> {
    let f = Fields::new(v, &[])?;

    Ok(StatVfs {
        f_bsize: f.required("f_bsize")?,
        f_frsize: f.required("f_frsize")?,
        f_blocks: f.required("f_blocks")?,
        f_bfree: f.required("f_bfree")?,
        f_bavail: f.required("f_bavail")?,
        f_files: f.required("f_files")?,
        f_ffree: f.required("f_ffree")?,
        f_favail: f.required("f_favail")?,
        f_flag: f.required("f_flag")?,
        f_namemax: f.required("f_namemax")?,
        ..Default::default()
    })
}

/// Fill a legacy `statfs` from a statfs result.
///
/// The name length comes from `f_namemax`, the same field the statvfs shape uses.
pub fn legacy_statfs(v: &Value) -> Result<LegacyStatFs, MarshalError> {
    let f = Fields::new(v, &[])?;

    Ok(LegacyStatFs {
        f_bsize: f.required("f_bsize")?,
        f_blocks: f.required("f_blocks")?,
        f_bfree: f.required("f_bfree")?,
        f_bavail: f.required("f_bavail")?,
        f_files: f.required("f_files")?,
        f_ffree: f.required("f_ffree")?,
        f_namelen: f.required("f_namemax")?,
        ..Default::default()
    })
}

/// Apply a lock result onto the native lock. Every field is optional.
pub fn update_flock(v: &Value, lock: &mut NativeFlock) -> Result<(), MarshalError> {
    let f = Fields::new(v, &[])?;

    // Collect everything first so a bad field leaves the lock untouched
    let l_type = f.optional("l_type")?;
    let l_start = f.optional("l_start")?;
    let l_len = f.optional("l_len")?;
    let l_pid = f.optional("l_pid")?;

    if let Some(t) = l_type {
        lock.l_type = t;
    }
    if let Some(s) = l_start {
        lock.l_start = s;
    }
    if let Some(l) = l_len {
        lock.l_len = l;
    }
    if let Some(p) = l_pid {
        lock.l_pid = p;
    }
    Ok(())
}

/// A directory entry ready for the native filler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    /// Only `st_ino` and `st_mode` are filled
    pub stat: FileStat,
    pub offset: off_t,
}

/// Extract one entry of a readdir result.
pub fn dir_entry(v: &Value) -> Result<Entry, MarshalError> {
    let f = Fields::new(v, &[])?;

    let stat = FileStat {
        st_ino: f.required("ino")?,
        st_mode: f.required("type")?,
        ..Default::default()
    };
    let offset = f.required("offset")?;
    let name = f.string("name")?;

    Ok(Entry { name, stat, offset })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::{DirEntry, Stat, StatVfs as StatVfsBuilder};
    use crate::value::Record;

    fn file_stat(size: i64) -> Stat {
        Stat {
            st_mode: Some(nix::libc::S_IFREG | 0o644),
            st_nlink: Some(1),
            st_size: size,
            ..Default::default()
        }
    }

    #[test]
    fn stat_defaults() {
        let st = stat(&file_stat(1000).into()).unwrap();
        assert_eq!(st.st_blksize, 4096);
        assert_eq!(st.st_blocks, 2);
        assert_eq!(st.st_rdev, 0);

        let st = stat(&file_stat(0).into()).unwrap();
        assert_eq!(st.st_blocks, 0);

        let st = stat(&file_stat(512).into()).unwrap();
        assert_eq!(st.st_blocks, 1);
    }

    #[test]
    fn stat_keeps_explicit_optionals() {
        let mut s = file_stat(1000);
        s.st_blksize = Some(512);
        s.st_blocks = Some(7);
        s.st_rdev = Some(3);

        let st = stat(&s.into()).unwrap();
        assert_eq!((st.st_blksize, st.st_blocks, st.st_rdev), (512, 7, 3));
    }

    #[test]
    fn stat_missing_mandatory_field() {
        let v = Value::from(Record::new().with("st_mode", 0o644));
        assert_eq!(stat(&v), Err(MarshalError::Missing("st_ino")));

        let mut s = file_stat(0);
        s.st_nlink = None;
        assert!(matches!(
            stat(&s.into()),
            Err(MarshalError::NotNumeric { field: "st_nlink", .. })
        ));
    }

    #[test]
    fn stat_from_sequence() {
        let v = Value::Seq(
            [0o40755i128, 2, 0, 3, 0, 0, 4096, 1, 2, 3]
                .into_iter()
                .map(Value::Int)
                .collect(),
        );
        let st = stat(&v).unwrap();
        assert_eq!(st.st_mode, 0o40755);
        assert_eq!(st.st_nlink, 3);
        assert_eq!(st.st_ctime, 3);
        assert_eq!(st.st_blocks, 8);

        let short = Value::Seq(vec![Value::Int(0o40755)]);
        assert_eq!(stat(&short), Err(MarshalError::Missing("st_ino")));
    }

    #[test]
    fn statfs_shapes() {
        let v = Value::from(StatVfsBuilder {
            f_bsize: 4096,
            f_namemax: 255,
            ..Default::default()
        });
        assert_eq!(statvfs(&v).unwrap().f_namemax, 255);
        assert_eq!(legacy_statfs(&v).unwrap().f_namelen, 255);

        let partial = Value::from(Record::new().with("f_bsize", 4096));
        assert_eq!(statvfs(&partial), Err(MarshalError::Missing("f_frsize")));
    }

    #[test]
    fn flock_updates_softly() {
        let mut lock = NativeFlock {
            l_type: 1,
            l_whence: 0,
            l_start: 5,
            l_len: 6,
            l_pid: 7,
        };
        let v = Value::from(Record::new().with("l_len", 100).with("l_pid", Value::None));
        update_flock(&v, &mut lock).unwrap();
        assert_eq!((lock.l_type, lock.l_start, lock.l_len, lock.l_pid), (1, 5, 100, 7));

        let bad = Value::from(Record::new().with("l_start", 1).with("l_len", "x"));
        assert!(update_flock(&bad, &mut lock).is_err());
        assert_eq!(lock.l_start, 5);
    }

    #[test]
    fn dir_entry_requires_string_name() {
        let e = dir_entry(&DirEntry::new("f").ino(4).typ(nix::libc::S_IFREG).offset(2).into()).unwrap();
        assert_eq!(e.name, "f");
        assert_eq!(e.stat.st_ino, 4);
        assert_eq!(e.offset, 2);

        let bad = Value::from(Record::new().with("name", 1).with("ino", 0).with("type", 0).with("offset", 0));
        assert!(dir_entry(&bad).is_err());
        assert!(dir_entry(&Value::from("f")).is_err());
    }
}
