use {
    fusebridge::{DirEntry, Stat, Timespec},
    nix::libc::{O_ACCMODE, O_APPEND, O_CREAT, O_EXCL, O_TRUNC, UTIME_NOW, UTIME_OMIT},
    std::{
        fs::{self, Metadata},
        os::unix::prelude::*,
        path::{Component, Path, PathBuf},
    },
};

// Clients may hand O_DIRECT or O_NOATIME through open; both fail on plenty of
// backing filesystems, so only the flags below reach the real open.
pub const UNIX_FLAGS: i32 = O_ACCMODE | O_APPEND | O_CREAT | O_EXCL | O_TRUNC;

/// Map a mount-relative path below `root`. Parent components are dropped so a
/// request can never leave the mirrored tree.
pub fn realpath(root: &Path, path: &str) -> PathBuf {
    let mut real = root.to_path_buf();
    for c in Path::new(path).components() {
        if let Component::Normal(name) = c {
            real.push(name);
        }
    }
    real
}

pub fn stat(attr: &Metadata) -> Stat {
    Stat::from(attr)
}

pub fn dirent(name: &str, attr: &Metadata, offset: i64) -> DirEntry {
    DirEntry::new(name)
        .offset(offset)
        .typ(attr.mode() & nix::libc::S_IFMT)
        .ino(attr.ino())
}

pub fn get_dirent(entry: &fs::DirEntry, offset: i64) -> fusebridge::Result<DirEntry> {
    Ok(dirent(
        &entry.file_name().to_string_lossy(),
        &entry.metadata()?,
        offset,
    ))
}

/// Resolve a utimens timestamp, honoring `UTIME_NOW` and `UTIME_OMIT`.
pub fn file_time(ts: &Timespec, current: filetime::FileTime) -> filetime::FileTime {
    match ts.tv_nsec {
        n if n == UTIME_NOW => filetime::FileTime::now(),
        n if n == UTIME_OMIT => current,
        n => filetime::FileTime::from_unix_time(ts.tv_sec, n as u32),
    }
}
