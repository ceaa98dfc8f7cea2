//! Native data types of the daemon's operation table.
//!
//! Field names and types follow the C structures the daemon hands to every slot.
//! Widths and signedness come from the platform's `libc` aliases so the checked
//! coercions in [`crate::marshal`] reject exactly what the native ABI cannot hold.

use bitflags::bitflags;
use nix::libc::{
    blkcnt_t, blksize_t, c_int, c_long, c_short, c_uint, c_ulong, dev_t, fsblkcnt_t, fsfilcnt_t,
    gid_t, ino_t, mode_t, nlink_t, off_t, pid_t, time_t, uid_t,
};

/// Mask of the file type bits in `st_mode`
pub const S_IFMT: mode_t = 0o170000;

/// Block size reported when the handler does not provide `st_blksize`
pub const DEFAULT_BLKSIZE: blksize_t = 4096;

/// Unit of `st_blocks`
pub const BLOCK_UNIT: off_t = 512;

/// File attributes corresponding to `struct stat`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FileStat {
    /// ID of device containing file
    pub st_dev: dev_t,
    /// Inode number
    pub st_ino: ino_t,
    /// Protection and file type
    pub st_mode: mode_t,
    /// Number of hard links
    pub st_nlink: nlink_t,
    /// User ID of owner
    pub st_uid: uid_t,
    /// Group ID of owner
    pub st_gid: gid_t,
    /// Device ID (if special file)
    pub st_rdev: dev_t,
    /// Total size, in bytes
    pub st_size: off_t,
    /// Blocksize for file system I/O
    pub st_blksize: blksize_t,
    /// Number of 512B blocks allocated
    pub st_blocks: blkcnt_t,
    /// Time of last access
    pub st_atime: time_t,
    /// Time of last modification
    pub st_mtime: time_t,
    /// Time of last status change
    pub st_ctime: time_t,
}

impl FileStat {
    /// The type nibble the legacy directory filler expects.
    pub fn type_nibble(&self) -> c_int {
        type_nibble(self.st_mode)
    }
}

/// `(mode & S_IFMT) >> 12`, the `d_type`-style code of a file mode.
pub fn type_nibble(mode: mode_t) -> c_int {
    ((mode & S_IFMT) >> 12) as c_int
}

/// Filesystem statistics corresponding to `struct statvfs`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct StatVfs {
    /// Filesystem block size
    pub f_bsize: c_ulong,
    /// Fragment size
    pub f_frsize: c_ulong,
    /// Size of fs in f_frsize units
    pub f_blocks: fsblkcnt_t,
    /// Number of free blocks
    pub f_bfree: fsblkcnt_t,
    /// Number of free blocks for unprivileged users
    pub f_bavail: fsblkcnt_t,
    /// Number of inodes
    pub f_files: fsfilcnt_t,
    /// Number of free inodes
    pub f_ffree: fsfilcnt_t,
    /// Number of free inodes for unprivileged users
    pub f_favail: fsfilcnt_t,
    /// Filesystem ID
    pub f_fsid: c_ulong,
    /// Mount flags
    pub f_flag: c_ulong,
    /// Maximum filename length
    pub f_namemax: c_ulong,
}

/// Filesystem statistics corresponding to the pre-statvfs `struct statfs`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct LegacyStatFs {
    /// Type of filesystem
    pub f_type: c_long,
    /// Optimal transfer block size
    pub f_bsize: c_long,
    /// Total data blocks in filesystem
    pub f_blocks: fsblkcnt_t,
    /// Free blocks in fs
    pub f_bfree: fsblkcnt_t,
    /// Free blocks available to unprivileged user
    pub f_bavail: fsblkcnt_t,
    /// Total file nodes in filesystem
    pub f_files: fsfilcnt_t,
    /// Free file nodes in fs
    pub f_ffree: fsfilcnt_t,
    /// Maximum length of filenames
    pub f_namelen: c_long,
}

/// Destination of a statfs slot; the shape depends on the protocol revision.
#[derive(Debug)]
pub enum StatfsBuf<'a> {
    Vfs(&'a mut StatVfs),
    Legacy(&'a mut LegacyStatFs),
}

/// Byte-range lock corresponding to `struct flock`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct NativeFlock {
    pub l_type: c_short,
    /// Not used by the daemon, always `SEEK_SET`
    pub l_whence: c_short,
    pub l_start: off_t,
    pub l_len: off_t,
    pub l_pid: pid_t,
}

/// `struct utimbuf`
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Utimbuf {
    pub actime: time_t,
    pub modtime: time_t,
}

/// `struct timespec`
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct NativeTimespec {
    pub tv_sec: time_t,
    pub tv_nsec: c_long,
}

/// Per-open-file context, the daemon's `struct fuse_file_info`.
///
/// The bridge owns `fh`: it is zero until an open-like slot attaches a session and
/// must be passed back untouched on every later call for the same descriptor.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FileInfo {
    /// Open flags, available in open and release
    pub flags: c_int,
    /// Set by the bridge on open, opendir and create
    pub fh: u64,
    /// Can be filled in by open to keep cached data
    pub keep_cache: bool,
    /// Can be filled in by open to bypass the page cache
    pub direct_io: bool,
    /// Set when the call is a flush triggered by close
    pub flush: bool,
    /// Lock owner id, available in lock and flush
    pub lock_owner: u64,
}

impl FileInfo {
    pub fn with_flags(flags: c_int) -> Self {
        FileInfo {
            flags,
            ..Default::default()
        }
    }
}

/// Connection parameters handed to init.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnInfo {
    pub proto_major: c_uint,
    pub proto_minor: c_uint,
    pub max_write: c_uint,
    pub max_readahead: c_uint,
}

/// Identity of the process that issued the current request.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct RequestContext {
    pub uid: uid_t,
    pub gid: gid_t,
    pub pid: pid_t,
}

/*
 * ioctl command layout, asm-generic/ioctl.h
 */
const IOC_NRBITS: u32 = 8;
const IOC_TYPEBITS: u32 = 8;
const IOC_SIZEBITS: u32 = 14;
const IOC_DIRBITS: u32 = 2;
const IOC_SIZESHIFT: u32 = IOC_NRBITS + IOC_TYPEBITS;
const IOC_DIRSHIFT: u32 = IOC_SIZESHIFT + IOC_SIZEBITS;

bitflags! {
    /// Data transfer direction encoded in an ioctl command
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct IoctlDir: u32 {
        const WRITE = 1;
        const READ  = 2;
    }
}

/// Direction bits of an ioctl command.
pub fn ioc_dir(cmd: c_uint) -> IoctlDir {
    IoctlDir::from_bits_truncate((cmd >> IOC_DIRSHIFT) & ((1 << IOC_DIRBITS) - 1))
}

/// Argument size encoded in an ioctl command.
pub fn ioc_size(cmd: c_uint) -> usize {
    ((cmd >> IOC_SIZESHIFT) & ((1 << IOC_SIZEBITS) - 1)) as usize
}

bitflags! {
    /// Poll event bits, as returned through `revents`
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct PollEvents: u32 {
        const IN   = nix::libc::POLLIN as u32;
        const PRI  = nix::libc::POLLPRI as u32;
        const OUT  = nix::libc::POLLOUT as u32;
        const ERR  = nix::libc::POLLERR as u32;
        const HUP  = nix::libc::POLLHUP as u32;
    }
}
