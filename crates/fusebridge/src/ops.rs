//! The daemon-facing surface.
//!
//! A daemon drives a filesystem through [`Operations`]: one method per slot of its
//! operation table, each returning `0` or a negative errno like the native ABI.
//! Setup, service loop and teardown of a mount go through [`Daemon`] and
//! [`Mount`].

use std::ffi::CString;
use std::fmt;
use std::sync::Arc;

use nix::libc::{c_int, c_uint, dev_t, gid_t, ino_t, mode_t, off_t, size_t, uid_t};
use parking_lot::Mutex;

use crate::caps::{ApiVersion, Operation};
use crate::context::DispatchMode;
use crate::native::*;
use crate::utils::Result;

/// Native readdir filler: `(name, stat, offset)`. A non-zero return means the
/// buffer is full.
pub trait DirFiller {
    fn fill(&mut self, name: &str, stat: Option<&FileStat>, offset: off_t) -> c_int;
}

/// Native getdir filler of revisions before 23: `(name, type nibble, ino)`.
pub trait LegacyDirFiller {
    fn fill(&mut self, name: &str, typ: c_int, ino: ino_t) -> c_int;
}

/// Native poll handle owned by the daemon.
pub trait NativePollHandle: Send + Sync {
    /// Wake up the poller.
    fn notify(&self) -> c_int;

    /// Give the handle back to the daemon. Called exactly once.
    fn destroy(&mut self);
}

struct PollInner {
    native: Mutex<Box<dyn NativePollHandle>>,
}

impl Drop for PollInner {
    fn drop(&mut self) {
        self.native.get_mut().destroy();
    }
}

/// A poll handle as seen by handlers.
///
/// Clones share the native handle; it is destroyed when the last clone goes away.
#[derive(Clone)]
pub struct PollHandle(Arc<PollInner>);

impl PollHandle {
    pub fn new(native: Box<dyn NativePollHandle>) -> PollHandle {
        PollHandle(Arc::new(PollInner {
            native: Mutex::new(native),
        }))
    }

    /// Wake up the poller waiting on this handle.
    pub fn notify(&self) -> c_int {
        self.0.native.lock().notify()
    }

    pub fn ptr_eq(&self, other: &PollHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for PollHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PollHandle({:p})", Arc::as_ptr(&self.0))
    }
}

/// The daemon's operation table.
///
/// Every method corresponds to one native slot and returns `0` on success or a
/// negative errno. A daemon must only call slots for which
/// [`is_implemented`](Operations::is_implemented) is true; the default behaviour
/// of the others is the daemon's business.
#[allow(clippy::too_many_arguments)]
pub trait Operations: Send + Sync {
    /// Revision of the table.
    fn api_version(&self) -> ApiVersion;

    /// Whether the slot is registered.
    fn is_implemented(&self, op: Operation) -> bool;

    fn getattr(&self, req: &RequestContext, path: &str, st: &mut FileStat) -> c_int;
    fn fgetattr(&self, req: &RequestContext, path: &str, st: &mut FileStat, fi: &FileInfo)
        -> c_int;
    /// `buf` receives the NUL-terminated target
    fn readlink(&self, req: &RequestContext, path: &str, buf: &mut [u8]) -> c_int;
    /// Listing of revisions before 23
    fn getdir(&self, req: &RequestContext, path: &str, filler: &mut dyn LegacyDirFiller)
        -> c_int;
    fn readdir(
        &self,
        req: &RequestContext,
        path: &str,
        filler: &mut dyn DirFiller,
        offset: off_t,
        fi: &FileInfo,
    ) -> c_int;
    fn mknod(&self, req: &RequestContext, path: &str, mode: mode_t, rdev: dev_t) -> c_int;
    fn mkdir(&self, req: &RequestContext, path: &str, mode: mode_t) -> c_int;
    fn unlink(&self, req: &RequestContext, path: &str) -> c_int;
    fn rmdir(&self, req: &RequestContext, path: &str) -> c_int;
    fn symlink(&self, req: &RequestContext, target: &str, path: &str) -> c_int;
    fn rename(&self, req: &RequestContext, from: &str, to: &str) -> c_int;
    fn link(&self, req: &RequestContext, from: &str, to: &str) -> c_int;
    fn chmod(&self, req: &RequestContext, path: &str, mode: mode_t) -> c_int;
    fn chown(&self, req: &RequestContext, path: &str, uid: uid_t, gid: gid_t) -> c_int;
    fn truncate(&self, req: &RequestContext, path: &str, size: off_t) -> c_int;
    fn ftruncate(&self, req: &RequestContext, path: &str, size: off_t, fi: &FileInfo) -> c_int;
    /// `None` sets both times to the current time
    fn utime(&self, req: &RequestContext, path: &str, times: Option<&Utimbuf>) -> c_int;
    fn utimens(&self, req: &RequestContext, path: &str, ts: &[NativeTimespec; 2]) -> c_int;
    fn open(&self, req: &RequestContext, path: &str, fi: &mut FileInfo) -> c_int;
    /// Returns the number of bytes read
    fn read(&self, req: &RequestContext, path: &str, buf: &mut [u8], offset: off_t, fi: &FileInfo)
        -> c_int;
    /// Returns the number of bytes written
    fn write(&self, req: &RequestContext, path: &str, data: &[u8], offset: off_t, fi: &FileInfo)
        -> c_int;
    fn statfs(&self, req: &RequestContext, path: &str, buf: StatfsBuf<'_>) -> c_int;
    fn flush(&self, req: &RequestContext, path: &str, fi: &FileInfo) -> c_int;
    fn release(&self, req: &RequestContext, path: &str, fi: &mut FileInfo) -> c_int;
    fn fsync(&self, req: &RequestContext, path: &str, datasync: bool, fi: &FileInfo) -> c_int;
    fn setxattr(
        &self,
        req: &RequestContext,
        path: &str,
        name: &str,
        value: &[u8],
        flags: c_int,
    ) -> c_int;
    /// An empty `buf` asks for the size of the value
    fn getxattr(&self, req: &RequestContext, path: &str, name: &str, buf: &mut [u8]) -> c_int;
    /// An empty `buf` asks for the size of the list
    fn listxattr(&self, req: &RequestContext, path: &str, buf: &mut [u8]) -> c_int;
    fn removexattr(&self, req: &RequestContext, path: &str, name: &str) -> c_int;
    fn opendir(&self, req: &RequestContext, path: &str, fi: &mut FileInfo) -> c_int;
    fn releasedir(&self, req: &RequestContext, path: &str, fi: &mut FileInfo) -> c_int;
    fn fsyncdir(&self, req: &RequestContext, path: &str, datasync: bool, fi: &FileInfo) -> c_int;
    fn init(&self, conn: &ConnInfo);
    fn destroy(&self);
    fn access(&self, req: &RequestContext, path: &str, mask: c_int) -> c_int;
    fn create(&self, req: &RequestContext, path: &str, mode: mode_t, fi: &mut FileInfo) -> c_int;
    fn lock(
        &self,
        req: &RequestContext,
        path: &str,
        fi: &FileInfo,
        cmd: c_int,
        lock: &mut NativeFlock,
    ) -> c_int;
    fn bmap(&self, req: &RequestContext, path: &str, blocksize: size_t, idx: &mut u64) -> c_int;
    /// `data` is both the input and the output buffer of the command
    fn ioctl(
        &self,
        req: &RequestContext,
        path: &str,
        cmd: c_uint,
        fi: &FileInfo,
        flags: c_uint,
        data: &mut [u8],
    ) -> c_int;
    fn poll(
        &self,
        req: &RequestContext,
        path: &str,
        fi: &FileInfo,
        ph: Option<Box<dyn NativePollHandle>>,
        revents: &mut c_uint,
    ) -> c_int;
}

/// Notifications the bridge can send to a running mount.
pub trait Notifier: Send + Sync {
    /// Drop cached data of `path`; returns `0` or a negative errno.
    fn invalidate(&self, path: &str) -> c_int;
}

/// A mounted filesystem, set up and ready to serve.
pub trait Mount {
    fn notifier(&self) -> Arc<dyn Notifier>;

    /// Run the service loop until unmount.
    fn run(&mut self, mode: DispatchMode) -> Result<()>;

    /// Unmount and release everything setup acquired.
    fn teardown(self: Box<Self>);
}

/// A filesystem-request daemon.
pub trait Daemon {
    /// Register `ops` with the daemon and mount. `argv` is never empty.
    fn setup(&mut self, argv: &[CString], ops: Arc<dyn Operations>) -> Result<Box<dyn Mount>>;
}
