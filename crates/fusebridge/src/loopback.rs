//! An in-process daemon.
//!
//! [`Loopback`] mounts nothing: its service loop runs a script against the
//! registered operation table through a [`Client`], the way a kernel request
//! would reach the slots. It backs the integration tests and the demo binary.

use std::ffi::CString;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use log::debug;
use nix::libc::{c_int, c_uint, dev_t, gid_t, ino_t, mode_t, off_t, uid_t};
use parking_lot::Mutex;

use crate::caps::{ApiVersion, DirFill, Operation, Profile, StatfsShape};
use crate::context::DispatchMode;
use crate::error::{Errno, Error};
use crate::native::*;
use crate::ops::{
    Daemon, DirFiller, LegacyDirFiller, Mount, NativePollHandle, Notifier, Operations,
};
use crate::utils::Result;

/// Result of a client call: the value, or the errno the slot returned.
pub type Reply<T> = ::std::result::Result<T, Errno>;

type Script = Box<dyn FnOnce(&Client) -> Result<()> + Send>;

/// Largest link target a client reads back
const PATH_MAX: usize = 4096;

fn reply(ret: c_int) -> Reply<c_int> {
    if ret < 0 {
        Err(Errno::from_raw(-ret))
    } else {
        Ok(ret)
    }
}

/// Loopback daemon running one script per mount.
pub struct Loopback {
    script: Option<Script>,
    invalidated: Arc<Mutex<Vec<String>>>,
    conn: ConnInfo,
}

impl Loopback {
    pub fn new<F>(script: F) -> Loopback
    where
        F: FnOnce(&Client) -> Result<()> + Send + 'static,
    {
        Loopback {
            script: Some(Box::new(script)),
            invalidated: Arc::new(Mutex::new(Vec::new())),
            conn: ConnInfo {
                proto_major: 7,
                proto_minor: 31,
                max_write: 128 * 1024,
                max_readahead: 128 * 1024,
            },
        }
    }

    /// Paths invalidated through the mount, in order.
    pub fn invalidated(&self) -> Vec<String> {
        self.invalidated.lock().clone()
    }
}

impl Daemon for Loopback {
    fn setup(&mut self, argv: &[CString], ops: Arc<dyn Operations>) -> Result<Box<dyn Mount>> {
        debug!("loopback setup {argv:?}");
        let script = self.script.take().ok_or(Error::Setup)?;

        Ok(Box::new(LoopbackMount {
            ops,
            script: Some(script),
            conn: self.conn,
            notifier: Arc::new(Recorder(self.invalidated.clone())),
        }))
    }
}

struct Recorder(Arc<Mutex<Vec<String>>>);

impl Notifier for Recorder {
    fn invalidate(&self, path: &str) -> c_int {
        self.0.lock().push(path.to_owned());
        0
    }
}

struct LoopbackMount {
    ops: Arc<dyn Operations>,
    script: Option<Script>,
    conn: ConnInfo,
    notifier: Arc<Recorder>,
}

impl Mount for LoopbackMount {
    fn notifier(&self) -> Arc<dyn Notifier> {
        self.notifier.clone()
    }

    fn run(&mut self, mode: DispatchMode) -> Result<()> {
        let script = self.script.take().ok_or(Error::Loop)?;
        let client = Client::new(self.ops.clone(), mode);

        if self.ops.is_implemented(Operation::Init) {
            self.ops.init(&self.conn);
        }
        let ret = script(&client);
        if self.ops.is_implemented(Operation::Destroy) {
            self.ops.destroy();
        }
        ret
    }

    fn teardown(self: Box<Self>) {
        debug!("loopback teardown");
    }
}

/// A filler collecting at most `limit` entries.
#[derive(Debug, Default)]
pub struct VecFiller {
    pub limit: Option<usize>,
    pub entries: Vec<(String, FileStat, off_t)>,
}

impl DirFiller for VecFiller {
    fn fill(&mut self, name: &str, stat: Option<&FileStat>, offset: off_t) -> c_int {
        if self.limit.is_some_and(|l| self.entries.len() >= l) {
            return 1;
        }
        self.entries
            .push((name.to_owned(), stat.copied().unwrap_or_default(), offset));
        0
    }
}

impl LegacyDirFiller for VecFiller {
    fn fill(&mut self, name: &str, typ: c_int, ino: ino_t) -> c_int {
        let stat = FileStat {
            st_ino: ino,
            st_mode: (typ as mode_t) << 12,
            ..Default::default()
        };
        DirFiller::fill(self, name, Some(&stat), 0)
    }
}

/// Result of a statfs call, in the shape of the active revision.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Statfs {
    Vfs(StatVfs),
    Legacy(LegacyStatFs),
}

/// Counters observing a poll handle handed to the bridge.
#[derive(Clone, Debug, Default)]
pub struct PollProbe {
    notified: Arc<AtomicUsize>,
    destroyed: Arc<AtomicUsize>,
}

struct ProbeHandle(PollProbe);

impl NativePollHandle for ProbeHandle {
    fn notify(&self) -> c_int {
        self.0.notified.fetch_add(1, Ordering::SeqCst);
        0
    }

    fn destroy(&mut self) {
        self.0.destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

impl PollProbe {
    pub fn new() -> PollProbe {
        PollProbe::default()
    }

    /// A fresh native handle reporting to this probe.
    pub fn handle(&self) -> Box<dyn NativePollHandle> {
        Box::new(ProbeHandle(self.clone()))
    }

    pub fn notified(&self) -> usize {
        self.notified.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }
}

/// Issues requests against an operation table the way the daemon would.
///
/// Calls to unregistered slots fail with `ENOSYS` without reaching the table.
#[derive(Clone)]
pub struct Client {
    ops: Arc<dyn Operations>,
    mode: DispatchMode,
    req: RequestContext,
}

impl Client {
    pub fn new(ops: Arc<dyn Operations>, mode: DispatchMode) -> Client {
        Client {
            ops,
            mode,
            req: RequestContext::default(),
        }
    }

    /// A client issuing requests on behalf of `req`.
    pub fn with_context(mut self, req: RequestContext) -> Client {
        self.req = req;
        self
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    pub fn api_version(&self) -> ApiVersion {
        self.ops.api_version()
    }

    fn profile(&self) -> Profile {
        Profile::new(self.api_version())
    }

    pub fn is_implemented(&self, op: Operation) -> bool {
        self.ops.is_implemented(op)
    }

    fn slot(&self, op: Operation) -> Reply<&dyn Operations> {
        if self.ops.is_implemented(op) {
            Ok(self.ops.as_ref())
        } else {
            Err(Errno::ENOSYS)
        }
    }

    /// Run `f` for each of `workers` requests, on separate threads when the
    /// daemon dispatches concurrently.
    pub fn dispatch<F>(&self, workers: usize, f: F)
    where
        F: Fn(usize, &Client) + Sync,
    {
        match self.mode {
            DispatchMode::Single => (0..workers).for_each(|i| f(i, self)),
            DispatchMode::Concurrent => thread::scope(|s| {
                for i in 0..workers {
                    let f = &f;
                    s.spawn(move || f(i, self));
                }
            }),
        }
    }

    pub fn getattr(&self, path: &str) -> Reply<FileStat> {
        let mut st = FileStat::default();
        reply(self.slot(Operation::Getattr)?.getattr(&self.req, path, &mut st))?;
        Ok(st)
    }

    pub fn fgetattr(&self, path: &str, fi: &FileInfo) -> Reply<FileStat> {
        let mut st = FileStat::default();
        reply(self.slot(Operation::Fgetattr)?.fgetattr(&self.req, path, &mut st, fi))?;
        Ok(st)
    }

    pub fn readlink(&self, path: &str) -> Reply<String> {
        let mut buf = vec![0u8; PATH_MAX];
        reply(self.slot(Operation::Readlink)?.readlink(&self.req, path, &mut buf))?;
        let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        Ok(String::from_utf8_lossy(&buf[..end]).into_owned())
    }

    /// One readdir call, or a getdir call on revisions before 23.
    pub fn readdir(&self, path: &str, offset: off_t, fi: &FileInfo, filler: &mut VecFiller) -> Reply<()> {
        let ops = self.slot(Operation::Readdir)?;
        let ret = match self.profile().dir_fill() {
            DirFill::Stat => ops.readdir(&self.req, path, filler, offset, fi),
            DirFill::Legacy => ops.getdir(&self.req, path, filler),
        };
        reply(ret).map(drop)
    }

    /// Names in a directory, opening and releasing it when the table supports that.
    pub fn list(&self, path: &str) -> Reply<Vec<String>> {
        let mut fi = if self.is_implemented(Operation::Opendir) {
            self.opendir(path)?
        } else {
            FileInfo::default()
        };

        let mut filler = VecFiller::default();
        let listed = self.readdir(path, 0, &fi, &mut filler);

        if self.is_implemented(Operation::Releasedir) {
            self.releasedir(path, &mut fi)?;
        }
        listed?;

        Ok(filler.entries.into_iter().map(|(name, _, _)| name).collect())
    }

    pub fn mknod(&self, path: &str, mode: mode_t, rdev: dev_t) -> Reply<()> {
        reply(self.slot(Operation::Mknod)?.mknod(&self.req, path, mode, rdev)).map(drop)
    }

    pub fn mkdir(&self, path: &str, mode: mode_t) -> Reply<()> {
        reply(self.slot(Operation::Mkdir)?.mkdir(&self.req, path, mode)).map(drop)
    }

    pub fn unlink(&self, path: &str) -> Reply<()> {
        reply(self.slot(Operation::Unlink)?.unlink(&self.req, path)).map(drop)
    }

    pub fn rmdir(&self, path: &str) -> Reply<()> {
        reply(self.slot(Operation::Rmdir)?.rmdir(&self.req, path)).map(drop)
    }

    pub fn symlink(&self, target: &str, path: &str) -> Reply<()> {
        reply(self.slot(Operation::Symlink)?.symlink(&self.req, target, path)).map(drop)
    }

    pub fn rename(&self, from: &str, to: &str) -> Reply<()> {
        reply(self.slot(Operation::Rename)?.rename(&self.req, from, to)).map(drop)
    }

    pub fn link(&self, from: &str, to: &str) -> Reply<()> {
        reply(self.slot(Operation::Link)?.link(&self.req, from, to)).map(drop)
    }

    pub fn chmod(&self, path: &str, mode: mode_t) -> Reply<()> {
        reply(self.slot(Operation::Chmod)?.chmod(&self.req, path, mode)).map(drop)
    }

    pub fn chown(&self, path: &str, uid: uid_t, gid: gid_t) -> Reply<()> {
        reply(self.slot(Operation::Chown)?.chown(&self.req, path, uid, gid)).map(drop)
    }

    pub fn truncate(&self, path: &str, size: off_t) -> Reply<()> {
        reply(self.slot(Operation::Truncate)?.truncate(&self.req, path, size)).map(drop)
    }

    pub fn ftruncate(&self, path: &str, size: off_t, fi: &FileInfo) -> Reply<()> {
        reply(self.slot(Operation::Ftruncate)?.ftruncate(&self.req, path, size, fi)).map(drop)
    }

    pub fn utime(&self, path: &str, times: Option<&Utimbuf>) -> Reply<()> {
        reply(self.slot(Operation::Utime)?.utime(&self.req, path, times)).map(drop)
    }

    pub fn utimens(&self, path: &str, ts: &[NativeTimespec; 2]) -> Reply<()> {
        reply(self.slot(Operation::Utimens)?.utimens(&self.req, path, ts)).map(drop)
    }

    pub fn open(&self, path: &str, flags: c_int) -> Reply<FileInfo> {
        let mut fi = FileInfo::with_flags(flags);
        reply(self.slot(Operation::Open)?.open(&self.req, path, &mut fi))?;
        Ok(fi)
    }

    pub fn create(&self, path: &str, flags: c_int, mode: mode_t) -> Reply<FileInfo> {
        let mut fi = FileInfo::with_flags(flags);
        reply(self.slot(Operation::Create)?.create(&self.req, path, mode, &mut fi))?;
        Ok(fi)
    }

    pub fn read(&self, path: &str, size: usize, offset: off_t, fi: &FileInfo) -> Reply<Vec<u8>> {
        let mut buf = vec![0u8; size];
        let n = reply(self.slot(Operation::Read)?.read(&self.req, path, &mut buf, offset, fi))?;
        buf.truncate(n as usize);
        Ok(buf)
    }

    pub fn write(&self, path: &str, data: &[u8], offset: off_t, fi: &FileInfo) -> Reply<usize> {
        let n = reply(self.slot(Operation::Write)?.write(&self.req, path, data, offset, fi))?;
        Ok(n as usize)
    }

    pub fn statfs(&self, path: &str) -> Reply<Statfs> {
        let ops = self.slot(Operation::Statfs)?;
        match self.profile().statfs_shape() {
            StatfsShape::Vfs => {
                let mut st = StatVfs::default();
                reply(ops.statfs(&self.req, path, StatfsBuf::Vfs(&mut st)))?;
                Ok(Statfs::Vfs(st))
            }
            StatfsShape::Legacy => {
                let mut st = LegacyStatFs::default();
                reply(ops.statfs(&self.req, path, StatfsBuf::Legacy(&mut st)))?;
                Ok(Statfs::Legacy(st))
            }
        }
    }

    pub fn flush(&self, path: &str, fi: &FileInfo) -> Reply<()> {
        reply(self.slot(Operation::Flush)?.flush(&self.req, path, fi)).map(drop)
    }

    pub fn release(&self, path: &str, fi: &mut FileInfo) -> Reply<()> {
        reply(self.slot(Operation::Release)?.release(&self.req, path, fi)).map(drop)
    }

    pub fn fsync(&self, path: &str, datasync: bool, fi: &FileInfo) -> Reply<()> {
        reply(self.slot(Operation::Fsync)?.fsync(&self.req, path, datasync, fi)).map(drop)
    }

    pub fn setxattr(&self, path: &str, name: &str, value: &[u8], flags: c_int) -> Reply<()> {
        let ops = self.slot(Operation::Setxattr)?;
        reply(ops.setxattr(&self.req, path, name, value, flags)).map(drop)
    }

    /// With an empty `buf`, returns the size of the value.
    pub fn getxattr(&self, path: &str, name: &str, buf: &mut [u8]) -> Reply<usize> {
        let n = reply(self.slot(Operation::Getxattr)?.getxattr(&self.req, path, name, buf))?;
        Ok(n as usize)
    }

    /// With an empty `buf`, returns the size of the packed list.
    pub fn listxattr(&self, path: &str, buf: &mut [u8]) -> Reply<usize> {
        let n = reply(self.slot(Operation::Listxattr)?.listxattr(&self.req, path, buf))?;
        Ok(n as usize)
    }

    pub fn removexattr(&self, path: &str, name: &str) -> Reply<()> {
        reply(self.slot(Operation::Removexattr)?.removexattr(&self.req, path, name)).map(drop)
    }

    pub fn opendir(&self, path: &str) -> Reply<FileInfo> {
        let mut fi = FileInfo::default();
        reply(self.slot(Operation::Opendir)?.opendir(&self.req, path, &mut fi))?;
        Ok(fi)
    }

    pub fn releasedir(&self, path: &str, fi: &mut FileInfo) -> Reply<()> {
        reply(self.slot(Operation::Releasedir)?.releasedir(&self.req, path, fi)).map(drop)
    }

    pub fn fsyncdir(&self, path: &str, datasync: bool, fi: &FileInfo) -> Reply<()> {
        reply(self.slot(Operation::Fsyncdir)?.fsyncdir(&self.req, path, datasync, fi)).map(drop)
    }

    pub fn access(&self, path: &str, mask: c_int) -> Reply<()> {
        reply(self.slot(Operation::Access)?.access(&self.req, path, mask)).map(drop)
    }

    pub fn lock(&self, path: &str, fi: &FileInfo, cmd: c_int, lock: &mut NativeFlock) -> Reply<()> {
        reply(self.slot(Operation::Lock)?.lock(&self.req, path, fi, cmd, lock)).map(drop)
    }

    pub fn bmap(&self, path: &str, blocksize: usize, idx: u64) -> Reply<u64> {
        let mut idx = idx;
        reply(self.slot(Operation::Bmap)?.bmap(&self.req, path, blocksize, &mut idx))?;
        Ok(idx)
    }

    pub fn ioctl(&self, path: &str, cmd: c_uint, fi: &FileInfo, flags: c_uint, data: &mut [u8]) -> Reply<()> {
        let ops = self.slot(Operation::Ioctl)?;
        reply(ops.ioctl(&self.req, path, cmd, fi, flags, data)).map(drop)
    }

    /// Returns the ready events.
    pub fn poll(&self, path: &str, fi: &FileInfo, ph: Option<Box<dyn NativePollHandle>>) -> Reply<u32> {
        let mut revents: c_uint = 0;
        let ops = match self.slot(Operation::Poll) {
            Ok(ops) => ops,
            Err(e) => {
                // the handle never reached the bridge, so it is given back here
                if let Some(mut ph) = ph {
                    ph.destroy();
                }
                return Err(e);
            }
        };
        reply(ops.poll(&self.req, path, fi, ph, &mut revents))?;
        Ok(revents)
    }
}
