//! The operation dispatch table.
//!
//! [`Bridge`] implements the daemon's [`Operations`] on top of a [`HandlerSet`].
//! Each slot builds the handler's positional arguments from the native ones,
//! invokes the handler inside the execution context and turns the returned value
//! back into the native result.
//!
//! Every handler result goes through the same protocol first: `None` is success,
//! an integer is the status code itself, and an error is reported as its errno
//! (or as `EINVAL` when it carries none). Only the remaining structured values
//! reach the per-operation conversion.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use log::{debug, error, trace, warn};
use nix::libc::{c_int, c_uint, dev_t, gid_t, mode_t, off_t, size_t, time_t, uid_t};

use crate::caps::{ApiVersion, Operation, Profile};
use crate::context::{DispatchMode, Environment};
use crate::dirstream;
use crate::error::{Errno, Error};
use crate::extract;
use crate::fh::{FileTable, OpenResult};
use crate::handlers::{Args, Control, Handler, HandlerSet};
use crate::marshal::{MarshalError, coerce, status};
use crate::native::*;
use crate::ops::{DirFiller, LegacyDirFiller, NativePollHandle, Operations, PollHandle};
use crate::structs::{Flock, Timespec};
use crate::utils::Result;
use crate::value::Value;

enum Slot {
    Implemented(Handler),
    NotImplemented,
}

/// Adapter between a daemon's operation table and a host handler set.
pub struct Bridge {
    profile: Profile,
    slots: Vec<Slot>,
    env: Environment,
    files: FileTable,
    control: Control,
}

fn neg(e: Errno) -> c_int {
    -(e as c_int)
}

fn unexpected(expected: &'static str, v: &Value) -> Error {
    Error::Marshal(MarshalError::Shape {
        expected,
        found: v.type_name(),
    })
}

fn count(n: usize) -> Result<c_int> {
    c_int::try_from(n).map_err(|_| {
        Error::Marshal(MarshalError::OutOfRange {
            field: "length",
            value: n.to_string(),
        })
    })
}

/// Default result conversion: `None` and integers are handled here, anything
/// else is passed to `structured`.
fn protocol<F>(v: Value, structured: F) -> Result<c_int>
where
    F: FnOnce(Value) -> Result<c_int>,
{
    match v {
        Value::None => Ok(0),
        Value::Int(n) => Ok(status(n)?),
        v => structured(v),
    }
}

fn status_only(v: Value) -> Result<c_int> {
    Err(unexpected("status", &v))
}

fn now() -> time_t {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as time_t)
        .unwrap_or(0)
}

/// Copy a link target into the native buffer, truncated and NUL-terminated.
fn copy_link(target: &str, buf: &mut [u8]) {
    let Some(room) = buf.len().checked_sub(1) else {
        return;
    };
    let n = target.len().min(room);
    buf[..n].copy_from_slice(&target.as_bytes()[..n]);
    buf[n] = 0;
}

/// Answer a size probe, report `ERANGE`, or copy `data` into `buf`.
fn copy_sized(data: &[u8], buf: &mut [u8]) -> Result<c_int> {
    if buf.is_empty() {
        return count(data.len());
    }
    if data.len() > buf.len() {
        return Ok(neg(Errno::ERANGE));
    }
    buf[..data.len()].copy_from_slice(data);
    count(data.len())
}

impl Bridge {
    /// Resolve `handlers` against the capability table of `version`.
    ///
    /// A handler for an operation the revision does not have is left unregistered.
    pub fn new(handlers: &HandlerSet, version: ApiVersion, mode: DispatchMode) -> Bridge {
        let profile = Profile::new(version);

        let slots = Operation::all()
            .map(|op| match handlers.get(op) {
                Some(h) if profile.supports(op) => Slot::Implemented(h.clone()),
                Some(_) => {
                    warn!("{op} requires API version {}, not registering it", op.capability().since);
                    Slot::NotImplemented
                }
                None => Slot::NotImplemented,
            })
            .collect();

        Bridge {
            profile,
            slots,
            env: Environment::new(mode),
            files: FileTable::new(),
            control: Control::new(version),
        }
    }

    pub fn profile(&self) -> Profile {
        self.profile
    }

    pub fn control(&self) -> &Control {
        &self.control
    }

    /// Number of descriptors holding a session.
    pub fn open_files(&self) -> usize {
        self.files.len()
    }

    /// Drop the sessions the daemon never released. Returns how many there were.
    pub fn close_all(&self) -> usize {
        self.files.clear()
    }

    fn handler(&self, op: Operation) -> Option<&Handler> {
        match self.slots[op as usize] {
            Slot::Implemented(ref h) => Some(h),
            Slot::NotImplemented => None,
        }
    }

    /// The descriptor's session, if the slot carries one at this revision.
    fn session(&self, op: Operation, fi: &FileInfo) -> Option<Value> {
        if self.profile.passes_file(op) {
            self.files.get(fi)
        } else {
            None
        }
    }

    /// Invoke the handler of `op` and convert its result with `finish`.
    fn invoke<F>(
        &self,
        op: Operation,
        req: &RequestContext,
        values: Vec<Value>,
        file: Option<Value>,
        finish: F,
    ) -> c_int
    where
        F: FnOnce(Value) -> Result<c_int>,
    {
        let Some(handler) = self.handler(op) else {
            return neg(Errno::ENOSYS);
        };

        let _scope = self.env.enter();
        let args = Args::new(op, values, file, *req, self.control.clone());
        trace!("{op} {:?}", args.values());

        let ret = handler(&args).and_then(finish);
        match ret {
            Ok(n) => {
                trace!("{op} -> {n}");
                n
            }
            Err(e) if e.is_errno() => {
                debug!("{op} {:?}: {e}", args.get(0));
                neg(e.errno())
            }
            Err(e) => {
                error!("{op} {:?}: {e}", args.get(0));
                neg(Errno::EINVAL)
            }
        }
    }

    /// Invoke with the default result protocol.
    fn call<F>(
        &self,
        op: Operation,
        req: &RequestContext,
        values: Vec<Value>,
        file: Option<Value>,
        structured: F,
    ) -> c_int
    where
        F: FnOnce(Value) -> Result<c_int>,
    {
        self.invoke(op, req, values, file, |v| protocol(v, structured))
    }

    /// Operations whose only result is a status.
    fn simple(&self, op: Operation, req: &RequestContext, values: Vec<Value>, file: Option<Value>) -> c_int {
        self.call(op, req, values, file, status_only)
    }

    fn open_like(&self, op: Operation, req: &RequestContext, values: Vec<Value>, fi: &mut FileInfo) -> c_int {
        let attaches = self.profile.attaches_session(op);
        let hints = self.profile.propagates_cache_hints() && op != Operation::Opendir;
        let files = &self.files;

        self.call(op, req, values, None, |v| {
            if !attaches {
                return Err(unexpected("status", &v));
            }

            let (session, cache) = match OpenResult::interpret(v) {
                OpenResult::Disposable(cache) => (None, cache.unwrap_or_default()),
                OpenResult::Session(v, cache) => (Some(v), cache),
            };
            if hints {
                fi.keep_cache = cache.keep_cache;
                fi.direct_io = cache.direct_io;
            }
            if let Some(session) = session {
                files.attach(fi, session);
            }
            Ok(0)
        })
    }

    fn lifecycle(&self, op: Operation) {
        if self.handler(op).is_none() {
            return;
        }
        let ret = self.call(op, &RequestContext::default(), Vec::new(), None, |_| Ok(0));
        if ret < 0 {
            warn!("{op} returned {ret}");
        }
    }
}

impl Operations for Bridge {
    fn api_version(&self) -> ApiVersion {
        self.profile.version()
    }

    fn is_implemented(&self, op: Operation) -> bool {
        self.handler(op).is_some()
    }

    fn getattr(&self, req: &RequestContext, path: &str, st: &mut FileStat) -> c_int {
        self.call(Operation::Getattr, req, vec![path.into()], None, |v| {
            *st = extract::stat(&v)?;
            Ok(0)
        })
    }

    fn fgetattr(&self, req: &RequestContext, path: &str, st: &mut FileStat, fi: &FileInfo) -> c_int {
        let file = self.session(Operation::Fgetattr, fi);
        self.call(Operation::Fgetattr, req, vec![path.into()], file, |v| {
            *st = extract::stat(&v)?;
            Ok(0)
        })
    }

    fn readlink(&self, req: &RequestContext, path: &str, buf: &mut [u8]) -> c_int {
        self.call(Operation::Readlink, req, vec![path.into()], None, |v| {
            let target = v.as_str().ok_or_else(|| unexpected("string", &v))?;
            copy_link(target, buf);
            Ok(0)
        })
    }

    fn getdir(&self, req: &RequestContext, path: &str, filler: &mut dyn LegacyDirFiller) -> c_int {
        self.call(Operation::Readdir, req, vec![path.into()], None, |v| {
            dirstream::fill_legacy(v, filler)?;
            Ok(0)
        })
    }

    fn readdir(
        &self,
        req: &RequestContext,
        path: &str,
        filler: &mut dyn DirFiller,
        offset: off_t,
        fi: &FileInfo,
    ) -> c_int {
        let file = self.session(Operation::Readdir, fi);
        self.call(Operation::Readdir, req, vec![path.into(), offset.into()], file, |v| {
            dirstream::fill(v, filler)?;
            Ok(0)
        })
    }

    fn mknod(&self, req: &RequestContext, path: &str, mode: mode_t, rdev: dev_t) -> c_int {
        self.simple(Operation::Mknod, req, vec![path.into(), mode.into(), rdev.into()], None)
    }

    fn mkdir(&self, req: &RequestContext, path: &str, mode: mode_t) -> c_int {
        self.simple(Operation::Mkdir, req, vec![path.into(), mode.into()], None)
    }

    fn unlink(&self, req: &RequestContext, path: &str) -> c_int {
        self.simple(Operation::Unlink, req, vec![path.into()], None)
    }

    fn rmdir(&self, req: &RequestContext, path: &str) -> c_int {
        self.simple(Operation::Rmdir, req, vec![path.into()], None)
    }

    fn symlink(&self, req: &RequestContext, target: &str, path: &str) -> c_int {
        self.simple(Operation::Symlink, req, vec![target.into(), path.into()], None)
    }

    fn rename(&self, req: &RequestContext, from: &str, to: &str) -> c_int {
        self.simple(Operation::Rename, req, vec![from.into(), to.into()], None)
    }

    fn link(&self, req: &RequestContext, from: &str, to: &str) -> c_int {
        self.simple(Operation::Link, req, vec![from.into(), to.into()], None)
    }

    fn chmod(&self, req: &RequestContext, path: &str, mode: mode_t) -> c_int {
        self.simple(Operation::Chmod, req, vec![path.into(), mode.into()], None)
    }

    fn chown(&self, req: &RequestContext, path: &str, uid: uid_t, gid: gid_t) -> c_int {
        self.simple(Operation::Chown, req, vec![path.into(), uid.into(), gid.into()], None)
    }

    fn truncate(&self, req: &RequestContext, path: &str, size: off_t) -> c_int {
        self.simple(Operation::Truncate, req, vec![path.into(), size.into()], None)
    }

    fn ftruncate(&self, req: &RequestContext, path: &str, size: off_t, fi: &FileInfo) -> c_int {
        let file = self.session(Operation::Ftruncate, fi);
        self.simple(Operation::Ftruncate, req, vec![path.into(), size.into()], file)
    }

    fn utime(&self, req: &RequestContext, path: &str, times: Option<&Utimbuf>) -> c_int {
        let (actime, modtime) = match times {
            Some(t) => (t.actime, t.modtime),
            None => {
                let now = now();
                (now, now)
            }
        };
        let times = Value::Seq(vec![actime.into(), modtime.into()]);
        self.simple(Operation::Utime, req, vec![path.into(), times], None)
    }

    fn utimens(&self, req: &RequestContext, path: &str, ts: &[NativeTimespec; 2]) -> c_int {
        let values = vec![
            path.into(),
            Timespec::from(ts[0]).into(),
            Timespec::from(ts[1]).into(),
        ];
        self.simple(Operation::Utimens, req, values, None)
    }

    fn open(&self, req: &RequestContext, path: &str, fi: &mut FileInfo) -> c_int {
        let values = vec![path.into(), fi.flags.into()];
        self.open_like(Operation::Open, req, values, fi)
    }

    fn read(
        &self,
        req: &RequestContext,
        path: &str,
        buf: &mut [u8],
        offset: off_t,
        fi: &FileInfo,
    ) -> c_int {
        let size = self.profile.transfer_size(buf.len());
        let file = self.session(Operation::Read, fi);
        self.call(Operation::Read, req, vec![path.into(), size.into(), offset.into()], file, |v| {
            let data = match v {
                Value::Bytes(ref b) => b,
                _ => return Err(unexpected("bytes", &v)),
            };
            if data.len() > size {
                return Err(Error::Marshal(MarshalError::OutOfRange {
                    field: "read",
                    value: format!("{} bytes", data.len()),
                }));
            }
            buf[..data.len()].copy_from_slice(data);
            count(data.len())
        })
    }

    fn write(
        &self,
        req: &RequestContext,
        path: &str,
        data: &[u8],
        offset: off_t,
        fi: &FileInfo,
    ) -> c_int {
        let size = self.profile.transfer_size(data.len());
        let file = self.session(Operation::Write, fi);
        let values = vec![path.into(), Bytes::copy_from_slice(&data[..size]).into(), offset.into()];
        self.simple(Operation::Write, req, values, file)
    }

    fn statfs(&self, req: &RequestContext, _path: &str, buf: StatfsBuf<'_>) -> c_int {
        self.call(Operation::Statfs, req, Vec::new(), None, |v| {
            match buf {
                StatfsBuf::Vfs(st) => *st = extract::statvfs(&v)?,
                StatfsBuf::Legacy(st) => *st = extract::legacy_statfs(&v)?,
            }
            Ok(0)
        })
    }

    fn flush(&self, req: &RequestContext, path: &str, fi: &FileInfo) -> c_int {
        let file = self.session(Operation::Flush, fi);
        self.simple(Operation::Flush, req, vec![path.into()], file)
    }

    fn release(&self, req: &RequestContext, path: &str, fi: &mut FileInfo) -> c_int {
        let flags = fi.flags;
        let file = self
            .files
            .detach(fi)
            .filter(|_| self.profile.passes_file(Operation::Release));
        self.simple(Operation::Release, req, vec![path.into(), flags.into()], file)
    }

    fn fsync(&self, req: &RequestContext, path: &str, datasync: bool, fi: &FileInfo) -> c_int {
        let file = self.session(Operation::Fsync, fi);
        let values = vec![path.into(), c_int::from(datasync).into()];
        self.simple(Operation::Fsync, req, values, file)
    }

    fn setxattr(
        &self,
        req: &RequestContext,
        path: &str,
        name: &str,
        value: &[u8],
        flags: c_int,
    ) -> c_int {
        let values = vec![
            path.into(),
            name.into(),
            Bytes::copy_from_slice(value).into(),
            flags.into(),
        ];
        self.simple(Operation::Setxattr, req, values, None)
    }

    fn getxattr(&self, req: &RequestContext, path: &str, name: &str, buf: &mut [u8]) -> c_int {
        let values = vec![path.into(), name.into(), buf.len().into()];
        self.call(Operation::Getxattr, req, values, None, |v| {
            let data = v.as_bytes().ok_or_else(|| unexpected("bytes", &v))?;
            copy_sized(data, buf)
        })
    }

    fn listxattr(&self, req: &RequestContext, path: &str, buf: &mut [u8]) -> c_int {
        let values = vec![path.into(), buf.len().into()];
        self.call(Operation::Listxattr, req, values, None, |v| {
            let mut packed = Vec::new();
            for item in v.into_values()? {
                match item? {
                    Value::Str(name) => {
                        packed.extend_from_slice(name.as_bytes());
                        packed.push(0);
                    }
                    other => {
                        debug!("attribute list ended by {}", other.type_name());
                        break;
                    }
                }
            }
            copy_sized(&packed, buf)
        })
    }

    fn removexattr(&self, req: &RequestContext, path: &str, name: &str) -> c_int {
        self.simple(Operation::Removexattr, req, vec![path.into(), name.into()], None)
    }

    fn opendir(&self, req: &RequestContext, path: &str, fi: &mut FileInfo) -> c_int {
        self.open_like(Operation::Opendir, req, vec![path.into()], fi)
    }

    fn releasedir(&self, req: &RequestContext, path: &str, fi: &mut FileInfo) -> c_int {
        let file = self
            .files
            .detach(fi)
            .filter(|_| self.profile.passes_file(Operation::Releasedir));
        self.simple(Operation::Releasedir, req, vec![path.into()], file)
    }

    fn fsyncdir(&self, req: &RequestContext, path: &str, datasync: bool, fi: &FileInfo) -> c_int {
        let file = self.session(Operation::Fsyncdir, fi);
        let values = vec![path.into(), c_int::from(datasync).into()];
        self.simple(Operation::Fsyncdir, req, values, file)
    }

    fn init(&self, conn: &ConnInfo) {
        debug!("init: protocol {}.{}", conn.proto_major, conn.proto_minor);
        self.lifecycle(Operation::Init);
    }

    fn destroy(&self) {
        self.lifecycle(Operation::Destroy);
    }

    fn access(&self, req: &RequestContext, path: &str, mask: c_int) -> c_int {
        self.simple(Operation::Access, req, vec![path.into(), mask.into()], None)
    }

    fn create(&self, req: &RequestContext, path: &str, mode: mode_t, fi: &mut FileInfo) -> c_int {
        let values = vec![path.into(), fi.flags.into(), mode.into()];
        self.open_like(Operation::Create, req, values, fi)
    }

    fn lock(
        &self,
        req: &RequestContext,
        path: &str,
        fi: &FileInfo,
        cmd: c_int,
        lock: &mut NativeFlock,
    ) -> c_int {
        let file = self.session(Operation::Lock, fi);
        let values = vec![
            path.into(),
            cmd.into(),
            fi.lock_owner.into(),
            Flock::from(&*lock).into(),
        ];
        self.call(Operation::Lock, req, values, file, |v| {
            extract::update_flock(&v, lock)?;
            Ok(0)
        })
    }

    fn bmap(&self, req: &RequestContext, path: &str, blocksize: size_t, idx: &mut u64) -> c_int {
        let values = vec![path.into(), blocksize.into(), (*idx).into()];
        // A non-negative number is the mapped block, a negative one an errno
        self.invoke(Operation::Bmap, req, values, None, |v| match v {
            Value::None => Ok(0),
            Value::Int(n) if n < 0 => Ok(status(n)?),
            v => {
                *idx = coerce("idx", &v)?;
                Ok(0)
            }
        })
    }

    fn ioctl(
        &self,
        req: &RequestContext,
        path: &str,
        cmd: c_uint,
        fi: &FileInfo,
        flags: c_uint,
        data: &mut [u8],
    ) -> c_int {
        let dir = ioc_dir(cmd);
        let size = ioc_size(cmd).min(data.len());
        let input = if dir.contains(IoctlDir::WRITE) {
            Bytes::copy_from_slice(&data[..size])
        } else {
            Bytes::new()
        };

        let file = self.session(Operation::Ioctl, fi);
        let values = vec![path.into(), cmd.into(), input.into(), flags.into()];
        self.call(Operation::Ioctl, req, values, file, |v| {
            if !dir.contains(IoctlDir::READ) {
                return Err(unexpected("status", &v));
            }
            let out = match v {
                Value::Bytes(ref b) => b,
                _ => return Err(unexpected("bytes", &v)),
            };
            let n = out.len().min(size);
            data[..n].copy_from_slice(&out[..n]);
            Ok(0)
        })
    }

    fn poll(
        &self,
        req: &RequestContext,
        path: &str,
        fi: &FileInfo,
        ph: Option<Box<dyn NativePollHandle>>,
        revents: &mut c_uint,
    ) -> c_int {
        let file = self.session(Operation::Poll, fi);
        let handle = ph.map(PollHandle::new);
        let ret = self.simple(Operation::Poll, req, vec![path.into(), handle.into()], file);
        if ret > 0 {
            *revents = PollEvents::from_bits_truncate(ret as u32).bits();
            return 0;
        }
        ret
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::Stat;
    use crate::value::Handle;

    fn bridge(handlers: HandlerSet, version: ApiVersion) -> Bridge {
        Bridge::new(&handlers, version, DispatchMode::Single)
    }

    #[test]
    fn link_targets_are_truncated() {
        let mut buf = [0xffu8; 4];
        copy_link("abcdef", &mut buf);
        assert_eq!(&buf, b"abc\0");

        let mut empty = [0u8; 0];
        copy_link("abc", &mut empty);
    }

    #[test]
    fn handlers_beyond_the_revision_stay_unregistered() {
        let handlers = HandlerSet::new()
            .on(Operation::Getattr, |_| Ok(Value::None))
            .on(Operation::Poll, |_| Ok(Value::None));
        let b = bridge(handlers, ApiVersion::V26);

        assert!(b.is_implemented(Operation::Getattr));
        assert!(!b.is_implemented(Operation::Poll));
        assert!(!b.is_implemented(Operation::Readlink));
    }

    #[test]
    fn unregistered_slot_reports_enosys() {
        let b = bridge(HandlerSet::new(), ApiVersion::CURRENT);
        let mut st = FileStat::default();
        assert_eq!(b.getattr(&RequestContext::default(), "/", &mut st), -(Errno::ENOSYS as c_int));
    }

    #[test]
    fn structured_result_of_a_status_operation_is_invalid() {
        let b = bridge(
            HandlerSet::new().on(Operation::Mkdir, |_| Ok(Value::from("done"))),
            ApiVersion::CURRENT,
        );
        assert_eq!(b.mkdir(&RequestContext::default(), "/d", 0o755), -(Errno::EINVAL as c_int));
    }

    #[test]
    fn out_of_range_status_is_invalid() {
        let b = bridge(
            HandlerSet::new().on(Operation::Unlink, |_| Ok(Value::Int(1 << 40))),
            ApiVersion::CURRENT,
        );
        assert_eq!(b.unlink(&RequestContext::default(), "/f"), -(Errno::EINVAL as c_int));
    }

    #[test]
    fn open_before_revision_22_keeps_no_session() {
        let handlers = HandlerSet::new()
            .on(Operation::Open, |_| Ok(Handle::new(1u8).into()))
            .on(Operation::Read, |args| {
                assert!(args.file().is_none());
                Ok(Value::from(vec![1u8]))
            });
        let b = bridge(handlers, ApiVersion::V21);
        let req = RequestContext::default();

        let mut fi = FileInfo::default();
        assert_eq!(b.open(&req, "/f", &mut fi), -(Errno::EINVAL as c_int));
        assert_eq!(fi.fh, 0);

        let mut buf = [0u8; 4];
        assert_eq!(b.read(&req, "/f", &mut buf, 0, &fi), 1);
    }

    #[test]
    fn cache_hints_need_revision_23() {
        let handlers = HandlerSet::new().on(Operation::Open, |_| {
            Ok(Handle::new(()).keep_cache(true).direct_io(true).into())
        });
        let req = RequestContext::default();

        let mut fi = FileInfo::default();
        assert_eq!(bridge(handlers.clone(), ApiVersion::V22).open(&req, "/f", &mut fi), 0);
        assert!(!fi.keep_cache && !fi.direct_io);
        assert_ne!(fi.fh, 0);

        let mut fi = FileInfo::default();
        assert_eq!(bridge(handlers, ApiVersion::V23).open(&req, "/f", &mut fi), 0);
        assert!(fi.keep_cache && fi.direct_io);
    }

    #[test]
    fn read_longer_than_requested_is_invalid() {
        let b = bridge(
            HandlerSet::new().on(Operation::Read, |_| Ok(Value::from(vec![0u8; 8]))),
            ApiVersion::CURRENT,
        );
        let mut buf = [0u8; 4];
        let ret = b.read(&RequestContext::default(), "/f", &mut buf, 0, &FileInfo::default());
        assert_eq!(ret, -(Errno::EINVAL as c_int));
    }

    #[test]
    fn bmap_results() {
        let b = bridge(
            HandlerSet::new().on(Operation::Bmap, |args| match args.int::<u64>(2)? {
                0 => Ok(Value::Int(-(Errno::EIO as i128))),
                idx => Ok(Value::from(idx * 2)),
            }),
            ApiVersion::CURRENT,
        );
        let req = RequestContext::default();

        let mut idx = 21;
        assert_eq!(b.bmap(&req, "/f", 512, &mut idx), 0);
        assert_eq!(idx, 42);

        let mut idx = 0;
        assert_eq!(b.bmap(&req, "/f", 512, &mut idx), -(Errno::EIO as c_int));
    }

    #[test]
    fn ioctl_directions() {
        const READ_CMD: c_uint = 0x80044500; // _IOR('E', 0, u32)
        const WRITE_CMD: c_uint = 0x40044501; // _IOW('E', 1, u32)

        let b = bridge(
            HandlerSet::new().on(Operation::Ioctl, |args| {
                let cmd = args.int::<c_uint>(1)?;
                let input = args.bytes(2)?;
                if cmd == READ_CMD {
                    assert!(input.is_empty());
                    Ok(Value::from(vec![1u8, 2, 3, 4, 5, 6]))
                } else {
                    assert_eq!(input, &[9, 9, 9, 9]);
                    Ok(Value::None)
                }
            }),
            ApiVersion::CURRENT,
        );
        let (req, fi) = (RequestContext::default(), FileInfo::default());

        let mut data = [0u8; 8];
        assert_eq!(b.ioctl(&req, "/f", READ_CMD, &fi, 0, &mut data), 0);
        assert_eq!(data, [1, 2, 3, 4, 0, 0, 0, 0]);

        let mut data = [9u8; 4];
        assert_eq!(b.ioctl(&req, "/f", WRITE_CMD, &fi, 0, &mut data), 0);
    }

    #[test]
    fn legacy_statfs_reads_namemax() {
        let b = bridge(
            HandlerSet::new().on(Operation::Statfs, |args| {
                assert!(args.is_empty());
                Ok(crate::structs::StatVfs {
                    f_bsize: 1024,
                    f_namemax: 255,
                    ..Default::default()
                }
                .into())
            }),
            ApiVersion::V23,
        );
        let mut st = LegacyStatFs::default();
        assert_eq!(b.statfs(&RequestContext::default(), "/", StatfsBuf::Legacy(&mut st)), 0);
        assert_eq!((st.f_bsize, st.f_namelen), (1024, 255));
    }

    #[test]
    fn getattr_fills_stat() {
        let b = bridge(
            HandlerSet::new().on(Operation::Getattr, |_| {
                Ok(Stat {
                    st_mode: Some(nix::libc::S_IFREG | 0o600),
                    st_nlink: Some(1),
                    st_size: 4097,
                    ..Default::default()
                }
                .into())
            }),
            ApiVersion::CURRENT,
        );
        let mut st = FileStat::default();
        assert_eq!(b.getattr(&RequestContext::default(), "/f", &mut st), 0);
        assert_eq!(st.st_blocks, 9);
        assert_eq!(st.st_blksize, 4096);
    }
}
