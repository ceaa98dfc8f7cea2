//! Handler sets and the arguments handlers receive.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use nix::libc::c_int;
use num_traits::FromPrimitive;

use crate::caps::{ApiVersion, Feature, Operation};
use crate::class::Class;
use crate::error::{Error, Errno};
use crate::marshal::{MarshalError, coerce};
use crate::native::RequestContext;
use crate::ops::{Notifier, PollHandle};
use crate::utils::Result;
use crate::value::{Handle, Value};

/// A host-supplied operation handler.
pub type Handler = Arc<dyn Fn(&Args) -> Result<Value> + Send + Sync>;

/// Named operation handlers supplied by the host.
///
/// Operations without a handler leave their native slot unregistered, so the
/// daemon falls back to its own default behaviour for them.
///
/// # Example
///
/// ```
/// use fusebridge::{HandlerSet, Operation, Value, errno::ENOENT};
///
/// let handlers = HandlerSet::new()
///     .on(Operation::Getattr, |args| match args.path()? {
///         "/" => Ok(fusebridge::Stat {
///             st_mode: Some(0o040755),
///             st_nlink: Some(2),
///             ..Default::default()
///         }
///         .into()),
///         _ => Err(ENOENT.into()),
///     })
///     .on_name("readlink", |_| Ok(Value::from("target")))
///     .unwrap();
///
/// assert!(handlers.contains(Operation::Readlink));
/// ```
#[derive(Clone, Default)]
pub struct HandlerSet {
    handlers: BTreeMap<Operation, Handler>,
    required: Vec<Feature>,
}

impl HandlerSet {
    pub fn new() -> HandlerSet {
        HandlerSet::default()
    }

    /// Add a handler for `op`, replacing any previous one.
    pub fn on<F>(mut self, op: Operation, f: F) -> HandlerSet
    where
        F: Fn(&Args) -> Result<Value> + Send + Sync + 'static,
    {
        self.insert(op, f);
        self
    }

    /// Add a handler by operation name. Unknown names are an error.
    pub fn on_name<F>(self, name: &str, f: F) -> Result<HandlerSet>
    where
        F: Fn(&Args) -> Result<Value> + Send + Sync + 'static,
    {
        let op = name.parse()?;
        Ok(self.on(op, f))
    }

    pub fn insert<F>(&mut self, op: Operation, f: F)
    where
        F: Fn(&Args) -> Result<Value> + Send + Sync + 'static,
    {
        self.handlers.insert(op, Arc::new(f));
    }

    /// Route the open-like operations and the calls made on their descriptors
    /// through `class`. Fails if `class` has a method for an operation that does
    /// not act on a descriptor of its kind.
    pub fn class<T>(mut self, class: Class<T>) -> Result<HandlerSet>
    where
        T: std::any::Any + Send + Sync,
    {
        class.install(&mut self)?;
        Ok(self)
    }

    /// Note a feature the handlers depend on. Checked when the session is built.
    pub fn require(&mut self, feature: Feature) {
        if !self.required.contains(&feature) {
            self.required.push(feature);
        }
    }

    pub fn required(&self) -> &[Feature] {
        &self.required
    }

    pub fn get(&self, op: Operation) -> Option<&Handler> {
        self.handlers.get(&op)
    }

    pub fn contains(&self, op: Operation) -> bool {
        self.handlers.contains_key(&op)
    }

    pub fn operations(&self) -> impl Iterator<Item = Operation> + '_ {
        self.handlers.keys().copied()
    }
}

impl fmt::Debug for HandlerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.operations().map(Operation::name)).finish()
    }
}

/// Auxiliary entry points available to handlers while a session runs.
#[derive(Clone)]
pub struct Control {
    version: ApiVersion,
    notifier: Arc<OnceLock<Arc<dyn Notifier>>>,
}

impl Control {
    pub(crate) fn new(version: ApiVersion) -> Control {
        Control {
            version,
            notifier: Arc::new(OnceLock::new()),
        }
    }

    /// Connect the running mount. Only the first call has an effect.
    pub(crate) fn attach(&self, notifier: Arc<dyn Notifier>) {
        let _ = self.notifier.set(notifier);
    }

    /// Revision the session runs at.
    pub fn api_version(&self) -> ApiVersion {
        self.version
    }

    /// Drop cached data for `path`. Fails with `ENOTCONN` before the mount is up.
    pub fn invalidate(&self, path: &str) -> Result<()> {
        let notifier = self.notifier.get().ok_or(Errno::ENOTCONN)?;
        check(notifier.invalidate(path))
    }

    /// Wake up whoever waits on `handle`.
    pub fn notify_poll(&self, handle: &PollHandle) -> Result<()> {
        check(handle.notify())
    }
}

impl fmt::Debug for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Control")
            .field("version", &self.version)
            .field("mounted", &self.notifier.get().is_some())
            .finish()
    }
}

fn check(ret: c_int) -> Result<()> {
    if ret < 0 {
        return res!(Errno::from_raw(-ret));
    }
    Ok(())
}

/// Arguments of one handler invocation.
///
/// Positional values follow the native argument order of the operation, starting
/// with the path. The session attached by open, opendir or create is available
/// separately through [`Args::file`].
#[derive(Debug)]
pub struct Args {
    op: Operation,
    values: Vec<Value>,
    file: Option<Value>,
    context: RequestContext,
    control: Control,
}

impl Args {
    pub(crate) fn new(
        op: Operation,
        values: Vec<Value>,
        file: Option<Value>,
        context: RequestContext,
        control: Control,
    ) -> Args {
        Args {
            op,
            values,
            file,
            context,
            control,
        }
    }

    /// Operation being served.
    pub fn op(&self) -> Operation {
        self.op
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<&Value> {
        self.values.get(i)
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    fn arg(&self, i: usize) -> Result<&Value> {
        self.values
            .get(i)
            .ok_or_else(|| Error::Marshal(MarshalError::Missing("argument")))
    }

    /// First argument, the path the operation applies to.
    pub fn path(&self) -> Result<&str> {
        self.str(0)
    }

    pub fn str(&self, i: usize) -> Result<&str> {
        let v = self.arg(i)?;
        v.as_str().ok_or_else(|| {
            Error::Marshal(MarshalError::Shape {
                expected: "string",
                found: v.type_name(),
            })
        })
    }

    pub fn int<T: FromPrimitive>(&self, i: usize) -> Result<T> {
        Ok(coerce("argument", self.arg(i)?)?)
    }

    pub fn bytes(&self, i: usize) -> Result<&[u8]> {
        let v = self.arg(i)?;
        v.as_bytes().ok_or_else(|| {
            Error::Marshal(MarshalError::Shape {
                expected: "bytes",
                found: v.type_name(),
            })
        })
    }

    /// Session value of the descriptor, when the operation carries one.
    pub fn file(&self) -> Option<&Value> {
        self.file.as_ref()
    }

    /// The session as a [`Handle`], if that is what open returned.
    pub fn handle(&self) -> Option<&Handle> {
        self.file.as_ref().and_then(Value::as_handle)
    }

    /// Identity of the process that issued the request.
    pub fn context(&self) -> RequestContext {
        self.context
    }

    pub fn control(&self) -> &Control {
        &self.control
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: Vec<Value>) -> Args {
        Args::new(
            Operation::Read,
            values,
            None,
            RequestContext::default(),
            Control::new(ApiVersion::CURRENT),
        )
    }

    #[test]
    fn positional_accessors() {
        let a = args(vec!["/f".into(), 4096u64.into(), Value::from(vec![1u8, 2])]);
        assert_eq!(a.path().unwrap(), "/f");
        assert_eq!(a.int::<usize>(1).unwrap(), 4096);
        assert_eq!(a.bytes(2).unwrap(), &[1, 2]);
        assert!(a.str(1).is_err());
        assert!(a.int::<u32>(7).is_err());
        assert!(a.file().is_none());
    }

    #[test]
    fn unknown_handler_name() {
        let e = HandlerSet::new().on_name("frob", |_| Ok(Value::None)).unwrap_err();
        assert!(matches!(e, Error::UnknownOperation(ref n) if n == "frob"));
    }

    #[test]
    fn invalidate_before_mount() {
        let c = Control::new(ApiVersion::CURRENT);
        let e = c.invalidate("/").unwrap_err();
        assert_eq!(e.errno(), Errno::ENOTCONN);
    }
}
