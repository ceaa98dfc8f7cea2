//! Per-descriptor classes.
//!
//! A class bundles the constructor run by the open-like operations with methods
//! for the calls made on the resulting descriptor. The constructed value is kept
//! as the descriptor's session, and each method receives it typed, so handlers
//! never downcast a [`Handle`] themselves.
//!
//! ```
//! use std::sync::atomic::{AtomicU64, Ordering};
//! use fusebridge::{Class, HandlerSet, Operation, Value};
//!
//! struct Counter(AtomicU64);
//!
//! let handlers = HandlerSet::new()
//!     .class(
//!         Class::file(|_| Ok(Counter(AtomicU64::new(0))))
//!             .on(Operation::Read, |c: &Counter, _| {
//!                 let n = c.0.fetch_add(1, Ordering::SeqCst);
//!                 Ok(Value::from(n.to_string().into_bytes()))
//!             }),
//!     )
//!     .unwrap();
//!
//! assert!(handlers.contains(Operation::Open));
//! assert!(handlers.contains(Operation::Create));
//! assert!(!handlers.contains(Operation::Write));
//! ```

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::caps::{Feature, Operation};
use crate::error::{Errno, Error};
use crate::handlers::{Args, HandlerSet};
use crate::utils::Result;
use crate::value::{CacheHints, Handle, Value};

type Init<T> = Arc<dyn Fn(&Args) -> Result<T> + Send + Sync>;
type Method<T> = Arc<dyn Fn(&T, &Args) -> Result<Value> + Send + Sync>;
type Hints<T> = Arc<dyn Fn(&T) -> CacheHints + Send + Sync>;

/// Which descriptors a class describes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ClassKind {
    File,
    Dir,
}

impl ClassKind {
    /// Operations that construct the value.
    pub fn constructors(self) -> &'static [Operation] {
        match self {
            ClassKind::File => &[Operation::Open, Operation::Create],
            ClassKind::Dir => &[Operation::Opendir],
        }
    }

    /// Operations that may be routed to the value.
    pub fn methods(self) -> &'static [Operation] {
        use Operation::*;
        match self {
            ClassKind::File => &[Read, Write, Fsync, Release, Flush, Fgetattr, Ftruncate, Lock],
            ClassKind::Dir => &[Readdir, Fsyncdir, Releasedir],
        }
    }

    /// Feature the revision must provide for the value to reach the methods.
    pub fn feature(self) -> Feature {
        match self {
            ClassKind::File => Feature::StatefulFiles,
            ClassKind::Dir => Feature::StatefulDirs,
        }
    }
}

/// Constructor and methods of a per-descriptor type `T`.
pub struct Class<T> {
    kind: ClassKind,
    init: Init<T>,
    hints: Option<Hints<T>>,
    methods: Vec<(Operation, Method<T>)>,
}

impl<T: Any + Send + Sync> Class<T> {
    /// A file class. `init` runs for open and create.
    pub fn file<F>(init: F) -> Class<T>
    where
        F: Fn(&Args) -> Result<T> + Send + Sync + 'static,
    {
        Class::new(ClassKind::File, init)
    }

    /// A directory class. `init` runs for opendir.
    pub fn dir<F>(init: F) -> Class<T>
    where
        F: Fn(&Args) -> Result<T> + Send + Sync + 'static,
    {
        Class::new(ClassKind::Dir, init)
    }

    fn new<F>(kind: ClassKind, init: F) -> Class<T>
    where
        F: Fn(&Args) -> Result<T> + Send + Sync + 'static,
    {
        Class {
            kind,
            init: Arc::new(init),
            hints: None,
            methods: Vec::new(),
        }
    }

    pub fn kind(&self) -> ClassKind {
        self.kind
    }

    /// Route `op` on descriptors of this class to `f`.
    pub fn on<F>(mut self, op: Operation, f: F) -> Class<T>
    where
        F: Fn(&T, &Args) -> Result<Value> + Send + Sync + 'static,
    {
        self.methods.retain(|(o, _)| *o != op);
        self.methods.push((op, Arc::new(f)));
        self
    }

    /// Cache behaviour requested for each constructed value.
    pub fn hints<F>(mut self, f: F) -> Class<T>
    where
        F: Fn(&T) -> CacheHints + Send + Sync + 'static,
    {
        self.hints = Some(Arc::new(f));
        self
    }

    /// Install the constructor and methods into `set`, replacing any handlers
    /// already registered for those operations.
    pub(crate) fn install(self, set: &mut HandlerSet) -> Result<()> {
        let allowed = self.kind.methods();
        if let Some((op, _)) = self.methods.iter().find(|(op, _)| !allowed.contains(op)) {
            return res!(Error::NotRoutable(*op));
        }

        for &op in self.kind.constructors() {
            let init = self.init.clone();
            let hints = self.hints.clone();
            set.insert(op, move |args| {
                let state = init(args)?;
                let hints = hints.as_ref().map(|h| h(&state)).unwrap_or_default();
                Ok(Handle::new(state)
                    .keep_cache(hints.keep_cache)
                    .direct_io(hints.direct_io)
                    .into())
            });
        }

        for (op, method) in self.methods {
            set.insert(op, move |args| {
                let state = args
                    .handle()
                    .and_then(|h| h.downcast_ref::<T>())
                    .ok_or(Errno::EBADF)?;
                method(state, args)
            });
        }

        set.require(self.kind.feature());
        Ok(())
    }
}

impl<T> fmt::Debug for Class<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class")
            .field("kind", &self.kind)
            .field(
                "methods",
                &self.methods.iter().map(|(op, _)| op.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
