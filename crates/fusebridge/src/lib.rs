#![forbid(unsafe_code)]
//! Bridge between a filesystem-request daemon and host-supplied operation handlers.
//!
//! A daemon serving a userspace filesystem calls into a fixed table of callback
//! slots, one per filesystem operation, with native argument and result shapes
//! that changed over several protocol revisions. This crate lets a host implement
//! the filesystem with a set of named handlers instead: each handler receives
//! its arguments as [`Value`]s and returns a [`Value`], and the bridge does the
//! registration, conversion and bookkeeping in between.
//!
//! # Overview
//!
//! 1. Collect handlers in a [`HandlerSet`]; operations without a handler keep
//!    their native slot unregistered
//! 2. Configure a [`Session`] with the handlers, the mount arguments, the dispatch
//!    mode and the protocol revision
//! 3. Run the session against a [`Daemon`]; it returns when the service loop ends
//!
//! # Example
//!
//! ```
//! use fusebridge::{HandlerSet, Operation, Session, Stat, Value, errno::ENOENT};
//! use fusebridge::loopback::Loopback;
//!
//! let handlers = HandlerSet::new().on(Operation::Getattr, |args| match args.path()? {
//!     "/" => Ok(Stat {
//!         st_mode: Some(0o040755),
//!         st_nlink: Some(2),
//!         ..Default::default()
//!     }
//!     .into()),
//!     _ => Err(ENOENT.into()),
//! });
//!
//! let mut daemon = Loopback::new(|client| {
//!     assert_eq!(client.getattr("/").unwrap().st_nlink, 2);
//!     assert_eq!(client.getattr("/nope"), Err(ENOENT));
//!     Ok(())
//! });
//!
//! Session::builder()
//!     .handlers(handlers)
//!     .mount_args(["example", "/mnt"])
//!     .build()?
//!     .run(&mut daemon)?;
//! # Ok::<(), fusebridge::Error>(())
//! ```
//!
//! # Results
//!
//! Every handler result is interpreted the same way first:
//!
//! - `Ok(Value::None)` is success
//! - `Ok(Value::Int(n))` is returned to the daemon as the status `n`
//! - `Err(Error::No(errno))`, or an `io::Error`, fails the call with that errno
//! - any other error is logged and fails the call with `EINVAL`
//!
//! Structured results (records, byte strings, sequences, sessions) are converted
//! per operation: getattr takes a [`Stat`], readdir a sequence of [`DirEntry`],
//! statfs a [`StatVfs`], open a [`Handle`] or [`CacheHints`], and so on.
//!
//! # Open files
//!
//! The value returned by open, opendir or create is kept by the bridge and handed
//! to every later call on the same descriptor through [`Args::file`], up to and
//! including release, after which it is dropped.
//!
//! # Concurrency
//!
//! In multithreaded mode the daemon may call several slots at once; the bridge
//! serializes handler execution so handlers never run concurrently.
#[macro_use]
pub mod utils;
pub mod bridge;
pub mod caps;
pub mod class;
pub mod context;
pub mod dirstream;
pub mod error;
pub mod extract;
pub mod fh;
pub mod handlers;
pub mod loopback;
pub mod marshal;
pub mod native;
pub mod ops;
pub mod session;
pub mod structs;
pub mod value;

pub use crate::bridge::Bridge;
pub use crate::caps::{ApiVersion, Feature, Operation};
pub use crate::class::{Class, ClassKind};
pub use crate::context::DispatchMode;
pub use crate::error::Error;
pub use crate::error::errno;
pub use crate::handlers::{Args, Control, Handler, HandlerSet};
pub use crate::ops::{Daemon, Mount, Notifier, Operations, PollHandle};
pub use crate::session::{Session, SessionBuilder};
pub use crate::structs::{DirEntry, Flock, Stat, StatVfs, Timespec};
pub use crate::utils::Result;
pub use crate::value::{CacheHints, Handle, Record, Value};
