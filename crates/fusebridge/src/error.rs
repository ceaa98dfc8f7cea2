//! Bridge error representations.
//!
//! Failures inside a dispatched call never leave the adapter: they are reduced to a
//! negative errno and handed back to the daemon. Only session setup and the service
//! loop surface an [`Error`] to the launcher.

use std::io;
use std::io::ErrorKind::*;

use crate::caps::Operation;
use crate::marshal::MarshalError;

pub use nix::errno::Errno;

fn errno_from_ioerror(e: &io::Error) -> Errno {
    e.raw_os_error()
        .map(Errno::from_raw)
        .unwrap_or_else(|| match e.kind() {
            NotFound => Errno::ENOENT,
            PermissionDenied => Errno::EPERM,
            ConnectionRefused => Errno::ECONNREFUSED,
            ConnectionReset => Errno::ECONNRESET,
            ConnectionAborted => Errno::ECONNABORTED,
            NotConnected => Errno::ENOTCONN,
            AddrInUse => Errno::EADDRINUSE,
            AddrNotAvailable => Errno::EADDRNOTAVAIL,
            BrokenPipe => Errno::EPIPE,
            AlreadyExists => Errno::EEXIST,
            WouldBlock => Errno::EAGAIN,
            InvalidInput | InvalidData => Errno::EINVAL,
            TimedOut => Errno::ETIMEDOUT,
            WriteZero => Errno::EAGAIN,
            Interrupted => Errno::EINTR,
            _ => Errno::EIO,
        })
}

/// Error type shared by handlers and the session API.
///
/// Handlers report a POSIX error by returning `Err(Error::No(errno))` or by
/// propagating an `io::Error`; both reach the daemon as the negative errno. Any
/// other variant returned from a handler is logged and the call fails with
/// `-EINVAL`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// System error containing an errno.
    #[error("{0}")]
    No(#[from] Errno),

    /// I/O error.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// A value did not fit the native shape it was marshaled into.
    #[error(transparent)]
    Marshal(#[from] MarshalError),

    /// Handler execution failed without an errno.
    #[error("handler failed: {0}")]
    Handler(String),

    /// A handler was registered under a name no operation answers to.
    #[error("unknown operation `{0}`")]
    UnknownOperation(String),

    /// A class method was given for an operation outside its descriptor kind.
    #[error("`{0}` cannot be routed to a descriptor class")]
    NotRoutable(Operation),

    /// The requested protocol revision is out of range, or lacks a required feature.
    #[error("API version {0} is not supported")]
    UnsupportedVersion(u32),

    /// Mount arguments could not be handed to the daemon.
    #[error("invalid mount arguments: {0}")]
    InvalidArgs(String),

    /// The daemon refused to initialize the filesystem.
    #[error("filesystem initialization failed")]
    Setup,

    /// The daemon's service loop terminated with an error.
    #[error("service loop failed")]
    Loop,
}

impl Error {
    /// Build a handler failure from anything printable.
    pub fn handler(msg: impl ToString) -> Self {
        Error::Handler(msg.to_string())
    }

    /// Get an errno representation.
    pub fn errno(&self) -> Errno {
        match *self {
            Error::No(e) => e,
            Error::Io(ref e) => errno_from_ioerror(e),
            Error::Marshal(_) | Error::Handler(_) | Error::InvalidArgs(_) => Errno::EINVAL,
            Error::UnknownOperation(_) => Errno::ENOSYS,
            Error::NotRoutable(_) => Errno::EINVAL,
            Error::UnsupportedVersion(_) => Errno::EPROTO,
            Error::Setup | Error::Loop => Errno::EIO,
        }
    }

    /// Whether the error carries a POSIX error the handler meant to report.
    ///
    /// These are passed through to the daemon instead of being collapsed into the
    /// generic failure code.
    pub fn is_errno(&self) -> bool {
        matches!(self, Error::No(_) | Error::Io(_))
    }
}

impl<'a> From<&'a io::Error> for Error {
    fn from(e: &'a io::Error) -> Self {
        Error::No(errno_from_ioerror(e))
    }
}

/// Errno values re-exported for handler code.
pub mod errno {
    pub use nix::errno::Errno::*;
}
