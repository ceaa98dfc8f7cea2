//! Session setup and the service loop.

use std::ffi::CString;
use std::sync::Arc;

use log::{error, info, warn};

use crate::bridge::Bridge;
use crate::caps::{ApiVersion, Feature};
use crate::context::DispatchMode;
use crate::error::Error;
use crate::handlers::{Control, HandlerSet};
use crate::ops::Daemon;
use crate::utils::{Result, to_argv};

/// Configuration of a [`Session`].
#[derive(Debug, Default)]
pub struct SessionBuilder {
    handlers: HandlerSet,
    mount_args: Vec<String>,
    multithreaded: bool,
    api_version: Option<ApiVersion>,
    required: Vec<Feature>,
}

impl SessionBuilder {
    pub fn handlers(mut self, handlers: HandlerSet) -> SessionBuilder {
        self.handlers = handlers;
        self
    }

    /// Arguments handed to the daemon, program name first.
    pub fn mount_args<I, S>(mut self, args: I) -> SessionBuilder
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mount_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn multithreaded(mut self, multithreaded: bool) -> SessionBuilder {
        self.multithreaded = multithreaded;
        self
    }

    /// Protocol revision. Defaults to `FUSEBRIDGE_API_VERSION`, or the newest one.
    pub fn api_version(mut self, version: ApiVersion) -> SessionBuilder {
        self.api_version = Some(version);
        self
    }

    /// Features the filesystem cannot do without.
    pub fn require<I>(mut self, features: I) -> SessionBuilder
    where
        I: IntoIterator<Item = Feature>,
    {
        self.required.extend(features);
        self
    }

    /// Validate the configuration and resolve the handler set.
    ///
    /// Fails before anything reaches the daemon if the mount arguments are empty
    /// or unrepresentable, or if the requested revision is not supported or lacks
    /// a [required](SessionBuilder::require) feature.
    pub fn build(self) -> Result<Session> {
        let argv = to_argv(&self.mount_args)?;
        let version = match self.api_version {
            Some(v) => v,
            None => ApiVersion::from_env()?,
        };
        version.check(&self.required)?;
        version.check(self.handlers.required())?;
        let mode = DispatchMode::from_multithreaded(self.multithreaded);

        Ok(Session {
            argv,
            mode,
            bridge: Arc::new(Bridge::new(&self.handlers, version, mode)),
        })
    }
}

/// One run of a filesystem: registration, service loop, teardown.
pub struct Session {
    argv: Vec<CString>,
    mode: DispatchMode,
    bridge: Arc<Bridge>,
}

impl Session {
    pub fn builder() -> SessionBuilder {
        SessionBuilder::default()
    }

    pub fn bridge(&self) -> &Arc<Bridge> {
        &self.bridge
    }

    /// Auxiliary entry points; usable from outside handlers too.
    pub fn control(&self) -> Control {
        self.bridge.control().clone()
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    /// Mount through `daemon` and serve until the loop ends.
    ///
    /// Setup failures are reported as [`Error::Setup`]; a failing loop is torn down
    /// and reported as [`Error::Loop`].
    pub fn run<D: Daemon + ?Sized>(self, daemon: &mut D) -> Result<()> {
        info!(
            "Mounting {:?}, API version {}, {:?} dispatch",
            self.argv.first(),
            self.bridge.profile().version(),
            self.mode
        );

        let mut mount = daemon.setup(&self.argv, self.bridge.clone()).map_err(|e| {
            error!("setup: {e}");
            Error::Setup
        })?;
        self.bridge.control().attach(mount.notifier());

        let ret = mount.run(self.mode);
        mount.teardown();

        let leaked = self.bridge.close_all();
        if leaked > 0 {
            warn!("{leaked} sessions were never released");
        }

        match ret {
            Ok(()) => {
                info!("Service loop finished");
                Ok(())
            }
            Err(e) => {
                error!("service loop: {e}");
                res!(Error::Loop)
            }
        }
    }
}
