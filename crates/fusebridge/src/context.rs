//! Execution context around dispatched calls.
//!
//! Every slot enters the handler environment before it touches a handler and
//! leaves it on all exit paths. With a concurrent daemon the environment is
//! exclusive, so handlers never run in parallel with each other.

use parking_lot::{Mutex, MutexGuard};

/// How the daemon dispatches calls.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum DispatchMode {
    /// All calls come from the loop thread
    #[default]
    Single,
    /// Calls may arrive from several daemon worker threads at once
    Concurrent,
}

impl DispatchMode {
    pub fn from_multithreaded(multithreaded: bool) -> DispatchMode {
        if multithreaded {
            DispatchMode::Concurrent
        } else {
            DispatchMode::Single
        }
    }
}

/// The handler environment of a session.
#[derive(Debug, Default)]
pub struct Environment {
    mode: DispatchMode,
    lock: Mutex<()>,
}

/// Guard of an entered environment; leaving happens on drop.
#[must_use = "the environment is left as soon as the scope is dropped"]
pub struct Scope<'a> {
    _guard: Option<MutexGuard<'a, ()>>,
}

impl Environment {
    pub fn new(mode: DispatchMode) -> Environment {
        Environment {
            mode,
            lock: Mutex::new(()),
        }
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    /// Enter the environment for the duration of one call.
    pub fn enter(&self) -> Scope<'_> {
        let guard = match self.mode {
            DispatchMode::Single => None,
            DispatchMode::Concurrent => Some(self.lock.lock()),
        };
        Scope { _guard: guard }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn concurrent_mode_is_exclusive() {
        let env = Arc::new(Environment::new(DispatchMode::Concurrent));
        let inside = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let (env, inside, peak) = (env.clone(), inside.clone(), peak.clone());
                thread::spawn(move || {
                    for _ in 0..20 {
                        let _scope = env.enter();
                        let n = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(n, Ordering::SeqCst);
                        thread::sleep(Duration::from_micros(50));
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for w in workers {
            w.join().unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn single_mode_is_reentrant() {
        let env = Environment::new(DispatchMode::Single);
        let _outer = env.enter();
        let _inner = env.enter();
    }
}
