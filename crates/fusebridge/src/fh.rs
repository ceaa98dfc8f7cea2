//! Open-file sessions.
//!
//! The value returned by open, opendir or create is kept in a table keyed by the
//! number stored in the native file-info's `fh`. Every later handle-aware call
//! looks the session up by that number; release takes it out again.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use log::{trace, warn};
use parking_lot::Mutex;

use crate::native::FileInfo;
use crate::value::{CacheHints, Value};

/// What to do with the result of an open-like handler.
#[derive(Debug, PartialEq)]
pub enum OpenResult {
    /// Nothing to retain; the descriptor runs without a session
    Disposable(Option<CacheHints>),
    /// Retain the value as the descriptor's session
    Session(Value, CacheHints),
}

impl OpenResult {
    /// Classify a structured open result.
    ///
    /// Cache hints, `None` and integers are disposable. Anything else becomes the
    /// session; records and handles may carry `keep_cache`/`direct_io`.
    pub fn interpret(v: Value) -> OpenResult {
        match v {
            Value::CacheHints(h) => OpenResult::Disposable(Some(h)),
            Value::None | Value::Int(_) => OpenResult::Disposable(None),
            v => {
                let hints = CacheHints {
                    keep_cache: v.attr("keep_cache").is_some_and(|f| f.truthy()),
                    direct_io: v.attr("direct_io").is_some_and(|f| f.truthy()),
                };
                OpenResult::Session(v, hints)
            }
        }
    }
}

/// Sessions of the descriptors currently open.
#[derive(Debug)]
pub struct FileTable {
    next: AtomicU64,
    sessions: Mutex<HashMap<u64, Value>>,
}

impl Default for FileTable {
    fn default() -> Self {
        FileTable::new()
    }
}

impl FileTable {
    pub fn new() -> FileTable {
        FileTable {
            // 0 marks a descriptor without a session
            next: AtomicU64::new(1),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Bind `session` to the descriptor described by `fi`.
    ///
    /// A descriptor holds at most one session: if `fi` already carries one, it is
    /// replaced and the old value dropped.
    pub fn attach(&self, fi: &mut FileInfo, session: Value) {
        let fh = self.next.fetch_add(1, Ordering::Relaxed);
        let mut sessions = self.sessions.lock();
        if fi.fh != 0 && sessions.remove(&fi.fh).is_some() {
            warn!("descriptor {} reopened, dropping its previous session", fi.fh);
        }
        sessions.insert(fh, session);
        fi.fh = fh;
        trace!("attached session {fh}");
    }

    /// The session of the descriptor, if any.
    pub fn get(&self, fi: &FileInfo) -> Option<Value> {
        if fi.fh == 0 {
            return None;
        }
        self.sessions.lock().get(&fi.fh).cloned()
    }

    /// Take the session out of the table. A second detach of the same
    /// descriptor yields `None`.
    pub fn detach(&self, fi: &mut FileInfo) -> Option<Value> {
        if fi.fh == 0 {
            return None;
        }
        let session = self.sessions.lock().remove(&fi.fh);
        trace!("detached session {}", fi.fh);
        fi.fh = 0;
        session
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Drop every remaining session.
    pub fn clear(&self) -> usize {
        let mut sessions = self.sessions.lock();
        let n = sessions.len();
        sessions.clear();
        n
    }
}
