//! Handler-side values.
//!
//! Handlers are dynamically shaped: a call receives positional [`Value`]s and
//! returns one. The bridge interprets the returned value with a fixed protocol:
//! `None` is success, an `Int` is the status code itself, anything else is a
//! structured result to be extracted into the native reply.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::marshal::MarshalError;
use crate::ops::PollHandle;
use crate::utils::Result;

type DynIter = Box<dyn Iterator<Item = Result<Value>> + Send>;

/// A value exchanged with handlers.
#[derive(Clone, Debug, Default)]
pub enum Value {
    /// The explicit empty result
    #[default]
    None,
    Bool(bool),
    /// Wide enough for every signed and unsigned 64-bit native field
    Int(i128),
    Float(f64),
    Str(String),
    Bytes(Bytes),
    Seq(Vec<Value>),
    /// Named fields, the attribute-object form of structured results
    Record(Record),
    /// A lazily produced sequence
    Iter(ValueIter),
    /// Opaque per-descriptor state returned from open, opendir or create
    Handle(Handle),
    /// Disposable open result: carries cache flags but is never retained
    CacheHints(CacheHints),
    Poll(PollHandle),
}

impl Value {
    /// Name of the variant, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::Seq(_) => "sequence",
            Value::Record(_) => "record",
            Value::Iter(_) => "iterator",
            Value::Handle(_) => "handle",
            Value::CacheHints(_) => "cache hints",
            Value::Poll(_) => "poll handle",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Raw bytes of a `Bytes` or `Str` value.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            Value::Str(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    pub fn as_handle(&self) -> Option<&Handle> {
        match self {
            Value::Handle(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_poll(&self) -> Option<&PollHandle> {
        match self {
            Value::Poll(p) => Some(p),
            _ => None,
        }
    }

    /// Look up a named attribute.
    ///
    /// Records answer with their fields; handles and cache hints expose their cache
    /// flags as `keep_cache` and `direct_io`.
    pub fn attr(&self, name: &str) -> Option<Value> {
        let hints = match self {
            Value::Record(r) => return r.get(name).cloned(),
            Value::Handle(h) => h.hints(),
            Value::CacheHints(c) => *c,
            _ => return None,
        };

        match name {
            "keep_cache" => Some(Value::Bool(hints.keep_cache)),
            "direct_io" => Some(Value::Bool(hints.direct_io)),
            _ => None,
        }
    }

    /// Whether the value is "true" in the handler sense.
    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Bytes(b) => !b.is_empty(),
            Value::Seq(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// A lazily evaluated sequence.
    pub fn iter<I>(items: I) -> Value
    where
        I: IntoIterator,
        I::Item: Into<Value>,
        I::IntoIter: Send + 'static,
    {
        Value::try_iter(items.into_iter().map(|v| Ok(v.into())))
    }

    /// A lazily evaluated sequence whose production can fail midway.
    pub fn try_iter<I>(items: I) -> Value
    where
        I: IntoIterator<Item = Result<Value>>,
        I::IntoIter: Send + 'static,
    {
        Value::Iter(ValueIter(Arc::new(Mutex::new(Box::new(items.into_iter())))))
    }

    /// Iterate over a `Seq` or `Iter` value.
    pub fn into_values(self) -> ::std::result::Result<DynIter, MarshalError> {
        match self {
            Value::Seq(items) => Ok(Box::new(items.into_iter().map(Ok))),
            Value::Iter(it) => Ok(Box::new(it)),
            other => Err(MarshalError::Shape {
                expected: "iterable",
                found: other.type_name(),
            }),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Seq(a), Value::Seq(b)) => a == b,
            (Value::Record(a), Value::Record(b)) => a == b,
            (Value::Iter(a), Value::Iter(b)) => a.ptr_eq(b),
            (Value::Handle(a), Value::Handle(b)) => a.ptr_eq(b),
            (Value::CacheHints(a), Value::CacheHints(b)) => a == b,
            (Value::Poll(a), Value::Poll(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

macro_rules! value_from_int {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Value {
                    Value::Int(v as i128)
                }
            }
        )*
    };
}

value_from_int!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl From<f64> for Value {
    fn from(v: f64) -> Value {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Value {
        Value::Bool(v)
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Value {
        Value::None
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Value {
        Value::Str(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Value {
        Value::Str(v)
    }
}

impl From<Bytes> for Value {
    fn from(v: Bytes) -> Value {
        Value::Bytes(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Value {
        Value::Bytes(Bytes::from(v))
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Value {
        Value::Bytes(Bytes::copy_from_slice(v))
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Value {
        Value::Seq(v)
    }
}

impl From<Record> for Value {
    fn from(v: Record) -> Value {
        Value::Record(v)
    }
}

impl From<Handle> for Value {
    fn from(v: Handle) -> Value {
        Value::Handle(v)
    }
}

impl From<CacheHints> for Value {
    fn from(v: CacheHints) -> Value {
        Value::CacheHints(v)
    }
}

impl From<PollHandle> for Value {
    fn from(v: PollHandle) -> Value {
        Value::Poll(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Value {
        v.map_or(Value::None, Into::into)
    }
}

/// Named fields of a structured value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Record(BTreeMap<String, Value>);

impl Record {
    pub fn new() -> Record {
        Record(BTreeMap::new())
    }

    /// Builder-style insertion.
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Record {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        self.0.insert(name.to_owned(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Record {
        Record(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// A lazy sequence shared between clones of the value that carries it.
#[derive(Clone)]
pub struct ValueIter(Arc<Mutex<DynIter>>);

impl ValueIter {
    pub fn ptr_eq(&self, other: &ValueIter) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Iterator for ValueIter {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        self.0.lock().next()
    }
}

impl fmt::Debug for ValueIter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ValueIter(..)")
    }
}

/// Cache behaviour an open-like handler asks the daemon to apply.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheHints {
    pub keep_cache: bool,
    pub direct_io: bool,
}

/// Opaque state a handler attaches to an open descriptor.
///
/// The bridge keeps the handle alive from the open-like call that returned it until
/// the matching release, and passes the very same handle to every call in between.
#[derive(Clone)]
pub struct Handle {
    state: Arc<dyn Any + Send + Sync>,
    hints: CacheHints,
}

impl Handle {
    pub fn new<T: Any + Send + Sync>(state: T) -> Handle {
        Handle::from_arc(Arc::new(state))
    }

    pub fn from_arc<T: Any + Send + Sync>(state: Arc<T>) -> Handle {
        Handle {
            state,
            hints: CacheHints::default(),
        }
    }

    pub fn keep_cache(mut self, keep: bool) -> Handle {
        self.hints.keep_cache = keep;
        self
    }

    pub fn direct_io(mut self, direct: bool) -> Handle {
        self.hints.direct_io = direct;
        self
    }

    pub fn hints(&self) -> CacheHints {
        self.hints
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        (*self.state).downcast_ref::<T>()
    }

    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.state.clone().downcast::<T>().ok()
    }

    /// Identity comparison: true if both refer to the same state object.
    pub fn ptr_eq(&self, other: &Handle) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.state), Arc::as_ptr(&other.state))
    }

    /// Number of live references to the state, the bridge's included.
    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.state)
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("state", &Arc::as_ptr(&self.state))
            .field("hints", &self.hints)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_identity_survives_clone() {
        let a = Handle::new(7u32);
        let b = a.clone();
        let c = Handle::new(7u32);

        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&c));
        assert_eq!(a.downcast_ref::<u32>(), Some(&7));
        assert_eq!(a.strong_count(), 2);
    }

    #[test]
    fn attributes_of_handles_and_records() {
        let h = Value::from(Handle::new(()).keep_cache(true));
        assert_eq!(h.attr("keep_cache"), Some(Value::Bool(true)));
        assert_eq!(h.attr("direct_io"), Some(Value::Bool(false)));
        assert_eq!(h.attr("st_mode"), None);

        let r = Value::from(Record::new().with("st_mode", 0o644u32));
        assert_eq!(r.attr("st_mode"), Some(Value::Int(0o644)));
        assert_eq!(Value::Int(3).attr("st_mode"), None);
    }

    #[test]
    fn lazy_iterators_are_shared_and_consumed_once() {
        let v = Value::iter(vec![1, 2, 3]);
        let mut first = v.clone().into_values().unwrap();
        assert_eq!(first.next().unwrap().unwrap(), Value::Int(1));

        let rest: Vec<_> = v.into_values().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(rest, vec![Value::Int(2), Value::Int(3)]);
    }

    #[test]
    fn scalars_are_not_iterable() {
        assert!(Value::Int(1).into_values().is_err());
        assert!(Value::from("abc").into_values().is_err());
    }
}
