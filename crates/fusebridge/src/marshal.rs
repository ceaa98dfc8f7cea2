//! Checked conversion between handler values and native fixed-width fields.

use nix::libc::c_int;
use num_traits::FromPrimitive;

use crate::value::Value;

/// A handler value that cannot be written into its native destination.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum MarshalError {
    #[error("missing field `{0}`")]
    Missing(&'static str),

    #[error("field `{field}` is not numeric (found {found})")]
    NotNumeric {
        field: &'static str,
        found: &'static str,
    },

    #[error("field `{field}`: {value} does not fit the native type")]
    OutOfRange { field: &'static str, value: String },

    #[error("expected {expected}, found {found}")]
    Shape {
        expected: &'static str,
        found: &'static str,
    },
}

/// Coerce a handler value into the native numeric type `T`.
///
/// Integers must be representable in `T`; negative values never fit an unsigned
/// target. Floats are truncated toward zero and then range checked. Booleans and
/// every non-numeric variant are rejected.
pub fn coerce<T: FromPrimitive>(field: &'static str, v: &Value) -> Result<T, MarshalError> {
    match *v {
        Value::Int(n) => T::from_i128(n).ok_or_else(|| MarshalError::OutOfRange {
            field,
            value: n.to_string(),
        }),
        Value::Float(f) => T::from_f64(f.trunc()).ok_or_else(|| MarshalError::OutOfRange {
            field,
            value: f.to_string(),
        }),
        ref other => Err(MarshalError::NotNumeric {
            field,
            found: other.type_name(),
        }),
    }
}

/// Like [`coerce`], but an absent value or an explicit `None` yields `Ok(None)`.
pub fn coerce_soft<T: FromPrimitive>(
    field: &'static str,
    v: Option<&Value>,
) -> Result<Option<T>, MarshalError> {
    match v {
        None | Some(Value::None) => Ok(None),
        Some(v) => coerce(field, v).map(Some),
    }
}

/// Turn an integer handler result into the status returned to the daemon.
pub fn status(n: i128) -> Result<c_int, MarshalError> {
    c_int::from_i128(n).ok_or_else(|| MarshalError::OutOfRange {
        field: "status",
        value: n.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::libc::{mode_t, off_t, uid_t};

    #[test]
    fn integers_within_range() {
        assert_eq!(coerce::<mode_t>("st_mode", &Value::Int(0o100644)), Ok(0o100644));
        assert_eq!(coerce::<off_t>("st_size", &Value::Int(-1)), Ok(-1));
        assert_eq!(
            coerce::<u64>("st_ino", &Value::Int(u64::MAX as i128)),
            Ok(u64::MAX)
        );
    }

    #[test]
    fn negative_into_unsigned_is_rejected() {
        let e = coerce::<uid_t>("st_uid", &Value::Int(-1)).unwrap_err();
        assert!(matches!(e, MarshalError::OutOfRange { field: "st_uid", .. }));
    }

    #[test]
    fn overflow_is_rejected() {
        assert!(coerce::<u32>("st_uid", &Value::Int(1 << 32)).is_err());
        assert!(coerce::<i64>("st_size", &Value::Int(i64::MAX as i128 + 1)).is_err());
    }

    #[test]
    fn floats_truncate_toward_zero() {
        assert_eq!(coerce::<i64>("st_mtime", &Value::Float(1.9)), Ok(1));
        assert_eq!(coerce::<i64>("st_mtime", &Value::Float(-1.9)), Ok(-1));
        assert_eq!(coerce::<u32>("st_uid", &Value::Float(-0.5)), Ok(0));
        assert!(coerce::<u32>("st_uid", &Value::Float(-1.5)).is_err());
        assert!(coerce::<u32>("st_uid", &Value::Float(f64::NAN)).is_err());
    }

    #[test]
    fn non_numeric_is_rejected() {
        assert_eq!(
            coerce::<u32>("st_mode", &Value::Bool(true)),
            Err(MarshalError::NotNumeric {
                field: "st_mode",
                found: "bool"
            })
        );
        assert!(coerce::<u32>("st_mode", &Value::from("0644")).is_err());
        assert!(coerce::<u32>("st_mode", &Value::None).is_err());
    }

    #[test]
    fn soft_fields() {
        assert_eq!(coerce_soft::<u32>("st_rdev", None), Ok(None));
        assert_eq!(coerce_soft::<u32>("st_rdev", Some(&Value::None)), Ok(None));
        assert_eq!(coerce_soft::<u32>("st_rdev", Some(&Value::Int(3))), Ok(Some(3)));
        assert!(coerce_soft::<u32>("st_rdev", Some(&Value::Int(-3))).is_err());
    }

    #[test]
    fn status_fits_c_int() {
        assert_eq!(status(-2), Ok(-2));
        assert!(status(1 << 40).is_err());
    }
}
