use std::ffi::CString;

use crate::error;

pub type Result<T> = ::std::result::Result<T, error::Error>;

#[macro_export]
macro_rules! io_err {
    ($kind:ident, $msg:expr) => {
        ::std::io::Error::new(::std::io::ErrorKind::$kind, $msg)
    };
}

#[macro_export]
macro_rules! res {
    ($err:expr) => {
        Err(From::from($err))
    };
}

/// Convert the launcher's mount arguments into the daemon's argv.
///
/// The list must be non-empty and no argument may contain an interior NUL.
pub fn to_argv<S: AsRef<str>>(args: &[S]) -> Result<Vec<CString>> {
    if args.is_empty() {
        return res!(error::Error::InvalidArgs(
            "mount arguments must be a non-empty sequence".to_owned()
        ));
    }

    args.iter()
        .map(|a| {
            CString::new(a.as_ref()).map_err(|_| {
                error::Error::InvalidArgs(format!("argument {:?} contains a NUL byte", a.as_ref()))
            })
        })
        .collect()
}

#[test]
fn argv_rejects_empty() {
    let args: [&str; 0] = [];
    assert!(to_argv(&args).is_err());
}

#[test]
fn argv_rejects_interior_nul() {
    assert!(to_argv(&["fs", "a\0b"]).is_err());
    assert_eq!(to_argv(&["fs", "/mnt"]).unwrap().len(), 2);
}
