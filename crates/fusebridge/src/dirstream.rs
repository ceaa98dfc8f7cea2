//! Feeding handler listings into the native directory filler.

use log::debug;
use nix::libc::c_int;

use crate::extract::{self, Entry};
use crate::ops::{DirFiller, LegacyDirFiller};
use crate::utils::Result;
use crate::value::Value;

/// Push the entries of a readdir result into `filler`.
///
/// Entries are pulled lazily and the listing stops as soon as the filler reports
/// a full buffer. An entry that cannot be marshaled ends the listing as if the
/// directory had no more entries. Returns the number of entries accepted.
pub fn fill(result: Value, filler: &mut dyn DirFiller) -> Result<usize> {
    feed(result, |e| filler.fill(&e.name, Some(&e.stat), e.offset))
}

/// Like [`fill`], for the getdir filler of revisions before 23.
pub fn fill_legacy(result: Value, filler: &mut dyn LegacyDirFiller) -> Result<usize> {
    feed(result, |e| filler.fill(&e.name, e.stat.type_nibble(), e.stat.st_ino))
}

fn feed<F>(result: Value, mut push: F) -> Result<usize>
where
    F: FnMut(&Entry) -> c_int,
{
    let mut accepted = 0;

    for item in result.into_values()? {
        let entry = match extract::dir_entry(&item?) {
            Ok(entry) => entry,
            Err(e) => {
                debug!("listing ended by malformed entry: {e}");
                break;
            }
        };

        if push(&entry) != 0 {
            break;
        }
        accepted += 1;
    }

    Ok(accepted)
}
