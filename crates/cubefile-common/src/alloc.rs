//! Bounded allocation back-off for growing byte buffers.

use crate::error::{CubeError, Result};

/// Smallest reservation attempted before giving up.
pub const MIN_RESERVATION: usize = 4096;

/// Reserves room for `request` more bytes in `buf`.
///
/// When the allocator refuses, the request is retried at 2/3 of the failed
/// size until it would drop below `minimum`. Returns the number of bytes
/// actually reserved.
pub fn reserve_with_backoff(buf: &mut Vec<u8>, request: usize, minimum: usize) -> Result<usize> {
    let minimum = minimum.min(request);
    let mut attempt = request;
    loop {
        match buf.try_reserve(attempt) {
            Ok(()) => return Ok(attempt),
            Err(_) => {
                let reduced = attempt / 3 * 2;
                if reduced < minimum || reduced == attempt {
                    return Err(CubeError::AllocationFailed {
                        requested: request,
                        minimum,
                    });
                }
                tracing::debug!(
                    failed = attempt,
                    retry = reduced,
                    "buffer reservation refused, backing off"
                );
                attempt = reduced;
            }
        }
    }
}
