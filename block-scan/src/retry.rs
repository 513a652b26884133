use std::fmt::Display;
use std::future::Future;

/// Attempts used by [`try_return`] when the caller passes `0`.
pub const DEFAULT_ATTEMPTS: usize = 3;

/// Runs `op` up to `max_attempts` times, back to back, and returns the first
/// success. When every attempt fails the error of the last one is returned.
///
/// `max_attempts == 0` selects [`DEFAULT_ATTEMPTS`].
pub async fn try_return<T, E, F, Fut>(mut op: F, max_attempts: usize) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = if max_attempts == 0 {
        DEFAULT_ATTEMPTS
    } else {
        max_attempts
    };

    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= max_attempts => return Err(e),
            Err(e) => {
                tracing::debug!(attempt, max_attempts, "Attempt failed, retrying: {}", e);
                attempt += 1;
            }
        }
    }
}
