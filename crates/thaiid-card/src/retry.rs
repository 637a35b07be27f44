//! Retry loop shared by single transactions and whole card reads

use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::error::CardError;

/// Run `op` up to `attempts` times, retrying only transient failures.
///
/// `op` receives the 1-based attempt number. Non-transient errors, and the
/// transient error of the final attempt, are returned as-is.
pub fn retry_transient<T, F>(attempts: u32, delay: Duration, mut op: F) -> Result<T, CardError>
where
    F: FnMut(u32) -> Result<T, CardError>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;

    loop {
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < attempts => {
                debug!(attempt, attempts, error = %err, "Transient card error, retrying");
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
