//! Bounded retry with randomized backoff.

use std::time::Duration;

use rand::Rng;

use crate::cancel::CancellationToken;

const NUM_RETRIES: u32 = 10;
const INITIAL_BACKOFF: Duration = Duration::from_millis(77);
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Run `f` up to a fixed attempt budget. `f` reports its result and
/// whether another attempt could help; the first non-retryable outcome is
/// returned immediately. Between attempts the wrapper sleeps with a
/// growing, randomized interval, observing the cancellation token so a
/// cancelled run is not stuck in backoff.
pub fn with_retries<T, E>(
    token: &CancellationToken,
    f: impl FnMut() -> (Result<T, E>, bool),
) -> Result<T, E> {
    with_retries_from(token, INITIAL_BACKOFF, f)
}

fn with_retries_from<T, E>(
    token: &CancellationToken,
    initial: Duration,
    mut f: impl FnMut() -> (Result<T, E>, bool),
) -> Result<T, E> {
    let mut interval = initial;
    let mut rng = rand::thread_rng();

    let mut attempt = 0;
    loop {
        attempt += 1;
        let (result, retryable) = f();
        let err = match result {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if !retryable || attempt >= NUM_RETRIES {
            return Err(err);
        }
        if !token.sleep(interval) {
            // Cancelled mid-backoff; the last error stands.
            return Err(err);
        }
        let jitter = rng.gen_range(0..=interval.as_millis() as u64);
        interval = (interval + Duration::from_millis(jitter)).min(MAX_BACKOFF);
    }
}
