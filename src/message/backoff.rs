use std::{iter::Take, time::Duration};

/// An infinite stream of back off durations, where the duration increases by
/// an exponential factor up to some maximum delay. Upon reaching the maximum
/// delay, that value will be returned from then on.
///
/// The [`Retry`] protocol uses [std::thread::sleep] for the delay; so, in its
/// current design, do NOT use this with asynchronous code.
pub struct ExponentialBackoff {
    curr: Duration,
    max: Duration,
    factor: u32,
}

impl ExponentialBackoff {
    pub fn new(start: Duration, max: Duration, factor: u32) -> ExponentialBackoff {
        ExponentialBackoff {
            curr: start,
            max,
            factor,
        }
    }
}

impl Iterator for ExponentialBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        let this = self.curr;
        self.curr = (self.curr * self.factor).min(self.max);
        Some(this)
    }
}

/// Retry a fallible operation over an [`Iterator`] of [`Duration`] values,
/// which specify the time to wait between attempts.
pub trait Retry {
    /// Retry `f` until it returns [Ok]. `sleep` is called after every failed
    /// attempt but the last, with the error and the delay, so that the
    /// caller can log and wait. If the iterator runs out first, the last
    /// error is returned; `None` means no attempt was made.
    fn retry<F, S, T, E>(&mut self, mut f: F, sleep: S) -> Option<Result<T, E>>
    where
        F: FnMut() -> Result<T, E>,
        S: Fn(&E, Duration),
        Self: Iterator<Item = Duration> + Sized,
    {
        let mut last_err = None;
        let mut iter = self.peekable();
        while let Some(delay) = iter.next() {
            match f() {
                Ok(v) => return Some(Ok(v)),
                Err(e) => {
                    if iter.peek().is_some() {
                        sleep(&e, delay);
                    }
                    last_err = Some(Err(e));
                }
            }
        }
        last_err
    }
}

impl Retry for ExponentialBackoff {}

impl Retry for Take<ExponentialBackoff> {}
