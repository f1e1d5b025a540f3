// Retry policy used by every remote call.
// A policy is a small immutable value: how many attempts and how long to
// wait between them. It never inspects the error, everything is retried.

use std::fmt::Display;
use std::thread;
use std::time::Duration;

use rand::Rng;

/// How long to wait before the next attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `base * factor^attempt_index`, capped at `max`.
    Exponential {
        base: Duration,
        factor: u32,
        max: Duration,
    },
    /// Uniformly random delay in `[min, max]`.
    Jitter { min: Duration, max: Duration },
    /// `step * attempt_number`, where the first attempt is number 1.
    Linear { step: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// A policy that tries once and never waits.
    pub fn once() -> Self {
        Self::new(
            1,
            Backoff::Linear {
                step: Duration::ZERO,
            },
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// Delay to wait after the attempt with the given zero-based index failed.
    pub fn delay(&self, attempt_index: u32) -> Duration {
        let mut rng = rand::thread_rng();
        self.delay_with_rng(attempt_index, &mut rng)
    }

    pub fn delay_with_rng<R: Rng + ?Sized>(&self, attempt_index: u32, rng: &mut R) -> Duration {
        match self.backoff {
            Backoff::Exponential { base, factor, max } => {
                let multiplier = factor.saturating_pow(attempt_index);
                base.saturating_mul(multiplier).min(max)
            }
            Backoff::Jitter { min, max } => random_between(min, max, rng),
            Backoff::Linear { step } => step.saturating_mul(attempt_index.saturating_add(1)),
        }
    }

    /// Run `op` until it succeeds or the attempts are used up.
    ///
    /// `label` names the operation in the log. The error of the last attempt
    /// is returned when every attempt failed.
    pub fn run<T, E, F>(&self, label: &str, mut op: F) -> Result<T, E>
    where
        E: Display,
        F: FnMut() -> Result<T, E>,
    {
        let mut attempt = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) => {
                    tracing::warn!(
                        operation = label,
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "attempt failed"
                    );
                    if attempt + 1 >= self.max_attempts {
                        return Err(e);
                    }
                    let delay = self.delay(attempt);
                    tracing::info!(
                        operation = label,
                        delay_ms = delay.as_millis() as u64,
                        "retrying after delay"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}

/// Uniform random duration in `[min, max]`. A reversed range is swapped.
pub fn random_between<R: Rng + ?Sized>(min: Duration, max: Duration, rng: &mut R) -> Duration {
    let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
    let lo_ms = lo.as_millis().min(u128::from(u64::MAX)) as u64;
    let hi_ms = hi.as_millis().min(u128::from(u64::MAX)) as u64;
    Duration::from_millis(rng.gen_range(lo_ms..=hi_ms))
}
