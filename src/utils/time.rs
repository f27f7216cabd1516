use std::time::Instant;

/// Source of monotonic time. Status polling asks the clock instead of calling
/// [`Instant::now`] directly so staleness can be tested without sleeping.
pub trait Clock: Send {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}
