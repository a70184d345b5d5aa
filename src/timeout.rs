use std::time::{Duration, Instant};

/// Blocking limits for reads and writes.
///
/// Semantics follow the Win32 `COMMTIMEOUTS` model:
///
/// * a read returns once `read_total_timeout_constant +
///   n * read_total_timeout_multiplier` has elapsed since the call started,
///   or once `read_interval_timeout` passes between two received bytes,
///   whichever comes first;
/// * a write returns once `write_total_timeout_constant +
///   n * write_total_timeout_multiplier` has elapsed.
///
/// A zero interval disables the inter-byte timer, and zero constant and
/// multiplier together disable the total budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeout {
    pub read_interval_timeout: Duration,
    pub read_total_timeout_constant: Duration,
    pub read_total_timeout_multiplier: Duration,
    pub write_total_timeout_constant: Duration,
    pub write_total_timeout_multiplier: Duration,
}

impl Default for Timeout {
    fn default() -> Self {
        Self {
            read_interval_timeout: Duration::from_millis(50),
            read_total_timeout_constant: Duration::from_millis(50),
            read_total_timeout_multiplier: Duration::from_millis(50),
            write_total_timeout_constant: Duration::from_millis(50),
            write_total_timeout_multiplier: Duration::from_millis(10),
        }
    }
}

impl Timeout {
    /// Total time a read of `requested` bytes may block, or `None` when unbounded.
    pub fn read_budget(&self, requested: usize) -> Option<Duration> {
        budget(
            self.read_total_timeout_constant,
            self.read_total_timeout_multiplier,
            requested,
        )
    }

    /// Total time a write of `requested` bytes may block, or `None` when unbounded.
    pub fn write_budget(&self, requested: usize) -> Option<Duration> {
        budget(
            self.write_total_timeout_constant,
            self.write_total_timeout_multiplier,
            requested,
        )
    }

    /// Inter-byte gap, or `None` when disabled.
    pub fn read_interval(&self) -> Option<Duration> {
        (!self.read_interval_timeout.is_zero()).then_some(self.read_interval_timeout)
    }
}

fn budget(constant: Duration, multiplier: Duration, requested: usize) -> Option<Duration> {
    if constant.is_zero() && multiplier.is_zero() {
        return None;
    }
    let factor = u32::try_from(requested).unwrap_or(u32::MAX);
    Some(constant.saturating_add(multiplier.saturating_mul(factor)))
}

/// Tracks the two read timers across the poll/read cycles of one read call.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReadTimer {
    deadline: Option<Instant>,
    interval: Option<Duration>,
    last_byte: Option<Instant>,
}

impl ReadTimer {
    pub(crate) fn start(timeout: &Timeout, requested: usize, now: Instant) -> Self {
        Self {
            deadline: timeout
                .read_budget(requested)
                .and_then(|d| now.checked_add(d)),
            interval: timeout.read_interval(),
            last_byte: None,
        }
    }

    /// Record that data arrived at `now`.
    pub(crate) fn received(&mut self, now: Instant) {
        self.last_byte = Some(now);
    }

    /// Instant at which waiting for more data must stop, `None` for never.
    pub(crate) fn limit(&self) -> Option<Instant> {
        let gap = match (self.last_byte, self.interval) {
            (Some(last), Some(interval)) => last.checked_add(interval),
            _ => None,
        };
        match (self.deadline, gap) {
            (Some(deadline), Some(gap)) => Some(deadline.min(gap)),
            (deadline, gap) => deadline.or(gap),
        }
    }

    /// Time left before [`limit`](Self::limit), `Some(ZERO)` once expired.
    pub(crate) fn remaining(&self, now: Instant) -> Option<Duration> {
        self.limit().map(|limit| limit.saturating_duration_since(now))
    }
}
