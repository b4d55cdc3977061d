use core::convert::Infallible;

use embedded_time::Instant;

use crate::time::{self, Clock, Millis};

/// A number of retransmissions
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Attempts(pub u16);

/// Strategy for spacing retransmissions of a confirmable message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Double the delay after every retransmission.
  ///
  /// With `init` = 2s the deadlines land 2, 4, 8, 16… seconds after
  /// the initial transmission.
  Exponential {
    /// Delay between the initial transmission and the first retry
    init: Millis,
  },
  /// Keep a fixed delay between retransmissions.
  Delay {
    /// Delay between consecutive transmissions
    interval: Millis,
  },
}

impl Strategy {
  /// Time between the initial transmission and transmission
  /// number `attempt` (1-based).
  ///
  /// ```
  /// use loam::retry::Strategy;
  /// use loam::time::Millis;
  ///
  /// let s = Strategy::Exponential { init: Millis(2000) };
  /// assert_eq!(s.total_delay(1), Millis(2000));
  /// assert_eq!(s.total_delay(2), Millis(4000));
  /// assert_eq!(s.total_delay(3), Millis(8000));
  /// assert_eq!(s.total_delay(4), Millis(16_000));
  /// ```
  pub fn total_delay(&self, attempt: u16) -> Millis {
    match *self {
      | Strategy::Exponential { init: Millis(init) } => {
        Millis(init.saturating_mul(1u64 << (attempt - 1).min(62)))
      },
      | Strategy::Delay { interval: Millis(interval) } => {
        Millis(interval.saturating_mul(attempt as u64))
      },
    }
  }
}

/// What a [`RetryTimer`] would like its owner to do
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum Signal {
  /// The retransmission budget is exhausted and the message should be
  /// considered timed out.
  Exhausted,
  /// The message should be put on the wire again.
  Retry,
}

/// Deadline tracking for one confirmable message.
///
/// The initial transmission happens when the timer is created; the timer
/// then yields [`Signal::Retry`] each time a retransmission deadline
/// passes and [`Signal::Exhausted`] once the budget is spent *and* the
/// final response window has elapsed.
///
/// [`nb::Error::WouldBlock`] means "nothing to do yet"; ask again later.
#[derive(Debug, Clone, Copy)]
pub struct RetryTimer<C: Clock> {
  start: Instant<C>,
  strategy: Strategy,
  sent: Attempts,
  max_retransmits: Attempts,
}

impl<C: Clock> RetryTimer<C> {
  /// Start tracking a message that was just transmitted at `start`.
  pub fn new(start: Instant<C>, strategy: Strategy, max_retransmits: Attempts) -> Self {
    Self { start,
           strategy,
           sent: Attempts(0),
           max_retransmits }
  }

  /// Check the deadlines against `now`.
  pub fn poll(&mut self, now: Instant<C>) -> nb::Result<Signal, Infallible> {
    let elapsed = time::elapsed(now, self.start);

    if self.sent >= self.max_retransmits {
      // all retransmits done; one more window for the reply to land
      if elapsed >= self.strategy.total_delay(self.sent.0 + 1) {
        Ok(Signal::Exhausted)
      } else {
        Err(nb::Error::WouldBlock)
      }
    } else if elapsed >= self.strategy.total_delay(self.sent.0 + 1) {
      self.sent.0 += 1;
      Ok(Signal::Retry)
    } else {
      Err(nb::Error::WouldBlock)
    }
  }

  /// Time remaining until the next deadline (retransmission or final
  /// timeout), so callers can shrink their sleep accordingly.
  pub fn until_next(&self, now: Instant<C>) -> Millis {
    let elapsed = time::elapsed(now, self.start);
    let Millis(next) = self.strategy.total_delay(self.sent.0 + 1);

    Millis(next.saturating_sub(elapsed.0))
  }
}
