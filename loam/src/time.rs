use embedded_time::Instant;

/// A duration, in milliseconds
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Millis(pub u64);

/// Supertrait of [`embedded_time::Clock`] pinning the
/// type of "ticks" to u64
pub trait Clock: embedded_time::Clock<T = u64> {}
impl<C: embedded_time::Clock<T = u64>> Clock for C {}

/// A duration, in whole seconds
///
/// Registration lifetimes and client end-of-life deadlines are
/// expressed in seconds on the wire (`lt=` query parameter,
/// Server object resource 1).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Seconds(pub u32);

impl Seconds {
  /// This duration as [`Millis`]
  pub fn millis(self) -> Millis {
    Millis(u64::from(self.0) * 1000)
  }
}

/// Timeout configuration allowing for "never time out" as an option
///
/// [`step`](crate::Context::step) receives one of these seeded with the
/// host's desired maximum sleep and shrinks it to the earliest pending
/// deadline before returning.
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Clone, Copy)]
pub enum Timeout {
  /// Timeout after some number of milliseconds has elapsed
  Millis(u64),
  /// Never time out
  Never,
}

impl Timeout {
  /// Lower this timeout so that it does not exceed `deadline`.
  pub fn shrink_to(&mut self, deadline: Millis) {
    match self {
      | Timeout::Never => *self = Timeout::Millis(deadline.0),
      | Timeout::Millis(ms) if *ms > deadline.0 => *ms = deadline.0,
      | _ => (),
    }
  }
}

/// Milliseconds from `since` to `now`, saturating on conversion
/// overflow.
///
/// Callers only ever measure from instants they recorded earlier,
/// so `since <= now` holds.
pub(crate) fn elapsed<C: Clock>(now: Instant<C>, since: Instant<C>) -> Millis {
  let ms: Result<embedded_time::duration::Milliseconds<u64>, _> = (now - since).try_into();
  ms.map(|embedded_time::duration::Milliseconds(ms)| Millis(ms))
    .unwrap_or(Millis(u64::MAX))
}
