use crate::retry::{Attempts, Strategy};
use crate::time::{Millis, Seconds};

/// Configuration options related to client registrations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reg {
  /// Lifetime used when a server's Server-object instance does not
  /// provide one.
  ///
  /// Defaults to one day:
  /// ```
  /// use loam::config::Reg;
  /// use loam::time::Seconds;
  ///
  /// assert_eq!(Reg::default().default_lifetime, Seconds(86_400));
  /// ```
  pub default_lifetime: Seconds,

  /// How far into a registration's lifetime the refreshing update is
  /// sent, in percent.
  ///
  /// Must be strictly below 100 so the update always lands before the
  /// registration expires.
  ///
  /// Defaults to 80:
  /// ```
  /// use loam::config::Reg;
  ///
  /// assert_eq!(Reg::default().update_at_percent, 80);
  /// ```
  pub update_at_percent: u8,
}

/// Configuration options related to CoAP messaging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Msg {
  /// Seed for the per-context generator of message ids and tokens.
  ///
  /// The default value is 0, although it is best practice to set this
  /// to something else (random integer, machine identifier) so that
  /// two devices booted at the same moment do not emit colliding ids.
  ///
  /// ```
  /// use loam::config::Msg;
  ///
  /// assert_eq!(Msg::default().id_seed, 0);
  /// ```
  pub id_seed: u64,

  /// Retry strategy for confirmable requests that have not been
  /// answered.
  ///
  /// Defaults to doubling delays starting at 2 seconds, so
  /// retransmissions land 2, 4, 8 and 16 seconds after the initial
  /// transmission:
  /// ```
  /// use loam::config::Msg;
  /// use loam::retry::Strategy;
  /// use loam::time::Millis;
  ///
  /// assert_eq!(Msg::default().retry_strategy,
  ///            Strategy::Exponential { init: Millis(2000) });
  /// ```
  pub retry_strategy: Strategy,

  /// Number of times an unanswered confirmable request is retransmitted
  /// before its transaction times out.
  ///
  /// Defaults to 4 retransmissions (5 transmissions total):
  /// ```
  /// use loam::config::Msg;
  /// use loam::retry::Attempts;
  ///
  /// assert_eq!(Msg::default().max_retransmits, Attempts(4));
  /// ```
  pub max_retransmits: Attempts,
}

impl Default for Reg {
  fn default() -> Self {
    Reg { default_lifetime: Seconds(86_400),
          update_at_percent: 80 }
  }
}

impl Default for Msg {
  fn default() -> Self {
    Msg { id_seed: 0,
          retry_strategy: Strategy::Exponential { init: Millis(2000) },
          max_retransmits: Attempts(4) }
  }
}

/// Runtime config
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Config {
  /// See [`Reg`]
  pub reg: Reg,
  /// See [`Msg`]
  pub msg: Msg,
}

impl Config {
  /// When the refreshing update for a registration with `lifetime` is
  /// due, measured from the moment the registration was accepted.
  pub(crate) fn update_due(&self, lifetime: Seconds) -> Millis {
    let Millis(life) = lifetime.millis();
    Millis(life / 100 * u64::from(self.reg.update_at_percent.min(99)))
  }
}
