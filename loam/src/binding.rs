use core::fmt;
use core::str::FromStr;

use crate::error::Error;

/// Transport binding of a client: UDP and/or SMS, each optionally in
/// queued mode.
///
/// The SMS-carrying variants require the client to be configured with
/// an MSISDN.
///
/// ```
/// use loam::binding::BindingMode;
///
/// assert_eq!("UQ".parse(), Ok(BindingMode::Uq));
/// assert!(BindingMode::Sq.requires_msisdn());
/// assert!("X".parse::<BindingMode>().is_err());
/// ```
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingMode {
  /// UDP
  #[default]
  U,
  /// UDP, queued
  Uq,
  /// SMS
  S,
  /// SMS, queued
  Sq,
  /// UDP and SMS
  Us,
  /// UDP queued, SMS
  Uqs,
}

impl BindingMode {
  /// The wire spelling (`b=` query parameter, Server object
  /// resource 7).
  pub fn as_str(&self) -> &'static str {
    match self {
      | BindingMode::U => "U",
      | BindingMode::Uq => "UQ",
      | BindingMode::S => "S",
      | BindingMode::Sq => "SQ",
      | BindingMode::Us => "US",
      | BindingMode::Uqs => "UQS",
    }
  }

  /// Whether this binding carries SMS and therefore needs an MSISDN.
  pub fn requires_msisdn(&self) -> bool {
    matches!(self,
             BindingMode::S | BindingMode::Sq | BindingMode::Us | BindingMode::Uqs)
  }
}

impl FromStr for BindingMode {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      | "U" => Ok(BindingMode::U),
      | "UQ" => Ok(BindingMode::Uq),
      | "S" => Ok(BindingMode::S),
      | "SQ" => Ok(BindingMode::Sq),
      | "US" => Ok(BindingMode::Us),
      | "UQS" => Ok(BindingMode::Uqs),
      | _ => Err(Error::BadRequest),
    }
  }
}

impl fmt::Display for BindingMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}
