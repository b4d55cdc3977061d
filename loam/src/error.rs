use toad_msg::Code;

use crate::code;

/// Engine-level failure, mirroring the CoAP response code that crosses
/// the wire when the failure is reported to a peer.
///
/// Errors raised by object implementations travel back to the requesting
/// peer verbatim as response codes; errors raised by the transaction
/// layer surface through completion callbacks instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
  /// Malformed TLV, URI, query or link-format input → `4.00`
  BadRequest,
  /// Object, instance or resource absent → `4.04`
  NotFound,
  /// The operation is not supported on this resource → `4.05`
  MethodNotAllowed,
  /// Value out of range or of the wrong type → `4.06`
  NotAcceptable,
  /// Allocation failure, encoder overflow, clock failure → `5.00`
  Internal,
  /// The object does not implement the capability → `5.01`
  NotImplemented,
  /// A transaction exhausted its retransmission budget.
  ///
  /// Never sent on the wire; completion callbacks see it as an absent
  /// response.
  Timeout,
  /// The host's send callback failed.
  ///
  /// The affected transaction stays queued and is retransmitted on a
  /// later step.
  Transport,
}

impl Error {
  /// The CoAP response code reported to peers for this error.
  pub fn code(self) -> Code {
    match self {
      | Error::BadRequest => code::BAD_REQUEST,
      | Error::NotFound => code::NOT_FOUND,
      | Error::MethodNotAllowed => code::METHOD_NOT_ALLOWED,
      | Error::NotAcceptable => code::NOT_ACCEPTABLE,
      | Error::NotImplemented => code::NOT_IMPLEMENTED,
      | Error::Internal | Error::Timeout | Error::Transport => {
        code::INTERNAL_SERVER_ERROR
      },
    }
  }
}

impl From<loam_tlv::DecodeError> for Error {
  fn from(_: loam_tlv::DecodeError) -> Self {
    Error::BadRequest
  }
}

impl From<loam_tlv::EncodeError> for Error {
  fn from(_: loam_tlv::EncodeError) -> Self {
    Error::Internal
  }
}

impl From<embedded_time::clock::Error> for Error {
  fn from(_: embedded_time::clock::Error) -> Self {
    Error::Internal
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn every_kind_maps_to_a_coap_code() {
    assert_eq!(Error::BadRequest.code(), Code::new(4, 0));
    assert_eq!(Error::NotFound.code(), Code::new(4, 4));
    assert_eq!(Error::MethodNotAllowed.code(), Code::new(4, 5));
    assert_eq!(Error::NotAcceptable.code(), Code::new(4, 6));
    assert_eq!(Error::Internal.code(), Code::new(5, 0));
    assert_eq!(Error::NotImplemented.code(), Code::new(5, 1));
  }
}
