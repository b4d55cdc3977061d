//! `loam` is a Lightweight Machine-to-Machine (LwM2M) engine for Rust:
//! the state machines of a managed device *and* of the management
//! server, on top of CoAP.
//!
//! ## LwM2M
//! LwM2M is a device-management protocol: a fleet of constrained
//! devices (the *clients*) registers with a management endpoint (the
//! *server*), exposes a tree of objects → instances → resources, and
//! lets the server read, write, execute and observe that tree over
//! CoAP.
//!
//! This crate is the protocol engine only. It has no socket, no
//! thread and no wall clock; the host supplies all three through the
//! [`Platform`](platform::Platform) trait and drives the engine with a
//! `recv → handle_packet → step` loop. That keeps the engine equally
//! at home on a server and on a device with kilobytes of RAM.
//!
//! ## Anatomy
//! - [`Context`]: the engine handle; owns every table below
//! - [`obj`]: the object registry and the capability trait devices
//!   implement
//! - [`uri`]: the `/object/instance/resource` path model
//! - [`client`]: registration, update, deregistration, bootstrap
//! - [`platform`]: the host contract (clock, sessions, transport,
//!   monitor)
//! - [`loam_tlv`](loam_tlv) (sibling crate): the TLV payload codec
//!
//! The CoAP message representation is [`toad_msg`]'s; this crate never
//! touches octets on the wire itself.

// docs
#![doc(html_root_url = "https://docs.rs/loam/0.1.0")]
#![cfg_attr(any(docsrs, feature = "docs"), feature(doc_cfg))]
// -
// style
#![allow(clippy::unused_unit)]
// -
// deny
#![deny(missing_docs)]
#![cfg_attr(not(test), deny(unsafe_code))]
// -
// features
#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc as std_alloc;

#[cfg(test)]
pub(crate) mod test;

pub(crate) mod logging;

/// transport bindings (UDP / SMS / queued)
pub mod binding;

/// client-mode engine: registration lifecycle & bootstrap
pub mod client;

/// configuring runtime behavior
pub mod config;

/// error kinds and their CoAP codes
pub mod error;

/// CoRE link-format listings for the registration interface
pub mod link;

/// the object/resource model
pub mod obj;

/// the host contract
pub mod platform;

/// retransmission timers
pub mod retry;

/// time abstractions
pub mod time;

/// LwM2M paths and request routing
pub mod uri;

mod context;
mod observe;
mod server;
mod transaction;

pub use context::Context;
pub use transaction::{DmCallback, NotifyCallback};

/// `std`-only loam stuff
#[cfg(feature = "std")]
#[cfg_attr(docsrs, doc(cfg(feature = "std")))]
pub mod std;

/// The CoAP message form this engine consumes and produces.
///
/// Octet-level encoding and decoding belong to [`toad_msg`]; the
/// engine deals in this parsed structure only.
pub type Message = toad_msg::alloc::Message;

macro_rules! code {
  ($(#[$doc:meta])* $name:ident = $c:literal*$d:literal) => {
    $(#[$doc])*
    #[allow(clippy::zero_prefixed_literal)]
    pub const $name: toad_msg::Code = toad_msg::Code::new($c, $d);
  };
}

/// CoAP response codes crossing the LwM2M interfaces.
pub mod code {
  // 2.xx
  code!(
    /// `2.01 Created`: registration accepted, instance created
    CREATED = 2*01
  );
  code!(
    /// `2.02 Deleted`: deregistered, instance deleted
    DELETED = 2*02
  );
  code!(
    /// `2.04 Changed`: write/execute/update accepted
    CHANGED = 2*04
  );
  code!(
    /// `2.05 Content`: read result, observation notification
    CONTENT = 2*05
  );

  // 4.xx
  code!(
    /// `4.00 Bad Request`: malformed TLV, URI, query or payload
    BAD_REQUEST = 4*00
  );
  code!(
    /// `4.04 Not Found`: object, instance or resource absent
    NOT_FOUND = 4*04
  );
  code!(
    /// `4.05 Method Not Allowed`: operation unsupported on the target
    METHOD_NOT_ALLOWED = 4*05
  );
  code!(
    /// `4.06 Not Acceptable`: value out of range or mistyped
    NOT_ACCEPTABLE = 4*06
  );

  // 5.xx
  code!(
    /// `5.00 Internal Server Error`
    INTERNAL_SERVER_ERROR = 5*00
  );
  code!(
    /// `5.01 Not Implemented`: capability absent on the object
    NOT_IMPLEMENTED = 5*01
  );
}
