use core::fmt::Debug;

use toad_msg::Code;

use crate::time::Clock;

/// Identifies a configured server within the client (Security/Server
/// object resource "Short Server ID")
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShortId(pub u16);

/// Server-mode handle for a registered client, allocated by the engine
/// and echoed in the registration location (`/rd/<id>`)
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientId(pub u32);

/// A change to the server-mode client registry, reported through
/// [`Platform::monitor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorEvent<'a> {
  /// The client the event concerns
  pub client: ClientId,
  /// The client's registration location, e.g. `rd/5`; empty once the
  /// record is gone
  pub location: &'a str,
  /// `2.01` on register, `2.04` on update, `2.02` on deregister or
  /// lifetime expiry
  pub code: Code,
}

/// The host contract.
///
/// The engine has no thread, no socket and no wall clock of its own;
/// everything it needs from the outside world comes through this trait.
/// All three methods are invoked synchronously from inside engine calls
/// ([`step`](crate::Context::step), [`handle_packet`](crate::Context::handle_packet),
/// and the request-issuing APIs).
pub trait Platform {
  /// Time source driving retransmission, registration lifetimes and
  /// client expiry.
  type Clock: Clock;

  /// Opaque transport session handle.
  ///
  /// Minted by [`connect`](Platform::connect) and handed back to
  /// [`send`](Platform::send); the engine only clones and compares it.
  type Session: Clone + PartialEq + Debug;

  /// Error yielded by [`send`](Platform::send).
  type Error: Debug;

  /// Borrow the time source.
  fn clock(&self) -> &Self::Clock;

  /// Open (or re-use) a transport session to the server configured
  /// with `short_id`.
  ///
  /// `None` means the server is unreachable; the engine leaves the
  /// server record alone and tries again on a later attempt.
  fn connect(&mut self, short_id: ShortId) -> Option<Self::Session>;

  /// Put a datagram on the wire.
  ///
  /// A failure is logged and the owning transaction, if any, stays
  /// queued for retransmission.
  fn send(&mut self, session: &Self::Session, datagram: &[u8]) -> Result<(), Self::Error>;

  /// Observe changes to the server-mode client registry.
  ///
  /// The default implementation ignores them, which is the right thing
  /// for client-only hosts.
  fn monitor(&mut self, event: MonitorEvent<'_>) {
    let _ = event;
  }
}
