//! Outstanding request/response correlation.
//!
//! Every confirmable request the engine sends becomes a
//! [`Transaction`]: the message (kept whole for retransmission), the
//! peer it went to, a [`RetryTimer`] pacing retransmits, and an
//! [`Exchange`] describing what to do with the eventual response.
//!
//! The transaction list is owned by the [`Context`](crate::Context);
//! removal destroys the transaction. Completion (matched response or
//! exhausted retry budget) happens inside
//! [`handle_packet`](crate::Context::handle_packet) and
//! [`step`](crate::Context::step).

use std_alloc::boxed::Box;

use toad_msg::{Code, Id, Token};

use crate::platform::{ClientId, Platform, ShortId};
use crate::retry::RetryTimer;
use crate::uri::Uri;
use crate::Message;

/// Who a transaction is talking to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Peer {
  /// A configured server (client mode); `bootstrap` selects which
  /// server list the short id refers to.
  Server {
    /// Short server id of the record
    short: ShortId,
    /// Whether the record lives on the bootstrap list
    bootstrap: bool,
  },
  /// A registered client (server mode).
  Client(ClientId),
}

/// Completion callback for device-management requests issued by a
/// server toward one of its clients.
///
/// `None` means the transaction timed out without a response.
pub type DmCallback = Box<dyn FnOnce(ClientId, &Uri, Option<(Code, &[u8])>)>;

/// Callback for observation notifications flowing back from a client.
///
/// Invoked once with the initial representation when the observation
/// is accepted, then once per notification, with the watcher's
/// sequence number.
pub type NotifyCallback = Box<dyn FnMut(ClientId, &Uri, u32, Code, &[u8])>;

/// What should happen when a transaction completes.
pub(crate) enum Exchange {
  /// `POST /bs`: bootstrap request to a bootstrap server.
  Bootstrap,
  /// `POST /rd`: initial registration with a server.
  Register,
  /// `POST <location>`: registration update.
  Update,
  /// `DELETE <location>`: deregistration; best-effort.
  Deregister,
  /// Device-management request to a client; the host gets the reply.
  Dm {
    /// Path the request addressed
    uri: Uri,
    /// Host completion
    callback: DmCallback,
  },
  /// Observation install (`GET` + Observe) on a client.
  Observe {
    /// Path being observed
    uri: Uri,
    /// Host notification sink; moves into the observation table once
    /// the install is accepted
    callback: NotifyCallback,
  },
}

impl core::fmt::Debug for Exchange {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    match self {
      | Exchange::Bootstrap => f.write_str("Bootstrap"),
      | Exchange::Register => f.write_str("Register"),
      | Exchange::Update => f.write_str("Update"),
      | Exchange::Deregister => f.write_str("Deregister"),
      | Exchange::Dm { uri, .. } => write!(f, "Dm({})", uri),
      | Exchange::Observe { uri, .. } => write!(f, "Observe({})", uri),
    }
  }
}

/// One outstanding confirmable request.
pub(crate) struct Transaction<P: Platform> {
  /// Message id; reused verbatim by every retransmission
  pub id: Id,
  /// Token correlating the response
  pub token: Token,
  /// Logical peer, for lifecycle bookkeeping
  pub peer: Peer,
  /// Transport session the message goes out on
  pub session: P::Session,
  /// The full message, kept for retransmission
  pub msg: Message,
  /// Retransmission pacing
  pub timer: RetryTimer<P::Clock>,
  /// Completion routing
  pub exchange: Exchange,
}

impl<P: Platform> core::fmt::Debug for Transaction<P> {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("Transaction")
     .field("id", &self.id)
     .field("token", &self.token)
     .field("peer", &self.peer)
     .field("session", &self.session)
     .field("exchange", &self.exchange)
     .finish()
  }
}

impl<P: Platform> Transaction<P> {
  /// Whether `token` from `session` answers this transaction.
  pub fn answers(&self, token: Token, session: &P::Session) -> bool {
    self.token == token && &self.session == session
  }

  /// Whether another transaction would collide with this one
  /// (same peer, same message id).
  pub fn collides_with(&self, peer: Peer, id: Id) -> bool {
    self.peer == peer && self.id == id
  }
}
