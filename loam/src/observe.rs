//! Observation bookkeeping for both directions.
//!
//! [`Observations`] is the local table: peers that asked to watch
//! resources *we* expose. Each watched [`Uri`] carries an ordered list
//! of [`Watcher`]s; every notification a watcher receives carries a
//! monotonically increasing 24-bit sequence number so the peer can
//! detect reordering on the wire.
//!
//! [`RemoteObservation`] is the server-mode mirror: observations *we*
//! installed on a registered client, matched to inbound notifications
//! by token and fanned out to the host's callback.

use std_alloc::vec::Vec;

use toad_msg::Token;

use crate::platform::ClientId;
use crate::transaction::NotifyCallback;
use crate::uri::Uri;

const SEQ_MASK: u32 = 0xFF_FFFF;

/// One peer watching one local path.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Watcher<S> {
  /// Transport session of the watching peer
  pub session: S,
  /// Token the peer registered with; echoed in every notification
  pub token: Token,
  /// Sequence number of the last notification sent
  pub seq: u32,
}

impl<S> Watcher<S> {
  /// Advance and return the sequence number for the next
  /// notification, wrapping at 24 bits.
  pub fn next_seq(&mut self) -> u32 {
    self.seq = (self.seq + 1) & SEQ_MASK;
    self.seq
  }
}

/// A watched local path and its watchers.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Observation<S> {
  /// The watched path
  pub uri: Uri,
  /// Watchers in registration order
  pub watchers: Vec<Watcher<S>>,
}

/// The local observation table.
#[derive(Debug)]
pub(crate) struct Observations<S> {
  entries: Vec<Observation<S>>,
}

impl<S> Default for Observations<S> {
  fn default() -> Self {
    Observations { entries: Vec::new() }
  }
}

impl<S: Clone + PartialEq> Observations<S> {
  /// Install (or refresh) a watcher. A peer re-registering on the same
  /// path keeps its sequence counter and adopts the new token.
  pub fn register(&mut self, uri: Uri, session: S, token: Token) {
    let ix = match self.entries.iter().position(|o| o.uri == uri) {
      | Some(ix) => ix,
      | None => {
        self.entries.push(Observation { uri,
                                        watchers: Vec::new() });
        self.entries.len() - 1
      },
    };
    let entry = &mut self.entries[ix];

    match entry.watchers.iter_mut().find(|w| w.session == session) {
      | Some(w) => w.token = token,
      | None => entry.watchers.push(Watcher { session,
                                              token,
                                              seq: 0 }),
    }
  }

  /// Explicit de-registration of one watcher.
  pub fn cancel(&mut self, uri: &Uri, session: &S) {
    for entry in self.entries.iter_mut().filter(|o| &o.uri == uri) {
      entry.watchers.retain(|w| &w.session != session);
    }
    self.entries.retain(|o| !o.watchers.is_empty());
  }

  /// Implicit de-registration: the peer is gone.
  pub fn drop_session(&mut self, session: &S) {
    for entry in self.entries.iter_mut() {
      entry.watchers.retain(|w| &w.session != session);
    }
    self.entries.retain(|o| !o.watchers.is_empty());
  }

  /// All observations whose path overlaps a changed path.
  pub fn matching(&mut self, changed: &Uri) -> impl Iterator<Item = &mut Observation<S>> + '_ {
    let changed = *changed;
    self.entries
        .iter_mut()
        .filter(move |o| o.uri.overlaps(&changed))
  }

  /// Number of installed watchers across all paths.
  pub fn watcher_count(&self) -> usize {
    self.entries.iter().map(|o| o.watchers.len()).sum()
  }

  /// Drop everything.
  pub fn clear(&mut self) {
    self.entries.clear();
  }
}

/// An observation this context installed on a registered client
/// (server mode).
pub(crate) struct RemoteObservation {
  /// The observed client
  pub client: ClientId,
  /// The observed path on that client
  pub uri: Uri,
  /// Token correlating notifications
  pub token: Token,
  /// Host notification sink
  pub callback: NotifyCallback,
}

impl core::fmt::Debug for RemoteObservation {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("RemoteObservation")
     .field("client", &self.client)
     .field("uri", &self.uri)
     .field("token", &self.token)
     .finish()
  }
}
