//! Device-initiated bootstrap.
//!
//! When requested (or when no regular servers are configured at all),
//! the client POSTs to `/bs?ep=<endpoint>` on the first bootstrap
//! server it can open a session to. A `2.04 Changed` reply moves the
//! flow to [`Pending`](BootstrapState::Pending) and snapshots the
//! object tree; the bootstrap server then provisions the Security and
//! Server objects with ordinary writes (which arrive with the
//! bootstrap-pending relaxation) and closes the sequence with
//! `POST /bs`. Any failure restores the snapshot.

use core::mem;

use std_alloc::format;
use toad_msg::{Code, MessageOptions};

use crate::error::Error;
use crate::platform::Platform;
use crate::transaction::{Exchange, Peer};
use crate::{code, Context};

/// Context-wide bootstrap progress.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
  /// No bootstrap wanted so far.
  #[default]
  NotRequested,
  /// The host (or the empty server list) asked for a bootstrap; the
  /// next step will start it.
  Requested,
  /// `POST /bs` is in flight.
  Initiated,
  /// The bootstrap server accepted and is provisioning objects;
  /// a backup of the object tree is held for rollback.
  Pending,
  /// The bootstrap server finished the sequence.
  Finished,
  /// The request was rejected, timed out, or could not be sent; the
  /// object tree was restored from the backup.
  Failed,
}

/// Send the bootstrap request to the first reachable bootstrap server.
pub(crate) fn begin<P: Platform>(ctx: &mut Context<P>) -> Result<(), Error> {
  let endpoint = ctx.endpoint.clone().ok_or(Error::BadRequest)?;

  let short = match ctx.bootstrap_servers.first() {
    | Some(record) => record.short,
    | None => {
      log::warn!("bootstrap requested but no bootstrap server configured");
      return Err(Error::NotFound);
    },
  };

  if ctx.bootstrap_servers[0].session.is_none() {
    ctx.bootstrap_servers[0].session = ctx.platform.connect(short);
  }

  let session = match ctx.bootstrap_servers[0].session.clone() {
    | Some(s) => s,
    | None => {
      log::warn!("bootstrap server {}: connect failed", short.0);
      return Err(Error::Transport);
    },
  };

  let mut msg = ctx.request(Code::POST, crate::uri::BOOTSTRAP_SEGMENT);
  msg.add_query(format!("ep={}", endpoint))
     .map_err(|_| Error::Internal)?;

  ctx.bootstrap_servers[0].last_id = Some(msg.id);
  log::info!("bootstrap requested from server {}", short.0);

  ctx.enqueue(Peer::Server { short,
                             bootstrap: true },
              session,
              msg,
              Exchange::Bootstrap)
}

/// Completion of the `POST /bs` exchange.
pub(crate) fn on_reply<P: Platform>(ctx: &mut Context<P>, resp: Option<&crate::Message>) {
  match resp {
    | Some(m) if m.code == code::CHANGED => {
      ctx.bootstrap_state = BootstrapState::Pending;
      ctx.backup = ctx.registry.snapshot_all();
      log::info!("bootstrap pending, {} objects backed up", ctx.backup.len());
    },
    | other => {
      ctx.bootstrap_state = BootstrapState::Failed;
      log::warn!("bootstrap failed ({:?})", other.map(|m| m.code));
      restore(ctx);
    },
  }
}

/// Inbound `POST /bs`: the bootstrap server declaring the sequence
/// complete. Yields the reply code.
pub(crate) fn finish<P: Platform>(ctx: &mut Context<P>, req: &crate::Message) -> Code {
  if req.code != Code::POST {
    return code::METHOD_NOT_ALLOWED;
  }

  if ctx.bootstrap_state != BootstrapState::Pending {
    return code::BAD_REQUEST;
  }

  ctx.bootstrap_state = BootstrapState::Finished;
  ctx.backup.clear();
  log::info!("bootstrap finished");

  code::CHANGED
}

/// Roll the object tree back to the snapshot taken when the sequence
/// went pending.
pub(crate) fn restore<P: Platform>(ctx: &mut Context<P>) {
  let backup = mem::take(&mut ctx.backup);
  if !backup.is_empty() {
    log::info!("restoring {} objects from bootstrap backup", backup.len());
    ctx.registry.restore(backup);
  }
}
