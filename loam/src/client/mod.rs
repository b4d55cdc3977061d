//! Client-mode engine: the lifecycle of this device against its
//! configured servers.
//!
//! Each configured server is a [`ServerRecord`] moving through
//! [`ServerStatus`]: registration (`POST /rd`), a refreshing update
//! before the lifetime runs out, and a best-effort deregistration on
//! close. Bootstrap lives next door in [`bootstrap`].

use embedded_time::Instant;
use std_alloc::format;
use std_alloc::string::String;
use std_alloc::vec::Vec;
use toad_msg::{Code, MessageOptions, Payload};

use crate::config::Config;
use crate::error::Error;
use crate::platform::{Platform, ShortId};
use crate::time::{self, Seconds, Timeout};
use crate::transaction::{Exchange, Peer};
use crate::uri::{ObjectId, ResourceId};
use crate::{code, link, Context};

pub mod bootstrap;

/// Where a server record stands in the registration lifecycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
  /// Nothing sent yet; registration is required.
  #[default]
  Unknown,
  /// `POST /rd` is in flight.
  Registering,
  /// Registered; updates are scheduled against the lifetime.
  Registered,
  /// A registration update is in flight.
  Updating,
  /// `DELETE <location>` is in flight.
  Deregistering,
  /// Deregistered; the record is inert.
  Deregistered,
  /// Connecting, registering or updating failed.
  ///
  /// The record stays on the list; when to retry is host policy
  /// (call [`Context::update_registration`] with `forced`).
  Error,
}

/// One configured server (regular or bootstrap) as seen by the client
/// engine.
pub(crate) struct ServerRecord<P: Platform> {
  /// Short server id configured by the host
  pub short: ShortId,
  /// Transport session; `None` until the first connect, then owned by
  /// the record until close
  pub session: Option<P::Session>,
  /// Lifecycle position
  pub status: ServerStatus,
  /// Message id of the last request sent to this server
  pub last_id: Option<toad_msg::Id>,
  /// Registration location returned by the server, e.g. `rd/5`
  pub location: Option<String>,
  /// Lifetime the registration was made with
  pub lifetime: Seconds,
  /// When the current registration was accepted
  pub registered_at: Option<Instant<P::Clock>>,
  /// Link listing sent at registration, to detect object-list changes
  pub last_listing: Option<String>,
}

impl<P: Platform> core::fmt::Debug for ServerRecord<P> {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("ServerRecord")
     .field("short", &self.short)
     .field("status", &self.status)
     .field("session", &self.session)
     .field("location", &self.location)
     .field("lifetime", &self.lifetime)
     .finish()
  }
}

impl<P: Platform> ServerRecord<P> {
  pub fn new(short: ShortId, config: &Config) -> Self {
    ServerRecord { short,
                   session: None,
                   status: ServerStatus::default(),
                   last_id: None,
                   location: None,
                   lifetime: config.reg.default_lifetime,
                   registered_at: None,
                   last_listing: None }
  }
}

/// The registration payload: every object except Security, one link
/// per instance.
pub(crate) fn listing<P: Platform>(ctx: &Context<P>) -> String {
  link::write(ctx.registry
                 .iter()
                 .filter(|(id, _)| *id != ObjectId(0)))
}

/// Lifetime for a server, read from the matching Server-object
/// instance (resource 0 = short id, resource 1 = lifetime) or the
/// configured default.
fn lifetime_for<P: Platform>(ctx: &mut Context<P>, short: ShortId) -> Seconds {
  let instances = ctx.registry
                     .get(ObjectId(1))
                     .map(|o| o.instances())
                     .unwrap_or_default();

  for inst in instances {
    let is_this_server = ctx.registry
                            .read_resource(ObjectId(1), inst, ResourceId(0))
                            .ok()
                            .and_then(|r| r.int().ok())
                            .map(|id| id == i64::from(short.0))
                            .unwrap_or(false);

    if is_this_server {
      return ctx.registry
                .read_resource(ObjectId(1), inst, ResourceId(1))
                .ok()
                .and_then(|r| r.int().ok())
                .and_then(|n| u32::try_from(n).ok())
                .map(Seconds)
                .unwrap_or(ctx.config.reg.default_lifetime);
    }
  }

  ctx.config.reg.default_lifetime
}

fn connect<P: Platform>(ctx: &mut Context<P>, ix: usize) -> Option<P::Session> {
  if ctx.servers[ix].session.is_none() {
    let short = ctx.servers[ix].short;
    ctx.servers[ix].session = ctx.platform.connect(short);
  }

  ctx.servers[ix].session.clone()
}

/// Register with one server: `POST /rd?ep=…&lt=…&b=…` carrying the
/// link listing.
pub(crate) fn register<P: Platform>(ctx: &mut Context<P>, short: ShortId) -> Result<(), Error> {
  let endpoint = ctx.endpoint.clone().ok_or(Error::BadRequest)?;
  let ix = ctx.servers
              .iter()
              .position(|s| s.short == short)
              .ok_or(Error::NotFound)?;

  let session = match connect(ctx, ix) {
    | Some(s) => s,
    | None => {
      log::warn!("server {}: connect failed, not registering", short.0);
      ctx.servers[ix].status = ServerStatus::Error;
      return Err(Error::Transport);
    },
  };

  let lifetime = lifetime_for(ctx, short);
  let links = listing(ctx);

  let mut msg = ctx.request(Code::POST, crate::uri::REGISTRATION_SEGMENT);
  msg.add_query(format!("ep={}", endpoint))
     .map_err(|_| Error::Internal)?;
  msg.add_query(format!("lt={}", lifetime.0))
     .map_err(|_| Error::Internal)?;
  msg.add_query(format!("b={}", ctx.binding))
     .map_err(|_| Error::Internal)?;
  msg.set_content_format(toad_msg::ContentFormat::LinkFormat)
     .map_err(|_| Error::Internal)?;
  msg.payload = Payload(links.clone().into_bytes());

  log::debug!("server {}: registering as {:?}, lt={}s", short.0, endpoint, lifetime.0);

  let record = &mut ctx.servers[ix];
  record.status = ServerStatus::Registering;
  record.lifetime = lifetime;
  record.last_listing = Some(links);
  record.last_id = Some(msg.id);

  ctx.enqueue(Peer::Server { short,
                             bootstrap: false },
              session,
              msg,
              Exchange::Register)
}

/// Refresh a registration: `POST <location>`, with a fresh link
/// listing when the object list changed (or `forced`).
pub(crate) fn update<P: Platform>(ctx: &mut Context<P>,
                                  short: ShortId,
                                  forced: bool)
                                  -> Result<(), Error> {
  let ix = ctx.servers
              .iter()
              .position(|s| s.short == short)
              .ok_or(Error::NotFound)?;

  let may_update = match ctx.servers[ix].status {
    | ServerStatus::Registered => true,
    | ServerStatus::Error => forced,
    | _ => false,
  };
  if !may_update {
    return Err(Error::BadRequest);
  }

  let location = match ctx.servers[ix].location.clone() {
    | Some(l) => l,
    | None => return register(ctx, short),
  };

  let session = match connect(ctx, ix) {
    | Some(s) => s,
    | None => {
      ctx.servers[ix].status = ServerStatus::Error;
      return Err(Error::Transport);
    },
  };

  let links = listing(ctx);
  let changed = ctx.servers[ix].last_listing.as_deref() != Some(links.as_str());

  let mut msg = ctx.request(Code::POST, &location);
  if changed || forced {
    msg.set_content_format(toad_msg::ContentFormat::LinkFormat)
       .map_err(|_| Error::Internal)?;
    msg.payload = Payload(links.clone().into_bytes());
  }

  log::debug!("server {}: update ({} payload)",
              short.0,
              if changed || forced { "with" } else { "no" });

  let record = &mut ctx.servers[ix];
  record.status = ServerStatus::Updating;
  record.last_listing = Some(links);
  record.last_id = Some(msg.id);

  ctx.enqueue(Peer::Server { short,
                             bootstrap: false },
              session,
              msg,
              Exchange::Update)
}

/// Best-effort deregistration: `DELETE <location>`.
pub(crate) fn deregister<P: Platform>(ctx: &mut Context<P>, short: ShortId) -> Result<(), Error> {
  let ix = ctx.servers
              .iter()
              .position(|s| s.short == short)
              .ok_or(Error::NotFound)?;

  let (location, session) = match (&ctx.servers[ix].location, &ctx.servers[ix].session) {
    | (Some(l), Some(s)) => (l.clone(), s.clone()),
    | _ => return Err(Error::BadRequest),
  };

  let msg = ctx.request(Code::DELETE, &location);

  let record = &mut ctx.servers[ix];
  record.status = ServerStatus::Deregistering;
  record.last_id = Some(msg.id);

  ctx.enqueue(Peer::Server { short,
                             bootstrap: false },
              session,
              msg,
              Exchange::Deregister)
}

/// Completion of a registration / update / deregistration exchange.
pub(crate) fn on_reply<P: Platform>(ctx: &mut Context<P>,
                                    short: ShortId,
                                    exchange: &Exchange,
                                    resp: Option<&crate::Message>) {
  let now = ctx.now().ok();
  let record = match ctx.servers.iter_mut().find(|s| s.short == short) {
    | Some(r) => r,
    | None => return,
  };

  match (exchange, resp) {
    | (Exchange::Register, Some(m)) if m.code == code::CREATED => {
      let segments: Vec<&str> = m.location_path().unwrap_or_default();
      record.location = Some(segments.join("/"));
      record.status = ServerStatus::Registered;
      record.registered_at = now;
      log::info!("server {}: registered at {:?}", short.0, record.location);
    },
    | (Exchange::Update, Some(m)) if m.code == code::CHANGED => {
      record.status = ServerStatus::Registered;
      record.registered_at = now;
      log::debug!("server {}: registration refreshed", short.0);
    },
    | (Exchange::Deregister, _) => {
      record.status = ServerStatus::Deregistered;
      record.location = None;
      log::info!("server {}: deregistered", short.0);
    },
    | (_, resp) => {
      record.status = ServerStatus::Error;
      log::warn!("server {}: {:?} failed ({:?})",
                 short.0,
                 exchange,
                 resp.map(|m| m.code));
    },
  }
}

/// Client-mode share of the step scheduler: start registrations for
/// untouched servers, schedule updates, kick off a requested (or
/// implicitly needed) bootstrap.
pub(crate) fn step<P: Platform>(ctx: &mut Context<P>,
                                now: Instant<P::Clock>,
                                timeout: &mut Timeout) {
  if ctx.endpoint.is_none() {
    // not configured as a client
    return;
  }

  // no servers to register with: ask a bootstrap server to provision
  if ctx.servers.is_empty()
     && !ctx.bootstrap_servers.is_empty()
     && ctx.bootstrap_state == bootstrap::BootstrapState::NotRequested
  {
    ctx.bootstrap_state = bootstrap::BootstrapState::Requested;
  }

  if ctx.bootstrap_state == bootstrap::BootstrapState::Requested {
    ctx.bootstrap_state = bootstrap::BootstrapState::Initiated;
    if let Err(e) = bootstrap::begin(ctx) {
      log::warn!("bootstrap failed to start: {:?}", e);
      ctx.bootstrap_state = bootstrap::BootstrapState::Failed;
    }
  }

  let shorts: Vec<ShortId> = ctx.servers.iter().map(|s| s.short).collect();
  for short in shorts {
    let record = match ctx.servers.iter().find(|s| s.short == short) {
      | Some(r) => r,
      | None => continue,
    };

    match (record.status, record.registered_at) {
      | (ServerStatus::Unknown, _) => {
        let _ = register(ctx, short);
      },
      | (ServerStatus::Registered, Some(at)) => {
        let due = ctx.config.update_due(record.lifetime);
        let elapsed = time::elapsed(now, at);

        if elapsed >= due {
          let _ = update(ctx, short, false);
        } else {
          timeout.shrink_to(crate::time::Millis(due.0 - elapsed.0));
        }
      },
      | _ => (),
    }
  }
}
