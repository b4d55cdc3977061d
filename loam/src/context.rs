//! The process-wide engine handle.
//!
//! A [`Context`] owns everything: the object registry, the server
//! records (client mode), the client registry (server mode), the
//! transaction list and both observation tables. The host drives it
//! with exactly three inputs: API calls, inbound datagrams
//! ([`handle_packet`](Context::handle_packet)) and time
//! ([`step`](Context::step)).
//!
//! There is no thread and no lock anywhere below this point;
//! concurrent calls into one context from multiple threads are the
//! host's bug to prevent.

use core::mem;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std_alloc::boxed::Box;
use std_alloc::string::{String, ToString};
use std_alloc::vec::Vec;
use toad_msg::{Code, CodeKind, Id, MessageOptions, Payload, Token, TryFromBytes,
               TryIntoBytes, Type};

use crate::binding::BindingMode;
use crate::client::bootstrap::{self, BootstrapState};
use crate::client::{self, ServerRecord, ServerStatus};
use crate::config::Config;
use crate::error::Error;
use crate::obj::{access, Object, Registry};
use crate::observe::{Observations, RemoteObservation};
use crate::platform::{ClientId, Platform, ShortId};
use crate::retry::{RetryTimer, Signal};
use crate::server::{self, ClientRecord};
use crate::time::Timeout;
use crate::transaction::{DmCallback, Exchange, NotifyCallback, Peer, Transaction};
use crate::uri::{self, Target, Uri};
use crate::{code, logging, Message};

/// The LwM2M engine.
///
/// Create one with [`Context::new`], make it a managed device with
/// [`configure`](Context::configure) and
/// [`add_server`](Context::add_server), then loop
/// `recv → handle_packet → step` forever. Server-mode hosts skip
/// `configure` and let clients register instead.
pub struct Context<P: Platform> {
  pub(crate) platform: P,
  pub(crate) config: Config,

  // client mode
  pub(crate) endpoint: Option<String>,
  pub(crate) binding: BindingMode,
  pub(crate) msisdn: Option<String>,
  pub(crate) registry: Registry,
  pub(crate) servers: Vec<ServerRecord<P>>,
  pub(crate) bootstrap_servers: Vec<ServerRecord<P>>,
  pub(crate) bootstrap_state: BootstrapState,
  pub(crate) backup: Vec<Box<dyn Object>>,

  // server mode
  pub(crate) clients: Vec<ClientRecord<P>>,
  pub(crate) next_client: u32,
  pub(crate) remote_observations: Vec<RemoteObservation>,

  // shared
  pub(crate) transactions: Vec<Transaction<P>>,
  pub(crate) observations: Observations<P::Session>,
  next_id: u16,
  rng: ChaCha8Rng,
}

impl<P: Platform> core::fmt::Debug for Context<P> {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("Context")
     .field("endpoint", &self.endpoint)
     .field("servers", &self.servers.len())
     .field("clients", &self.clients.len())
     .field("transactions", &self.transactions.len())
     .finish()
  }
}

impl<P: Platform> Context<P> {
  /// Create an engine around a [`Platform`].
  ///
  /// The initial message id is drawn from a ChaCha8 generator seeded
  /// with [`Config::msg::id_seed`](crate::config::Msg::id_seed).
  pub fn new(platform: P, config: Config) -> Self {
    let mut rng = ChaCha8Rng::seed_from_u64(config.msg.id_seed);
    let next_id = rng.gen();

    Context { platform,
              config,
              endpoint: None,
              binding: BindingMode::default(),
              msisdn: None,
              registry: Registry::default(),
              servers: Vec::new(),
              bootstrap_servers: Vec::new(),
              bootstrap_state: BootstrapState::default(),
              backup: Vec::new(),
              clients: Vec::new(),
              next_client: 0,
              remote_observations: Vec::new(),
              transactions: Vec::new(),
              observations: Observations::default(),
              next_id,
              rng }
  }

  /// Make this context a managed device.
  ///
  /// Callable once. Rejects a missing mandatory object (Security 0,
  /// Server 1, Device 3 must all be present), duplicate object ids,
  /// and an SMS-capable binding without an MSISDN.
  pub fn configure(&mut self,
                   endpoint: &str,
                   binding: BindingMode,
                   msisdn: Option<&str>,
                   objects: Vec<Box<dyn Object>>)
                   -> Result<(), Error> {
    if self.endpoint.is_some() || endpoint.is_empty() {
      return Err(Error::BadRequest);
    }

    let registry = Registry::new(objects);
    let mandatory = [uri::ObjectId(0), uri::ObjectId(1), uri::ObjectId(3)];
    if mandatory.iter().any(|id| !registry.has(*id)) || registry.has_duplicate_ids() {
      return Err(Error::BadRequest);
    }

    if binding.requires_msisdn() && msisdn.is_none() {
      return Err(Error::BadRequest);
    }

    self.endpoint = Some(endpoint.to_string());
    self.binding = binding;
    self.msisdn = msisdn.map(String::from);
    self.registry = registry;

    log::info!("configured as {:?}, binding {}", endpoint, binding);
    Ok(())
  }

  /// Add a server record to the regular or bootstrap list.
  pub fn add_server(&mut self, short: ShortId, is_bootstrap: bool) -> Result<(), Error> {
    let list = if is_bootstrap {
      &mut self.bootstrap_servers
    } else {
      &mut self.servers
    };

    if list.iter().any(|s| s.short == short) {
      return Err(Error::BadRequest);
    }

    list.push(ServerRecord::new(short, &self.config));
    Ok(())
  }

  /// Remove a server record, cancelling its outstanding transactions
  /// without invoking their completions.
  pub fn remove_server(&mut self, short: ShortId, is_bootstrap: bool) -> Result<(), Error> {
    let list = if is_bootstrap {
      &mut self.bootstrap_servers
    } else {
      &mut self.servers
    };

    let ix = list.iter()
                 .position(|s| s.short == short)
                 .ok_or(Error::NotFound)?;
    list.remove(ix);

    self.transactions.retain(|t| {
                       t.peer
                       != Peer::Server { short,
                                         bootstrap: is_bootstrap }
                     });
    Ok(())
  }

  /// Request a device-initiated bootstrap; the next
  /// [`step`](Context::step) starts it.
  pub fn bootstrap(&mut self) -> Result<(), Error> {
    match self.bootstrap_state {
      | BootstrapState::Initiated | BootstrapState::Pending => Err(Error::BadRequest),
      | _ => {
        self.bootstrap_state = BootstrapState::Requested;
        Ok(())
      },
    }
  }

  /// Refresh the registration with one server now.
  ///
  /// `forced` also retries a server whose record sits in
  /// [`ServerStatus::Error`].
  pub fn update_registration(&mut self, short: ShortId, forced: bool) -> Result<(), Error> {
    client::update(self, short, forced)
  }

  /// A resource changed: notify every watcher whose observation
  /// overlaps `uri`.
  pub fn notify(&mut self, uri: Uri) -> Result<(), Error> {
    let mut batches: Vec<(Uri, Vec<(P::Session, Token, u32)>)> = Vec::new();
    for o in self.observations.matching(&uri) {
      let watchers = o.watchers
                      .iter_mut()
                      .map(|w| (w.session.clone(), w.token, w.next_seq()))
                      .collect();
      batches.push((o.uri, watchers));
    }

    for (watched, watchers) in batches {
      let payload = match access::read(&mut self.registry, &watched)
                            .and_then(|rs| {
                              log::trace!("notify {}: {}", watched, loam_tlv::summary(&rs));
                              loam_tlv::to_bytes(&rs).map_err(Error::from)
                            })
      {
        | Ok(p) => p,
        | Err(e) => {
          log::warn!("notify {}: read failed ({:?})", watched, e);
          continue;
        },
      };

      for (session, token, seq) in watchers {
        let mut msg = Message::new(Type::Non, code::CONTENT, self.fresh_id(), token);
        set_observe_seq(&mut msg, seq);
        msg.set_content_format(toad_msg::ContentFormat::Other(TLV_FORMAT))
           .ok();
        msg.payload = Payload(payload.clone());

        let _ = self.transmit(&session, &msg);
      }
    }

    Ok(())
  }

  /// Read `uri` on a registered client; the reply (or timeout)
  /// reaches `callback`.
  pub fn dm_read(&mut self, client: ClientId, uri: Uri, callback: DmCallback) -> Result<(), Error> {
    let session = self.client_session(client)?;
    let msg = self.request(Code::GET, &uri.to_segments());
    self.enqueue(Peer::Client(client), session, msg, Exchange::Dm { uri, callback })
  }

  /// Write TLV records to `uri` on a registered client.
  pub fn dm_write(&mut self,
                  client: ClientId,
                  uri: Uri,
                  records: &[loam_tlv::Record<'_>],
                  callback: DmCallback)
                  -> Result<(), Error> {
    let session = self.client_session(client)?;
    let payload = loam_tlv::to_bytes(records)?;

    let mut msg = self.request(Code::PUT, &uri.to_segments());
    msg.set_content_format(toad_msg::ContentFormat::Other(TLV_FORMAT))
       .map_err(|_| Error::Internal)?;
    msg.payload = Payload(payload);

    self.enqueue(Peer::Client(client), session, msg, Exchange::Dm { uri, callback })
  }

  /// Execute a resource on a registered client.
  pub fn dm_execute(&mut self,
                    client: ClientId,
                    uri: Uri,
                    args: &[u8],
                    callback: DmCallback)
                    -> Result<(), Error> {
    if uri.resource.is_none() {
      return Err(Error::BadRequest);
    }

    let session = self.client_session(client)?;
    let mut msg = self.request(Code::POST, &uri.to_segments());
    msg.payload = Payload(Vec::from(args));

    self.enqueue(Peer::Client(client), session, msg, Exchange::Dm { uri, callback })
  }

  /// Observe `uri` on a registered client. `callback` sees the
  /// initial representation and every later notification.
  pub fn dm_observe(&mut self,
                    client: ClientId,
                    uri: Uri,
                    callback: NotifyCallback)
                    -> Result<(), Error> {
    let session = self.client_session(client)?;
    let mut msg = self.request(Code::GET, &uri.to_segments());
    msg.set_observe(toad_msg::observe::Action::Register)
       .map_err(|_| Error::Internal)?;

    self.enqueue(Peer::Client(client), session, msg, Exchange::Observe { uri, callback })
  }

  /// Stop observing `uri` on a registered client.
  pub fn dm_cancel_observe(&mut self,
                           client: ClientId,
                           uri: Uri,
                           callback: DmCallback)
                           -> Result<(), Error> {
    self.remote_observations
        .retain(|o| !(o.client == client && o.uri == uri));

    let session = self.client_session(client)?;
    let mut msg = self.request(Code::GET, &uri.to_segments());
    msg.set_observe(toad_msg::observe::Action::Deregister)
       .map_err(|_| Error::Internal)?;

    self.enqueue(Peer::Client(client), session, msg, Exchange::Dm { uri, callback })
  }

  /// Advance all timers: retransmit due transactions, complete timed
  /// out ones, schedule registration work, sweep expired clients.
  ///
  /// `timeout` arrives holding the host's desired maximum sleep and
  /// leaves shrunk to the earliest pending deadline.
  pub fn step(&mut self, timeout: &mut Timeout) -> Result<(), Error> {
    let now = self.now()?;

    let mut pending = mem::take(&mut self.transactions);
    let mut keep = Vec::with_capacity(pending.len());

    for mut tx in pending.drain(..) {
      match tx.timer.poll(now) {
        | Ok(Signal::Retry) => {
          log::debug!("retransmit {:?} to {:?}", tx.id, tx.peer);
          let _ = self.transmit(&tx.session, &tx.msg);
          timeout.shrink_to(tx.timer.until_next(now));
          keep.push(tx);
        },
        | Ok(Signal::Exhausted) => {
          log::warn!("transaction {:?} to {:?} timed out", tx.id, tx.peer);
          self.complete(tx, None);
        },
        | Err(nb::Error::WouldBlock) => {
          timeout.shrink_to(tx.timer.until_next(now));
          keep.push(tx);
        },
        | Err(nb::Error::Other(never)) => match never {},
      }
    }

    // transactions enqueued by completions above
    keep.append(&mut self.transactions);
    self.transactions = keep;

    client::step(self, now, timeout);
    server::step(self, now, timeout);

    Ok(())
  }

  /// Feed one received datagram into the engine.
  ///
  /// Responses complete transactions or observation entries; requests
  /// are routed by their first path segment (`rd`, `bs`, numeric) and
  /// answered on `from`.
  pub fn handle_packet(&mut self, datagram: &[u8], from: P::Session) {
    let msg = match Message::try_from_bytes(datagram) {
      | Ok(m) => m,
      | Err(e) => {
        log::warn!("undecodable datagram from {:?}: {:?}", from, e);
        return;
      },
    };

    log::trace!("<- {} from {:?}", logging::msg_summary(&msg), from);

    match (msg.ty, msg.code.kind()) {
      | (Type::Reset, _) => self.observations.drop_session(&from),
      | (_, CodeKind::Empty) => (),
      | (_, CodeKind::Response) => self.handle_response(msg, from),
      | (_, CodeKind::Request) => self.handle_request(msg, from),
    }
  }

  /// Close the engine: objects closed, registrations dropped
  /// best-effort, everything else torn down without completions.
  pub fn close(mut self) {
    self.registry.close_all();

    let registered: Vec<ShortId> = self.servers
                                       .iter()
                                       .filter(|s| {
                                         matches!(s.status,
                                                  ServerStatus::Registered
                                                  | ServerStatus::Updating)
                                       })
                                       .map(|s| s.short)
                                       .collect();
    for short in registered {
      // one DELETE on the wire; no retransmission beyond this point
      let _ = client::deregister(&mut self, short);
    }

    self.observations.clear();
    self.clients.clear();
    self.transactions.clear();

    log::info!("context closed");
  }

  /// Status of a configured server.
  pub fn server_status(&self, short: ShortId) -> Option<ServerStatus> {
    self.servers
        .iter()
        .find(|s| s.short == short)
        .map(|s| s.status)
  }

  /// Registration location returned by a server, once registered.
  pub fn server_location(&self, short: ShortId) -> Option<&str> {
    self.servers
        .iter()
        .find(|s| s.short == short)
        .and_then(|s| s.location.as_deref())
  }

  /// Context-wide bootstrap progress.
  pub fn bootstrap_state(&self) -> BootstrapState {
    self.bootstrap_state
  }

  /// Ids of the currently registered clients (server mode).
  pub fn clients(&self) -> Vec<ClientId> {
    self.clients.iter().map(|c| c.id).collect()
  }

  /// Endpoint name of a registered client.
  pub fn client_endpoint(&self, client: ClientId) -> Option<&str> {
    self.clients
        .iter()
        .find(|c| c.id == client)
        .map(|c| c.endpoint.as_str())
  }

  /// The local object tree.
  pub fn registry_mut(&mut self) -> &mut Registry {
    &mut self.registry
  }

  /// The host platform.
  pub fn platform_mut(&mut self) -> &mut P {
    &mut self.platform
  }

  // ---- internals ----------------------------------------------------

  pub(crate) fn now(&self) -> Result<embedded_time::Instant<P::Clock>, Error> {
    use embedded_time::Clock;

    self.platform.clock().try_now().map_err(Error::from)
  }

  pub(crate) fn fresh_id(&mut self) -> Id {
    let id = Id(self.next_id);
    self.next_id = self.next_id.wrapping_add(1);
    id
  }

  pub(crate) fn fresh_token(&mut self) -> Token {
    let bytes: [u8; 8] = self.rng.gen();
    Token(tinyvec::ArrayVec::from(bytes))
  }

  /// A fresh confirmable request with provisioned id and token.
  pub(crate) fn request(&mut self, code: Code, path: &str) -> Message {
    let (id, token) = (self.fresh_id(), self.fresh_token());
    let mut msg = Message::new(Type::Con, code, id, token);
    if !path.is_empty() {
      msg.set_path(path).ok();
    }
    msg
  }

  /// Serialize and hand one message to the host transport.
  pub(crate) fn transmit(&mut self, session: &P::Session, msg: &Message) -> Result<(), Error> {
    let bytes = msg.clone()
                   .try_into_bytes::<Vec<u8>>()
                   .map_err(|_| Error::Internal)?;

    log::trace!("-> {} to {:?}", logging::msg_summary(msg), session);

    self.platform.send(session, &bytes).map_err(|e| {
                                         log::warn!("send to {:?} failed: {:?}", session, e);
                                         Error::Transport
                                       })
  }

  /// Track a confirmable request and put it on the wire.
  ///
  /// A transport failure is not fatal here: the transaction stays
  /// queued and the step scheduler retransmits it.
  pub(crate) fn enqueue(&mut self,
                        peer: Peer,
                        session: P::Session,
                        msg: Message,
                        exchange: Exchange)
                        -> Result<(), Error> {
    let now = self.now()?;

    if let Some(ix) = self.transactions
                          .iter()
                          .position(|t| t.collides_with(peer, msg.id))
    {
      log::warn!("replacing colliding transaction {:?} to {:?}", msg.id, peer);
      self.transactions.remove(ix);
    }

    let tx = Transaction { id: msg.id,
                           token: msg.token,
                           peer,
                           session,
                           timer: RetryTimer::new(now,
                                                  self.config.msg.retry_strategy,
                                                  self.config.msg.max_retransmits),
                           msg,
                           exchange };

    let _ = self.transmit(&tx.session, &tx.msg);
    self.transactions.push(tx);
    Ok(())
  }

  /// Invoke a removed transaction's completion.
  fn complete(&mut self, tx: Transaction<P>, resp: Option<&Message>) {
    let Transaction { peer,
                      token,
                      exchange,
                      .. } = tx;

    match (peer, exchange) {
      | (Peer::Server { .. }, Exchange::Bootstrap) => bootstrap::on_reply(self, resp),
      | (Peer::Server { short, .. },
         ex @ (Exchange::Register | Exchange::Update | Exchange::Deregister)) => {
        client::on_reply(self, short, &ex, resp)
      },
      | (Peer::Client(client), Exchange::Dm { uri, callback }) => {
        callback(client, &uri, resp.map(|m| (m.code, m.payload.as_bytes())));
      },
      | (Peer::Client(client), Exchange::Observe { uri, mut callback }) => match resp {
        | Some(m) if m.code == code::CONTENT => {
          let seq = observe_seq(m).unwrap_or(0);
          callback(client, &uri, seq, m.code, m.payload.as_bytes());
          self.remote_observations.push(RemoteObservation { client,
                                                            uri,
                                                            token,
                                                            callback });
        },
        | other => {
          let code = other.map(|m| m.code).unwrap_or(code::INTERNAL_SERVER_ERROR);
          callback(client, &uri, 0, code, &[]);
        },
      },
      | (peer, exchange) => {
        log::warn!("dropping mismatched completion {:?} for {:?}", exchange, peer)
      },
    }
  }

  fn handle_response(&mut self, msg: Message, from: P::Session) {
    if let Some(ix) = self.transactions
                          .iter()
                          .position(|t| t.answers(msg.token, &from))
    {
      let tx = self.transactions.remove(ix);
      self.complete(tx, Some(&msg));
      return;
    }

    // not a transaction: maybe a notification for an observation
    // we installed on a client
    let notification = self.remote_observations.iter().position(|o| {
                         o.token == msg.token
                         && self.clients
                                .iter()
                                .any(|c| c.id == o.client && c.session == from)
                       });

    match notification {
      | Some(ix) => {
        let mut o = self.remote_observations.remove(ix);
        let seq = observe_seq(&msg).unwrap_or(0);
        (o.callback)(o.client, &o.uri, seq, msg.code, msg.payload.as_bytes());
        self.remote_observations.push(o);
      },
      | None => {
        log::trace!("response {:?} matches nothing outstanding", msg.token)
      },
    }
  }

  fn handle_request(&mut self, msg: Message, from: P::Session) {
    let segments: Result<Vec<&str>, _> = msg.path();
    let target = match segments {
      | Ok(segments) => uri::target(segments.into_iter()),
      | Err(_) => Err(Error::BadRequest),
    };

    match target {
      | Err(e) => self.respond(&msg, &from, e.code(), Reply::default()),
      | Ok(Target::Bootstrap) => {
        let code = bootstrap::finish(self, &msg);
        self.respond(&msg, &from, code, Reply::default());
      },
      | Ok(Target::Registration(rest)) => {
        let outcome = match msg.code {
          | Code::POST if rest.is_empty() => {
            server::register(self, &msg, from.clone()).map(|location| {
                                                        (code::CREATED, Some(location))
                                                      })
          },
          | Code::POST => server::update(self, &msg, &rest, from.clone()).map(|c| (c, None)),
          | Code::DELETE => server::deregister(self, &rest).map(|c| (c, None)),
          | _ => Err(Error::MethodNotAllowed),
        };

        match outcome {
          | Ok((code, location)) => self.respond(&msg,
                                                 &from,
                                                 code,
                                                 Reply { location,
                                                         ..Reply::default() }),
          | Err(e) => self.respond(&msg, &from, e.code(), Reply::default()),
        }
      },
      | Ok(Target::Object(uri)) => self.handle_object_request(msg.clone(), uri, from),
    }
  }

  fn handle_object_request(&mut self, req: Message, uri: Uri, from: P::Session) {
    let bootstrap_pending = self.bootstrap_state == BootstrapState::Pending;

    let outcome: Result<(Code, Reply), Error> = match req.code {
      | Code::GET => {
        access::read(&mut self.registry, &uri).and_then(|records| {
          let payload = loam_tlv::to_bytes(&records).map_err(Error::from)?;

          let observe = match observe_seq(&req) {
            | Some(0) => {
              self.observations.register(uri, from.clone(), req.token);
              log::debug!("observation installed on {} by {:?}", uri, from);
              Some(0)
            },
            | Some(1) => {
              self.observations.cancel(&uri, &from);
              log::debug!("observation on {} cancelled by {:?}", uri, from);
              None
            },
            | _ => None,
          };

          Ok((code::CONTENT,
              Reply { payload: Some(payload),
                      observe,
                      ..Reply::default() }))
        })
      },
      | Code::PUT => {
        access::write(&mut self.registry, &uri, req.payload.as_bytes(), bootstrap_pending)
          .map(|_| (code::CHANGED, Reply::default()))
      },
      | Code::POST if uri.resource.is_some() => {
        access::execute(&mut self.registry, &uri, req.payload.as_bytes())
          .map(|_| (code::CHANGED, Reply::default()))
      },
      | Code::POST => access::create(&mut self.registry, &uri, req.payload.as_bytes())
        .map(|_| (code::CREATED, Reply::default())),
      | Code::DELETE => {
        access::delete(&mut self.registry, &uri).map(|_| (code::DELETED, Reply::default()))
      },
      | _ => Err(Error::MethodNotAllowed),
    };

    match outcome {
      | Ok((code, reply)) => self.respond(&req, &from, code, reply),
      | Err(e) => self.respond(&req, &from, e.code(), Reply::default()),
    }
  }

  /// Answer an inbound request: piggybacked ACK for CON, NON for NON.
  fn respond(&mut self, req: &Message, from: &P::Session, code: Code, reply: Reply) {
    let (ty, id) = match req.ty {
      | Type::Con => (Type::Ack, req.id),
      | _ => (Type::Non, self.fresh_id()),
    };

    let mut msg = Message::new(ty, code, id, req.token);

    if let Some(location) = &reply.location {
      for segment in location.split('/') {
        msg.add_location_path(segment).ok();
      }
    }

    if let Some(seq) = reply.observe {
      set_observe_seq(&mut msg, seq);
    }

    if let Some(payload) = reply.payload {
      msg.set_content_format(toad_msg::ContentFormat::Other(TLV_FORMAT))
         .ok();
      msg.payload = Payload(payload);
    }

    let _ = self.transmit(from, &msg);
  }

  fn client_session(&self, client: ClientId) -> Result<P::Session, Error> {
    self.clients
        .iter()
        .find(|c| c.id == client)
        .map(|c| c.session.clone())
        .ok_or(Error::NotFound)
  }
}

/// CoAP Content-Format number of the LwM2M TLV encoding.
const TLV_FORMAT: u16 = 11542;

/// Extras attached to a response.
#[derive(Debug, Default)]
struct Reply {
  payload: Option<Vec<u8>>,
  location: Option<String>,
  observe: Option<u32>,
}

fn set_observe_seq(msg: &mut Message, seq: u32) {
  let value: Vec<u8> = seq.to_be_bytes()
                          .iter()
                          .copied()
                          .skip_while(|b| *b == 0)
                          .collect();

  msg.set(toad_msg::no_repeat::OBSERVE, value.into_iter().collect())
     .ok();
}

/// The Observe option as the 0-to-3-byte big-endian number it is;
/// `None` when the option is absent.
fn observe_seq(msg: &Message) -> Option<u32> {
  msg.get_first(toad_msg::no_repeat::OBSERVE)
     .map(|v| v.0.iter().fold(0u32, |n, b| (n << 8) | u32::from(*b)))
}

#[cfg(test)]
mod tests {
  use std::cell::RefCell;
  use std::rc::Rc;

  use loam_tlv::Record;

  use super::*;
  use crate::client::ServerStatus;
  use crate::test::{self, objects, TestPlatform};

  fn step(ctx: &mut Context<TestPlatform>) -> Timeout {
    let mut timeout = Timeout::Never;
    ctx.step(&mut timeout).unwrap();
    timeout
  }

  #[test]
  fn configure_requires_all_mandatory_objects() {
    let mut ctx = Context::new(TestPlatform::default(), Config::default());

    let two: Vec<Box<dyn Object>> =
      vec![Box::new(objects::SecurityObject::default()),
           Box::new(objects::ServerObject::single(1, 60, true, "U"))];
    assert_eq!(ctx.configure("dev", BindingMode::U, None, two),
               Err(Error::BadRequest));

    let three: Vec<Box<dyn Object>> =
      vec![Box::new(objects::SecurityObject::default()),
           Box::new(objects::ServerObject::single(1, 60, true, "U")),
           Box::new(objects::DeviceObject::default())];
    assert_eq!(ctx.configure("dev", BindingMode::U, None, three), Ok(()));
  }

  #[test]
  fn sms_bindings_need_an_msisdn() {
    let objects = || -> Vec<Box<dyn Object>> {
      vec![Box::new(objects::SecurityObject::default()),
           Box::new(objects::ServerObject::single(1, 60, true, "SQ")),
           Box::new(objects::DeviceObject::default())]
    };

    let mut ctx = Context::new(TestPlatform::default(), Config::default());
    assert_eq!(ctx.configure("dev", BindingMode::Sq, None, objects()),
               Err(Error::BadRequest));
    assert_eq!(ctx.configure("dev", BindingMode::Sq, Some("+15551234"), objects()),
               Ok(()));
  }

  #[test]
  fn configure_is_callable_once() {
    let mut ctx = test::client_ctx(123, 60);
    assert_eq!(ctx.configure("again", BindingMode::U, None, vec![]),
               Err(Error::BadRequest));
  }

  #[test]
  fn registration_roundtrip() {
    let mut ctx = test::client_ctx(123, 60);

    step(&mut ctx);

    let sent = test::take_sent(&mut ctx);
    assert_eq!(sent.len(), 1);
    let (session, req) = &sent[0];
    assert_eq!(*session, 123);
    assert_eq!(req.code, Code::POST);
    assert_eq!(req.path::<Vec<&str>>().unwrap(), vec!["rd"]);

    let queries: Vec<&str> = req.query().unwrap();
    assert!(queries.contains(&"ep=urn:test:1"));
    assert!(queries.contains(&"lt=60"));
    assert!(queries.contains(&"b=U"));
    assert_eq!(req.payload.as_bytes(), b"</1/0>,</3/0>");

    assert_eq!(ctx.server_status(ShortId(123)),
               Some(ServerStatus::Registering));

    let mut reply = Message::new(Type::Ack, code::CREATED, req.id, req.token);
    reply.add_location_path("rd").unwrap();
    reply.add_location_path("5").unwrap();
    ctx.handle_packet(&test::dgram(reply), 123);

    assert_eq!(ctx.server_status(ShortId(123)),
               Some(ServerStatus::Registered));
    assert_eq!(ctx.server_location(ShortId(123)), Some("rd/5"));
  }

  #[test]
  fn registration_update_fires_before_lifetime() {
    let mut ctx = test::client_ctx(123, 60);

    step(&mut ctx);
    let sent = test::take_sent(&mut ctx);
    let (_, req) = &sent[0];
    let mut reply = Message::new(Type::Ack, code::CREATED, req.id, req.token);
    reply.add_location_path("rd").unwrap();
    reply.add_location_path("5").unwrap();
    ctx.handle_packet(&test::dgram(reply), 123);

    // 80% of 60s
    test::set_time(&mut ctx, 47_999);
    let timeout = step(&mut ctx);
    assert!(test::take_sent(&mut ctx).is_empty());
    assert_eq!(timeout, Timeout::Millis(1));

    test::set_time(&mut ctx, 48_000);
    step(&mut ctx);

    let sent = test::take_sent(&mut ctx);
    assert_eq!(sent.len(), 1);
    let (_, update) = &sent[0];
    assert_eq!(update.code, Code::POST);
    assert_eq!(update.path::<Vec<&str>>().unwrap(), vec!["rd", "5"]);
    // object list unchanged, empty body suffices
    assert_eq!(update.payload.as_bytes(), b"");
  }

  #[test]
  fn transactions_transmit_at_most_five_times() {
    let mut ctx = test::client_ctx(123, 60);

    step(&mut ctx); // initial registration send
    for t in [1000u64, 2000, 4000, 8000, 16_000, 31_999] {
      test::set_time(&mut ctx, t);
      step(&mut ctx);
    }

    assert_eq!(ctx.platform.sent.len(), 5);
    assert_eq!(ctx.server_status(ShortId(123)),
               Some(ServerStatus::Registering));

    test::set_time(&mut ctx, 32_000);
    step(&mut ctx);

    assert_eq!(ctx.platform.sent.len(), 5);
    assert_eq!(ctx.server_status(ShortId(123)), Some(ServerStatus::Error));
  }

  #[test]
  fn server_registers_and_expires_clients() {
    let mut ctx = test::server_ctx();

    let mut req = test::request(Code::POST, "rd");
    req.add_query("ep=urn:test:1").unwrap();
    req.add_query("lt=10").unwrap();
    req.add_query("b=U").unwrap();
    req.payload = Payload(b"</1/0>,</3/0>".to_vec());
    ctx.handle_packet(&test::dgram(req), 9);

    assert_eq!(ctx.clients().len(), 1);
    assert_eq!(ctx.client_endpoint(ClientId(0)), Some("urn:test:1"));
    assert_eq!(ctx.platform.events.last(),
               Some(&(ClientId(0), String::from("rd/0"), code::CREATED)));

    let sent = test::take_sent(&mut ctx);
    let (_, reply) = &sent[0];
    assert_eq!(reply.code, code::CREATED);
    assert_eq!(reply.location_path::<Vec<&str>>().unwrap(), vec!["rd", "0"]);

    // no update arrives; lifetime is 10s
    test::set_time(&mut ctx, 11_000);
    step(&mut ctx);

    assert!(ctx.clients().is_empty());
    assert_eq!(ctx.platform.events.last(),
               Some(&(ClientId(0), String::new(), code::DELETED)));
  }

  #[test]
  fn reregistration_replaces_the_record() {
    let mut ctx = test::server_ctx();

    for (session, lt) in [(9u8, "lt=10"), (10u8, "lt=20")] {
      let mut req = test::request(Code::POST, "rd");
      req.add_query("ep=urn:test:1").unwrap();
      req.add_query(lt).unwrap();
      req.payload = Payload(b"</1/0>".to_vec());
      ctx.handle_packet(&test::dgram(req), session);
    }

    assert_eq!(ctx.clients(), vec![ClientId(0)]);
    assert_eq!(ctx.platform.events.last(),
               Some(&(ClientId(0), String::from("rd/0"), code::CHANGED)));

    // the refreshed lifetime counts from the second registration
    test::set_time(&mut ctx, 19_000);
    step(&mut ctx);
    assert_eq!(ctx.clients().len(), 1);

    test::set_time(&mut ctx, 21_000);
    step(&mut ctx);
    assert!(ctx.clients().is_empty());
  }

  #[test]
  fn update_refreshes_end_of_life() {
    let mut ctx = test::server_ctx();

    let mut req = test::request(Code::POST, "rd");
    req.add_query("ep=urn:test:1").unwrap();
    req.add_query("lt=10").unwrap();
    req.payload = Payload(b"</1/0>".to_vec());
    ctx.handle_packet(&test::dgram(req), 9);
    test::take_sent(&mut ctx);

    test::set_time(&mut ctx, 8000);
    let update = test::request(Code::POST, "rd/0");
    ctx.handle_packet(&test::dgram(update), 9);

    let sent = test::take_sent(&mut ctx);
    assert_eq!(sent[0].1.code, code::CHANGED);
    assert_eq!(ctx.platform.events.last(),
               Some(&(ClientId(0), String::from("rd/0"), code::CHANGED)));

    // old deadline passes, refreshed one holds
    test::set_time(&mut ctx, 11_000);
    step(&mut ctx);
    assert_eq!(ctx.clients().len(), 1);

    test::set_time(&mut ctx, 18_500);
    step(&mut ctx);
    assert!(ctx.clients().is_empty());
  }

  #[test]
  fn deregister_removes_the_record() {
    let mut ctx = test::server_ctx();

    let mut req = test::request(Code::POST, "rd");
    req.add_query("ep=urn:test:1").unwrap();
    req.payload = Payload(b"</1/0>".to_vec());
    ctx.handle_packet(&test::dgram(req), 9);
    test::take_sent(&mut ctx);

    ctx.handle_packet(&test::dgram(test::request(Code::DELETE, "rd/0")), 9);

    assert!(ctx.clients().is_empty());
    let sent = test::take_sent(&mut ctx);
    assert_eq!(sent[0].1.code, code::DELETED);
    assert_eq!(ctx.platform.events.last(),
               Some(&(ClientId(0), String::new(), code::DELETED)));
  }

  #[test]
  fn read_full_instance_yields_the_default_resource_set() {
    let mut ctx = test::client_ctx(1, 86_400);

    ctx.handle_packet(&test::dgram(test::request(Code::GET, "1/0")), 42);

    let sent = test::take_sent(&mut ctx);
    let (session, reply) = &sent[0];
    assert_eq!(*session, 42);
    assert_eq!(reply.code, code::CONTENT);

    let records = loam_tlv::from_bytes(reply.payload.as_bytes()).unwrap();
    let ids: Vec<u16> = records.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![0, 1, 6, 7]);
    assert_eq!(records[0].int(), Ok(1));
    assert_eq!(records[1].int(), Ok(86_400));
    assert_eq!(records[2].boolean(), Ok(true));
    assert_eq!(records[3].str(), Ok("U"));
  }

  fn write_binding(ctx: &mut Context<TestPlatform>, value: &str) -> Code {
    let mut record = Record::resource(7);
    record.set_str(value);

    let mut req = test::request(Code::PUT, "1/0/7");
    req.payload = Payload(loam_tlv::to_bytes(&[record]).unwrap());
    ctx.handle_packet(&test::dgram(req), 42);

    let sent = test::take_sent(ctx);
    sent[0].1.code
  }

  fn read_binding(ctx: &mut Context<TestPlatform>) -> String {
    ctx.handle_packet(&test::dgram(test::request(Code::GET, "1/0/7")), 42);
    let sent = test::take_sent(ctx);
    let records = loam_tlv::from_bytes(sent[0].1.payload.as_bytes()).unwrap();
    records[0].str().unwrap().into()
  }

  #[test]
  fn binding_writes_are_validated() {
    let mut ctx = test::client_ctx(1, 60);

    assert_eq!(write_binding(&mut ctx, "UQS"), code::CHANGED);
    assert_eq!(read_binding(&mut ctx), "UQS");

    assert_eq!(write_binding(&mut ctx, "X"), code::BAD_REQUEST);
    assert_eq!(read_binding(&mut ctx), "UQS");
  }

  #[test]
  fn unknown_paths_and_methods_are_rejected() {
    let mut ctx = test::client_ctx(1, 60);

    ctx.handle_packet(&test::dgram(test::request(Code::GET, "9/0")), 42);
    assert_eq!(test::take_sent(&mut ctx)[0].1.code, code::NOT_FOUND);

    ctx.handle_packet(&test::dgram(test::request(Code::GET, "1/0/x")), 42);
    assert_eq!(test::take_sent(&mut ctx)[0].1.code, code::BAD_REQUEST);

    // Device object has no write capability
    let mut rec = Record::resource(0);
    rec.set_str("nope");
    let mut req = test::request(Code::PUT, "3/0");
    req.payload = Payload(loam_tlv::to_bytes(&[rec]).unwrap());
    ctx.handle_packet(&test::dgram(req), 42);
    assert_eq!(test::take_sent(&mut ctx)[0].1.code, code::NOT_IMPLEMENTED);
  }

  #[test]
  fn bootstrap_flow_provisions_and_finishes() {
    let mut ctx = Context::new(TestPlatform::default(), Config::default());
    ctx.configure("urn:test:1",
                  BindingMode::U,
                  None,
                  vec![Box::new(objects::SecurityObject::default()) as Box<dyn Object>,
                       Box::new(objects::ServerObject::single(123, 60, true, "U")),
                       Box::new(objects::DeviceObject::default())])
       .unwrap();
    ctx.add_server(ShortId(200), true).unwrap();

    // no regular servers: bootstrap starts implicitly
    step(&mut ctx);
    assert_eq!(ctx.bootstrap_state(), BootstrapState::Initiated);

    let sent = test::take_sent(&mut ctx);
    let (session, req) = &sent[0];
    assert_eq!(*session, 200);
    assert_eq!(req.code, Code::POST);
    assert_eq!(req.path::<Vec<&str>>().unwrap(), vec!["bs"]);
    assert_eq!(req.query::<Vec<&str>>().unwrap(), vec!["ep=urn:test:1"]);

    ctx.handle_packet(&test::dgram(Message::new(Type::Ack,
                                                code::CHANGED,
                                                req.id,
                                                req.token)),
                      200);
    assert_eq!(ctx.bootstrap_state(), BootstrapState::Pending);

    // short server id is writable while bootstrap is pending
    let mut short = Record::resource(0);
    short.set_int(99);
    let mut put = test::request(Code::PUT, "1/0/0");
    put.payload = Payload(loam_tlv::to_bytes(&[short.clone()]).unwrap());
    ctx.handle_packet(&test::dgram(put), 200);
    assert_eq!(test::take_sent(&mut ctx)[0].1.code, code::CHANGED);

    ctx.handle_packet(&test::dgram(test::request(Code::POST, "bs")), 200);
    assert_eq!(ctx.bootstrap_state(), BootstrapState::Finished);
    assert_eq!(test::take_sent(&mut ctx)[0].1.code, code::CHANGED);

    // and immutable again afterwards
    let mut put = test::request(Code::PUT, "1/0/0");
    put.payload = Payload(loam_tlv::to_bytes(&[short]).unwrap());
    ctx.handle_packet(&test::dgram(put), 200);
    assert_eq!(test::take_sent(&mut ctx)[0].1.code, code::METHOD_NOT_ALLOWED);
  }

  #[test]
  fn rejected_bootstrap_fails() {
    let mut ctx = Context::new(TestPlatform::default(), Config::default());
    ctx.configure("urn:test:1",
                  BindingMode::U,
                  None,
                  vec![Box::new(objects::SecurityObject::default()) as Box<dyn Object>,
                       Box::new(objects::ServerObject::single(123, 60, true, "U")),
                       Box::new(objects::DeviceObject::default())])
       .unwrap();
    ctx.add_server(ShortId(200), true).unwrap();

    step(&mut ctx);
    let sent = test::take_sent(&mut ctx);
    let (_, req) = &sent[0];

    ctx.handle_packet(&test::dgram(Message::new(Type::Ack,
                                                code::BAD_REQUEST,
                                                req.id,
                                                req.token)),
                      200);
    assert_eq!(ctx.bootstrap_state(), BootstrapState::Failed);
  }

  #[test]
  fn observation_notifies_with_increasing_sequence() {
    let mut ctx = test::client_ctx(1, 60);

    let mut get = test::request(Code::GET, "1/0/1");
    get.set_observe(toad_msg::observe::Action::Register).unwrap();
    ctx.handle_packet(&test::dgram(get), 42);

    let sent = test::take_sent(&mut ctx);
    let (_, initial) = &sent[0];
    assert_eq!(initial.code, code::CONTENT);
    assert_eq!(observe_seq(initial), Some(0));
    let token = initial.token;

    // lifetime changes; the host signals it
    let mut lt = Record::resource(1);
    lt.set_int(600);
    let mut put = test::request(Code::PUT, "1/0/1");
    put.payload = Payload(loam_tlv::to_bytes(&[lt]).unwrap());
    ctx.handle_packet(&test::dgram(put), 99);
    test::take_sent(&mut ctx);

    ctx.notify(Uri::resource(1, 0, 1)).unwrap();

    let sent = test::take_sent(&mut ctx);
    assert_eq!(sent.len(), 1);
    let (session, notification) = &sent[0];
    assert_eq!(*session, 42);
    assert_eq!(notification.ty, Type::Non);
    assert_eq!(notification.token, token);
    assert_eq!(observe_seq(notification), Some(1));
    let records = loam_tlv::from_bytes(notification.payload.as_bytes()).unwrap();
    assert_eq!(records[0].int(), Ok(600));

    // cancel, then silence
    let mut cancel = test::request(Code::GET, "1/0/1");
    cancel.set_observe(toad_msg::observe::Action::Deregister)
          .unwrap();
    ctx.handle_packet(&test::dgram(cancel), 42);
    test::take_sent(&mut ctx);

    ctx.notify(Uri::resource(1, 0, 1)).unwrap();
    assert!(test::take_sent(&mut ctx).is_empty());
  }

  fn registered_client(ctx: &mut Context<TestPlatform>) -> ClientId {
    let mut req = test::request(Code::POST, "rd");
    req.add_query("ep=urn:test:1").unwrap();
    req.payload = Payload(b"</1/0>,</3/0>".to_vec());
    ctx.handle_packet(&test::dgram(req), 9);
    test::take_sent(ctx);
    ctx.clients()[0]
  }

  #[test]
  fn dm_read_roundtrip_and_timeout() {
    let mut ctx = test::server_ctx();
    let client = registered_client(&mut ctx);

    let got: Rc<RefCell<Vec<Option<Code>>>> = Rc::new(RefCell::new(vec![]));

    let sink = got.clone();
    ctx.dm_read(client,
                Uri::instance(3, 0),
                Box::new(move |_, _, resp| {
                  sink.borrow_mut().push(resp.map(|(code, _)| code));
                }))
       .unwrap();

    let sent = test::take_sent(&mut ctx);
    let (session, req) = &sent[0];
    assert_eq!(*session, 9);
    assert_eq!(req.code, Code::GET);
    assert_eq!(req.path::<Vec<&str>>().unwrap(), vec!["3", "0"]);

    ctx.handle_packet(&test::dgram(Message::new(Type::Ack,
                                                code::CONTENT,
                                                req.id,
                                                req.token)),
                      9);
    assert_eq!(*got.borrow(), vec![Some(code::CONTENT)]);

    // a second read left unanswered surfaces as None
    let sink = got.clone();
    ctx.dm_read(client,
                Uri::instance(3, 0),
                Box::new(move |_, _, resp| {
                  sink.borrow_mut().push(resp.map(|(code, _)| code));
                }))
       .unwrap();
    for t in [2000u64, 4000, 8000, 16_000, 32_000] {
      test::set_time(&mut ctx, t);
      step(&mut ctx);
    }

    assert_eq!(*got.borrow(), vec![Some(code::CONTENT), None]);
  }

  #[test]
  fn dm_observe_fans_notifications_to_the_callback() {
    let mut ctx = test::server_ctx();
    let client = registered_client(&mut ctx);

    let got: Rc<RefCell<Vec<(u32, Code)>>> = Rc::new(RefCell::new(vec![]));

    let sink = got.clone();
    ctx.dm_observe(client,
                   Uri::resource(3, 0, 1),
                   Box::new(move |_, _, seq, code, _| {
                     sink.borrow_mut().push((seq, code));
                   }))
       .unwrap();

    let sent = test::take_sent(&mut ctx);
    let (_, req) = &sent[0];
    assert_eq!(req.observe(), Some(toad_msg::observe::Action::Register));

    // install reply
    let mut accept = Message::new(Type::Ack, code::CONTENT, req.id, req.token);
    set_observe_seq(&mut accept, 0);
    ctx.handle_packet(&test::dgram(accept), 9);

    // later notification, same token, fresh id
    let mut notification =
      Message::new(Type::Non, code::CONTENT, Id(0x4242), req.token);
    set_observe_seq(&mut notification, 1);
    ctx.handle_packet(&test::dgram(notification), 9);

    assert_eq!(*got.borrow(),
               vec![(0, code::CONTENT), (1, code::CONTENT)]);
  }
}
