//! Server-mode engine: the registry of clients registered with this
//! context.
//!
//! Clients arrive through the registration interface (`POST /rd`),
//! stay alive by updating before their lifetime runs out, and are
//! swept by the step scheduler once `endOfLife` passes. Every registry
//! change is reported through the platform's monitor hook.

use embedded_time::Instant;
use std_alloc::format;
use std_alloc::string::{String, ToString};
use std_alloc::vec::Vec;
use toad_msg::{Code, MessageOptions};

use crate::binding::BindingMode;
use crate::error::Error;
use crate::platform::{ClientId, MonitorEvent, Platform};
use crate::time::{self, Seconds, Timeout};
use crate::uri::{InstanceId, ObjectId};
use crate::{code, link, Context};

/// One registered client.
pub(crate) struct ClientRecord<P: Platform> {
  /// Engine-allocated id, also the tail of the location
  pub id: ClientId,
  /// The client's endpoint name, unique within the registry
  pub endpoint: String,
  /// Transport session the client registered from
  pub session: P::Session,
  /// Registration lifetime
  pub lifetime: Seconds,
  /// When the registration was made or last refreshed;
  /// `end of life` is this plus the lifetime
  pub registered_at: Instant<P::Clock>,
  /// Objects the client listed, parsed from link-format
  pub objects: Vec<(ObjectId, Option<InstanceId>)>,
  /// Transport binding announced by the client
  pub binding: BindingMode,
  /// MSISDN, for SMS-capable bindings
  pub msisdn: Option<String>,
  /// Registration location handed to the client, e.g. `rd/5`
  pub location: String,
}

impl<P: Platform> core::fmt::Debug for ClientRecord<P> {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("ClientRecord")
     .field("id", &self.id)
     .field("endpoint", &self.endpoint)
     .field("session", &self.session)
     .field("lifetime", &self.lifetime)
     .field("location", &self.location)
     .finish()
  }
}

fn param<'a>(queries: &'a [&'a str], key: &str) -> Option<&'a str> {
  queries.iter().find_map(|q| q.strip_prefix(key))
}

struct Registration {
  endpoint: String,
  lifetime: Option<Seconds>,
  binding: Option<BindingMode>,
  msisdn: Option<String>,
}

fn parse_queries(req: &crate::Message) -> Result<Registration, Error> {
  let queries: Vec<&str> = req.query().map_err(|_| Error::BadRequest)?;

  let endpoint = param(&queries, "ep=").unwrap_or("").to_string();

  let lifetime = param(&queries, "lt=").map(|v| v.parse().map(Seconds))
                                       .transpose()
                                       .map_err(|_| Error::BadRequest)?;

  let binding = param(&queries, "b=").map(str::parse)
                                     .transpose()?;

  let msisdn = param(&queries, "sms=").map(String::from);

  Ok(Registration { endpoint,
                    lifetime,
                    binding,
                    msisdn })
}

/// `POST /rd`: a client registering. Yields the location to put in
/// `Location-Path`.
pub(crate) fn register<P: Platform>(ctx: &mut Context<P>,
                                    req: &crate::Message,
                                    from: P::Session)
                                    -> Result<String, Error> {
  let reg = parse_queries(req)?;
  if reg.endpoint.is_empty() {
    return Err(Error::BadRequest);
  }

  let binding = reg.binding.unwrap_or_default();
  if binding.requires_msisdn() && reg.msisdn.is_none() {
    return Err(Error::BadRequest);
  }

  let objects = link::parse(req.payload.as_bytes())?;
  if objects.is_empty() {
    return Err(Error::BadRequest);
  }

  let lifetime = reg.lifetime.unwrap_or(ctx.config.reg.default_lifetime);
  let now = ctx.now()?;

  // a known endpoint re-registering replaces its record in place
  let (id, location, refreshed) =
    match ctx.clients.iter_mut().find(|c| c.endpoint == reg.endpoint) {
      | Some(c) => {
        c.session = from;
        c.lifetime = lifetime;
        c.registered_at = now;
        c.objects = objects;
        c.binding = binding;
        c.msisdn = reg.msisdn;
        (c.id, c.location.clone(), true)
      },
      | None => {
        let id = ClientId(ctx.next_client);
        ctx.next_client += 1;
        let location = format!("rd/{}", id.0);

        ctx.clients.push(ClientRecord { id,
                                        endpoint: reg.endpoint.clone(),
                                        session: from,
                                        lifetime,
                                        registered_at: now,
                                        objects,
                                        binding,
                                        msisdn: reg.msisdn,
                                        location: location.clone() });
        (id, location, false)
      },
    };

  log::info!("client {:?} {} as {:?}, lt={}s",
             id,
             if refreshed { "re-registered" } else { "registered" },
             reg.endpoint,
             lifetime.0);

  ctx.platform.monitor(MonitorEvent { client: id,
                                      location: &location,
                                      code: if refreshed {
                                        code::CHANGED
                                      } else {
                                        code::CREATED
                                      } });

  Ok(location)
}

fn find_by_location<P: Platform>(ctx: &Context<P>, rest: &[&str]) -> Option<usize> {
  let mut location = String::from(crate::uri::REGISTRATION_SEGMENT);
  for segment in rest {
    location.push('/');
    location.push_str(segment);
  }

  ctx.clients.iter().position(|c| c.location == location)
}

/// `POST /rd/<loc>`: a registration update.
pub(crate) fn update<P: Platform>(ctx: &mut Context<P>,
                                  req: &crate::Message,
                                  rest: &[&str],
                                  from: P::Session)
                                  -> Result<Code, Error> {
  let ix = find_by_location(ctx, rest).ok_or(Error::NotFound)?;
  let reg = parse_queries(req)?;

  let objects = match req.payload.as_bytes() {
    | [] => None,
    | bytes => Some(link::parse(bytes)?),
  };

  let now = ctx.now()?;
  let c = &mut ctx.clients[ix];
  c.session = from;
  c.registered_at = now;
  if let Some(lt) = reg.lifetime {
    c.lifetime = lt;
  }
  if let Some(b) = reg.binding {
    c.binding = b;
  }
  if let Some(objects) = objects {
    c.objects = objects;
  }

  let (id, location) = (c.id, c.location.clone());
  log::debug!("client {:?} refreshed, lt={}s", id, ctx.clients[ix].lifetime.0);

  ctx.platform.monitor(MonitorEvent { client: id,
                                      location: &location,
                                      code: code::CHANGED });

  Ok(code::CHANGED)
}

/// `DELETE /rd/<loc>`: a client deregistering.
pub(crate) fn deregister<P: Platform>(ctx: &mut Context<P>,
                                      rest: &[&str])
                                      -> Result<Code, Error> {
  let ix = find_by_location(ctx, rest).ok_or(Error::NotFound)?;
  let record = ctx.clients.remove(ix);

  forget(ctx, &record);
  log::info!("client {:?} deregistered", record.id);

  ctx.platform.monitor(MonitorEvent { client: record.id,
                                      location: "",
                                      code: code::DELETED });

  Ok(code::DELETED)
}

/// Drop observation state attached to a removed client.
fn forget<P: Platform>(ctx: &mut Context<P>, record: &ClientRecord<P>) {
  ctx.observations.drop_session(&record.session);
  ctx.remote_observations.retain(|o| o.client != record.id);
}

/// Server-mode share of the step scheduler: age out clients whose
/// lifetime has passed, shrink the timeout to the earliest pending
/// end-of-life.
pub(crate) fn step<P: Platform>(ctx: &mut Context<P>,
                                now: Instant<P::Clock>,
                                timeout: &mut Timeout) {
  let mut expired = Vec::new();

  let mut ix = 0;
  while ix < ctx.clients.len() {
    let c = &ctx.clients[ix];
    let elapsed = time::elapsed(now, c.registered_at);
    let life = c.lifetime.millis();

    if elapsed >= life {
      expired.push(ctx.clients.remove(ix));
    } else {
      timeout.shrink_to(crate::time::Millis(life.0 - elapsed.0));
      ix += 1;
    }
  }

  for record in expired {
    log::info!("client {:?} expired (lt={}s)", record.id, record.lifetime.0);
    forget(ctx, &record);
    ctx.platform.monitor(MonitorEvent { client: record.id,
                                        location: "",
                                        code: code::DELETED });
  }
}
