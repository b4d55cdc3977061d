#![allow(dead_code)]

use core::cell::Cell;

use embedded_time::rate::Fraction;
use embedded_time::Instant;
use toad_msg::{Code, Id, Token, TryFromBytes, TryIntoBytes, Type};

use crate::binding::BindingMode;
use crate::config::Config;
use crate::obj::Object;
use crate::platform::{ClientId, MonitorEvent, Platform, ShortId};
use crate::{Context, Message};

/// Settable clock; 1 tick = 1 millisecond.
#[derive(Debug, Default)]
pub struct ClockMock(pub Cell<u64>);

impl ClockMock {
  pub fn set(&self, millis: u64) {
    self.0.set(millis);
  }
}

impl embedded_time::Clock for ClockMock {
  type T = u64;

  const SCALING_FACTOR: Fraction = Fraction::new(1, 1000);

  fn try_now(&self) -> Result<Instant<Self>, embedded_time::clock::Error> {
    Ok(Instant::new(self.0.get()))
  }
}

/// Host double: captures outbound datagrams and monitor events,
/// mints `u8` sessions (the short server id, truncated).
#[derive(Debug, Default)]
pub struct TestPlatform {
  pub clock: ClockMock,
  pub sent: Vec<(u8, Vec<u8>)>,
  pub events: Vec<(ClientId, String, Code)>,
  pub refuse_connect: bool,
}

impl Platform for TestPlatform {
  type Clock = ClockMock;
  type Session = u8;
  type Error = ();

  fn clock(&self) -> &ClockMock {
    &self.clock
  }

  fn connect(&mut self, short: ShortId) -> Option<u8> {
    if self.refuse_connect {
      None
    } else {
      Some(short.0 as u8)
    }
  }

  fn send(&mut self, session: &u8, datagram: &[u8]) -> Result<(), ()> {
    self.sent.push((*session, Vec::from(datagram)));
    Ok(())
  }

  fn monitor(&mut self, event: MonitorEvent<'_>) {
    self.events
        .push((event.client, event.location.into(), event.code));
  }
}

/// A context configured as the device `urn:test:1` with the three
/// mandatory objects and one regular server.
pub fn client_ctx(short: u16, lifetime: u32) -> Context<TestPlatform> {
  let mut ctx = Context::new(TestPlatform::default(), Config::default());

  ctx.configure("urn:test:1",
                BindingMode::U,
                None,
                vec![Box::new(objects::SecurityObject::default()) as Box<dyn Object>,
                     Box::new(objects::ServerObject::single(short, lifetime, true, "U")),
                     Box::new(objects::DeviceObject::default())])
     .unwrap();
  ctx.add_server(ShortId(short), false).unwrap();

  ctx
}

/// A bare context for server-mode tests.
pub fn server_ctx() -> Context<TestPlatform> {
  Context::new(TestPlatform::default(), Config::default())
}

pub fn set_time(ctx: &mut Context<TestPlatform>, millis: u64) {
  ctx.platform.clock.set(millis);
}

/// Drain and parse everything the context sent so far.
pub fn take_sent(ctx: &mut Context<TestPlatform>) -> Vec<(u8, Message)> {
  ctx.platform
     .sent
     .drain(..)
     .map(|(session, dgram)| (session, Message::try_from_bytes(dgram).unwrap()))
     .collect()
}

/// An inbound request as a peer would build it.
pub fn request(code: Code, path: &str) -> Message {
  let mut msg = Message::new(Type::Con, code, Id(0x7070), Token([9].into_iter().collect()));
  if !path.is_empty() {
    use toad_msg::MessageOptions;
    msg.set_path(path).unwrap();
  }
  msg
}

pub fn dgram(msg: Message) -> Vec<u8> {
  msg.try_into_bytes::<Vec<u8>>().unwrap()
}

/// Sample objects: consumers of the [`Object`] contract, used by the
/// scenario tests. The Server object mirrors the standard resource
/// table (0 short id, 1 lifetime, 6 storing, 7 binding; 4 and 8
/// executable).
pub mod objects {
  use loam_tlv::Record;

  use crate::binding::BindingMode;
  use crate::error::Error;
  use crate::obj::Object;
  use crate::uri::{InstanceId, ObjectId, ResourceId};

  /// Object 0; present because configuration demands it, empty
  /// because nothing in the engine core reads it.
  #[derive(Debug, Clone)]
  pub struct SecurityObject {
    pub instances: Vec<u16>,
  }

  impl Default for SecurityObject {
    fn default() -> Self {
      SecurityObject { instances: vec![0] }
    }
  }

  impl Object for SecurityObject {
    fn id(&self) -> ObjectId {
      ObjectId(0)
    }

    fn instances(&self) -> Vec<InstanceId> {
      self.instances.iter().copied().map(InstanceId).collect()
    }

    fn snapshot(&self) -> Option<Box<dyn Object>> {
      Some(Box::new(self.clone()))
    }
  }

  /// Object 3, one instance, two readable string resources.
  #[derive(Debug, Clone)]
  pub struct DeviceObject {
    pub manufacturer: &'static str,
    pub model: &'static str,
  }

  impl Default for DeviceObject {
    fn default() -> Self {
      DeviceObject { manufacturer: "loam",
                     model: "loam-01" }
    }
  }

  impl Object for DeviceObject {
    fn id(&self) -> ObjectId {
      ObjectId(3)
    }

    fn instances(&self) -> Vec<InstanceId> {
      vec![InstanceId(0)]
    }

    fn read(&mut self,
            instance: InstanceId,
            records: &mut Vec<Record<'static>>)
            -> Result<(), Error> {
      if instance != InstanceId(0) {
        return Err(Error::NotFound);
      }

      if records.is_empty() {
        records.push(Record::resource(0));
        records.push(Record::resource(1));
      }

      for r in records.iter_mut() {
        match r.id {
          | 0 => r.set_borrowed_str(self.manufacturer),
          | 1 => r.set_borrowed_str(self.model),
          | _ => return Err(Error::NotFound),
        }
      }
      Ok(())
    }

    fn snapshot(&self) -> Option<Box<dyn Object>> {
      Some(Box::new(self.clone()))
    }
  }

  /// One instance of the Server object.
  #[derive(Debug, Clone, Default)]
  pub struct ServerInstance {
    pub id: u16,
    pub short_id: u16,
    pub lifetime: u32,
    pub storing: bool,
    pub binding: String,
  }

  /// Object 1, the Server object.
  #[derive(Debug, Clone, Default)]
  pub struct ServerObject {
    pub instances: Vec<ServerInstance>,
  }

  impl ServerObject {
    /// One hardcoded instance, the way a factory-provisioned device
    /// ships.
    pub fn single(short_id: u16, lifetime: u32, storing: bool, binding: &str) -> Self {
      ServerObject { instances: vec![ServerInstance { id: 0,
                                                      short_id,
                                                      lifetime,
                                                      storing,
                                                      binding: binding.into() }] }
    }

    fn find_mut(&mut self, instance: InstanceId) -> Option<&mut ServerInstance> {
      self.instances.iter_mut().find(|i| i.id == instance.0)
    }

    fn fill(target: &ServerInstance, record: &mut Record<'static>) -> Result<(), Error> {
      match record.id {
        | 0 => record.set_int(i64::from(target.short_id)),
        | 1 => record.set_int(i64::from(target.lifetime)),
        | 6 => record.set_bool(target.storing),
        | 7 => record.set_str(&target.binding),
        | 2 | 3 | 5 => return Err(Error::NotFound),
        | 4 | 8 => return Err(Error::MethodNotAllowed),
        | _ => return Err(Error::NotFound),
      }
      Ok(())
    }
  }

  impl Object for ServerObject {
    fn id(&self) -> ObjectId {
      ObjectId(1)
    }

    fn instances(&self) -> Vec<InstanceId> {
      self.instances.iter().map(|i| InstanceId(i.id)).collect()
    }

    fn read(&mut self,
            instance: InstanceId,
            records: &mut Vec<Record<'static>>)
            -> Result<(), Error> {
      let target = self.instances
                       .iter()
                       .find(|i| i.id == instance.0)
                       .ok_or(Error::NotFound)?;

      if records.is_empty() {
        for rid in [0u16, 1, 6, 7] {
          records.push(Record::resource(rid));
        }
      }

      for r in records.iter_mut() {
        Self::fill(target, r)?;
      }
      Ok(())
    }

    fn write(&mut self,
             instance: InstanceId,
             records: &[Record<'_>],
             bootstrap: bool)
             -> Result<(), Error> {
      let target = self.find_mut(instance).ok_or(Error::NotFound)?;

      for r in records {
        match r.id {
          | 0 if !bootstrap => return Err(Error::MethodNotAllowed),
          | 0 => {
            let v = r.int().map_err(|_| Error::BadRequest)?;
            if (1..=0xFFFF).contains(&v) {
              target.short_id = v as u16;
            } else {
              return Err(Error::NotAcceptable);
            }
          },
          | 1 => {
            let v = r.int().map_err(|_| Error::BadRequest)?;
            if (0..=i64::from(u32::MAX)).contains(&v) {
              target.lifetime = v as u32;
            } else {
              return Err(Error::NotAcceptable);
            }
          },
          | 6 => target.storing = r.boolean().map_err(|_| Error::BadRequest)?,
          | 7 => {
            let s = r.str().map_err(|_| Error::BadRequest)?;
            s.parse::<BindingMode>()?;
            target.binding = s.into();
          },
          | 2 | 3 | 5 => return Err(Error::NotFound),
          | 4 | 8 => return Err(Error::MethodNotAllowed),
          | _ => return Err(Error::NotFound),
        }
      }
      Ok(())
    }

    fn create(&mut self, instance: InstanceId, records: &[Record<'_>]) -> Result<(), Error> {
      self.instances.push(ServerInstance { id: instance.0,
                                           binding: "U".into(),
                                           ..ServerInstance::default() });

      match self.write(instance, records, true) {
        | Ok(()) => Ok(()),
        | Err(e) => {
          self.instances.retain(|i| i.id != instance.0);
          Err(e)
        },
      }
    }

    fn delete(&mut self, instance: InstanceId) -> Result<(), Error> {
      let before = self.instances.len();
      self.instances.retain(|i| i.id != instance.0);

      if self.instances.len() == before {
        Err(Error::NotFound)
      } else {
        Ok(())
      }
    }

    fn execute(&mut self,
               instance: InstanceId,
               resource: ResourceId,
               _args: &[u8])
               -> Result<(), Error> {
      if self.find_mut(instance).is_none() {
        return Err(Error::NotFound);
      }

      match resource.0 {
        | 4 => Err(Error::NotFound),
        | 8 => Err(Error::NotImplemented),
        | _ => Err(Error::MethodNotAllowed),
      }
    }

    fn snapshot(&self) -> Option<Box<dyn Object>> {
      Some(Box::new(self.clone()))
    }

    fn log_state(&self) {
      for i in &self.instances {
        log::debug!("server instance {}: shortId={} lifetime={} storing={} binding={}",
                    i.id,
                    i.short_id,
                    i.lifetime,
                    i.storing,
                    i.binding);
      }
    }
  }
}
