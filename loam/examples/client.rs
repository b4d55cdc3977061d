//! A minimal LwM2M client over plain UDP.
//!
//! Registers with an LwM2M server as `urn:loam:demo`, keeps the
//! registration fresh, and answers whatever the server reads or
//! writes on its Server and Device objects.
//!
//! ```text
//! LOAM_SERVER=127.0.0.1:5683 RUST_LOG=debug cargo run --example client
//! ```

use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use loam::binding::BindingMode;
use loam::config::Config;
use loam::error::Error;
use loam::obj::Object;
use loam::platform::{Platform, ShortId};
use loam::time::Timeout;
use loam::uri::{InstanceId, ObjectId, ResourceId};
use loam::Context;
use loam_tlv::Record;

const SHORT_ID: u16 = 123;

struct Udp {
  clock: loam::std::Clock,
  socket: UdpSocket,
  server: SocketAddr,
}

impl Platform for Udp {
  type Clock = loam::std::Clock;
  type Session = SocketAddr;
  type Error = std::io::Error;

  fn clock(&self) -> &loam::std::Clock {
    &self.clock
  }

  fn connect(&mut self, _short: ShortId) -> Option<SocketAddr> {
    Some(self.server)
  }

  fn send(&mut self, session: &SocketAddr, datagram: &[u8]) -> Result<(), std::io::Error> {
    self.socket.send_to(datagram, session).map(|_| ())
  }
}

/// Object 0. Present because configuration requires it; this demo
/// holds no keying material.
struct Security;

impl Object for Security {
  fn id(&self) -> ObjectId {
    ObjectId(0)
  }

  fn instances(&self) -> Vec<InstanceId> {
    vec![InstanceId(0)]
  }
}

/// Object 1 with the standard resource set
/// (0 short id, 1 lifetime, 6 storing, 7 binding).
struct Server {
  short_id: u16,
  lifetime: u32,
  storing: bool,
  binding: String,
}

impl Object for Server {
  fn id(&self) -> ObjectId {
    ObjectId(1)
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
      records.extend([0u16, 1, 6, 7].map(Record::resource));
    }

    for r in records.iter_mut() {
      match r.id {
        | 0 => r.set_int(i64::from(self.short_id)),
        | 1 => r.set_int(i64::from(self.lifetime)),
        | 6 => r.set_bool(self.storing),
        | 7 => r.set_str(&self.binding),
        | _ => return Err(Error::NotFound),
      }
    }
    Ok(())
  }

  fn write(&mut self,
           instance: InstanceId,
           records: &[Record<'_>],
           bootstrap: bool)
           -> Result<(), Error> {
    if instance != InstanceId(0) {
      return Err(Error::NotFound);
    }

    for r in records {
      match r.id {
        | 0 if !bootstrap => return Err(Error::MethodNotAllowed),
        | 0 => self.short_id = r.int().map_err(|_| Error::BadRequest)? as u16,
        | 1 => self.lifetime = r.int().map_err(|_| Error::BadRequest)? as u32,
        | 6 => self.storing = r.boolean().map_err(|_| Error::BadRequest)?,
        | 7 => {
          let s = r.str().map_err(|_| Error::BadRequest)?;
          s.parse::<BindingMode>()?;
          self.binding = s.into();
        },
        | _ => return Err(Error::NotFound),
      }
    }
    Ok(())
  }

  fn execute(&mut self,
             _instance: InstanceId,
             resource: ResourceId,
             _args: &[u8])
             -> Result<(), Error> {
    match resource.0 {
      | 8 => {
        log::info!("registration update triggered by the server");
        Ok(())
      },
      | _ => Err(Error::MethodNotAllowed),
    }
  }
}

/// Object 3.
struct Device;

impl Object for Device {
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
      records.extend([0u16, 1].map(Record::resource));
    }

    for r in records.iter_mut() {
      match r.id {
        | 0 => r.set_borrowed_str("loam"),
        | 1 => r.set_borrowed_str("demo-client"),
        | _ => return Err(Error::NotFound),
      }
    }
    Ok(())
  }
}

pub fn main() {
  simple_logger::init_with_env().unwrap();

  let server: SocketAddr = std::env::var("LOAM_SERVER")
                             .unwrap_or_else(|_| "127.0.0.1:5683".into())
                             .parse()
                             .unwrap();

  let socket = UdpSocket::bind("0.0.0.0:56830").unwrap();
  socket.set_read_timeout(Some(Duration::from_millis(250)))
        .unwrap();

  let platform = Udp { clock: loam::std::Clock::new(),
                       socket: socket.try_clone().unwrap(),
                       server };

  let mut ctx = Context::new(platform, Config::default());
  ctx.configure("urn:loam:demo",
                BindingMode::U,
                None,
                vec![Box::new(Security) as Box<dyn Object>,
                     Box::new(Server { short_id: SHORT_ID,
                                       lifetime: 300,
                                       storing: false,
                                       binding: "U".into() }),
                     Box::new(Device)])
     .unwrap();
  ctx.add_server(ShortId(SHORT_ID), false).unwrap();

  let mut buf = [0u8; 1152];
  loop {
    match socket.recv_from(&mut buf) {
      | Ok((n, from)) => ctx.handle_packet(&buf[..n], from),
      | Err(e)
        if e.kind() == std::io::ErrorKind::WouldBlock
           || e.kind() == std::io::ErrorKind::TimedOut => (),
      | Err(e) => panic!("recv failed: {}", e),
    }

    let mut timeout = Timeout::Millis(1000);
    ctx.step(&mut timeout).unwrap();
  }
}
