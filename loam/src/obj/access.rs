//! Inbound operations against the local object tree.
//!
//! [`handle_request`](crate::Context::handle_packet) routes numeric
//! paths here; each function resolves the [`Uri`] against the
//! [`Registry`] and forwards to the object's capability, returning the
//! [`Error`] whose code the peer should see.

use std_alloc::vec::Vec;

use loam_tlv::{Record, RecordKind};

use crate::error::Error;
use crate::obj::Registry;
use crate::uri::{InstanceId, Uri};

/// Read a resource, an instance (its default resource set), or a whole
/// object (one nested record per instance).
pub(crate) fn read(registry: &mut Registry, uri: &Uri) -> Result<Vec<Record<'static>>, Error> {
  let obj = registry.get_mut(uri.object).ok_or(Error::NotFound)?;

  match (uri.instance, uri.resource) {
    | (None, _) => {
      let mut out = Vec::new();
      for inst in obj.instances() {
        let mut records = Vec::new();
        obj.read(inst, &mut records)?;
        out.push(Record::object_instance(inst.0, records));
      }
      Ok(out)
    },
    | (Some(inst), None) => {
      let mut records = Vec::new();
      obj.read(inst, &mut records)?;
      Ok(records)
    },
    | (Some(inst), Some(res)) => {
      let mut records = Vec::from([Record::resource(res.0)]);
      obj.read(inst, &mut records)?;
      Ok(records)
    },
  }
}

/// Apply a TLV payload to an instance or a single resource.
pub(crate) fn write(registry: &mut Registry,
                    uri: &Uri,
                    payload: &[u8],
                    bootstrap: bool)
                    -> Result<(), Error> {
  let records = loam_tlv::from_bytes(payload)?;
  let inst = uri.instance.ok_or(Error::BadRequest)?;

  let flat = match records.as_slice() {
    | [wrapper] if wrapper.kind == RecordKind::ObjectInstance => wrapper.children(),
    | rs => rs,
  };

  if let Some(res) = uri.resource {
    if flat.iter().any(|r| r.id != res.0) {
      return Err(Error::BadRequest);
    }
  }

  let obj = registry.get_mut(uri.object).ok_or(Error::NotFound)?;
  obj.write(inst, flat, bootstrap)
}

/// Run the action behind an executable resource.
pub(crate) fn execute(registry: &mut Registry, uri: &Uri, args: &[u8]) -> Result<(), Error> {
  let inst = uri.instance.ok_or(Error::BadRequest)?;
  let res = uri.resource.ok_or(Error::BadRequest)?;

  let obj = registry.get_mut(uri.object).ok_or(Error::NotFound)?;
  obj.execute(inst, res, args)
}

/// Create a new instance from a TLV payload.
///
/// The instance id comes from the path, from an object-instance
/// wrapper in the payload, or is allocated past the highest id in use.
pub(crate) fn create(registry: &mut Registry, uri: &Uri, payload: &[u8]) -> Result<(), Error> {
  let records = loam_tlv::from_bytes(payload)?;
  let obj = registry.get_mut(uri.object).ok_or(Error::NotFound)?;

  let (inst, flat) = match records.as_slice() {
    | [wrapper] if wrapper.kind == RecordKind::ObjectInstance => {
      (uri.instance.unwrap_or(InstanceId(wrapper.id)), wrapper.children())
    },
    | rs => {
      let next = || {
        obj.instances()
           .iter()
           .map(|i| i.0 + 1)
           .max()
           .unwrap_or(0)
      };
      (uri.instance.unwrap_or_else(|| InstanceId(next())), rs)
    },
  };

  if obj.instances().contains(&inst) {
    return Err(Error::BadRequest);
  }

  obj.create(inst, flat)
}

/// Remove one instance.
pub(crate) fn delete(registry: &mut Registry, uri: &Uri) -> Result<(), Error> {
  let inst = uri.instance.ok_or(Error::BadRequest)?;

  let obj = registry.get_mut(uri.object).ok_or(Error::NotFound)?;
  obj.delete(inst)
}
