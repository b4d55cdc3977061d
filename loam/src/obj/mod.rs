//! The object/resource model.
//!
//! A device exposes a flat set of [`Object`]s, each a collection of
//! instances holding numbered resources. Peers operate on the tree
//! through the hierarchical [`Uri`](crate::uri::Uri) model; inbound
//! operations are dispatched in [`access`](crate::obj::access).
//!
//! [`Object`] is a capability trait: every operation has a default
//! implementation answering
//! [`NotImplemented`](crate::error::Error::NotImplemented), and an
//! object opts into the operations it supports by overriding them.

use std_alloc::boxed::Box;
use std_alloc::vec::Vec;

use loam_tlv::Record;

use crate::error::Error;
use crate::uri::{InstanceId, ObjectId, ResourceId};

pub mod access;

/// One LwM2M object: identity, instance list, and the operations it
/// chooses to support.
///
/// Operations return the [`Error`] whose CoAP code the peer should
/// see; the engine forwards them verbatim.
pub trait Object {
  /// The object id this implementation answers for.
  fn id(&self) -> ObjectId;

  /// Instances currently present, in order.
  fn instances(&self) -> Vec<InstanceId>;

  /// Fill `records` with resource values for one instance.
  ///
  /// When `records` is empty the object appends its default resource
  /// set for the instance; otherwise each record arrives carrying the
  /// id of a requested resource and the object fills in its value.
  ///
  /// Unknown resource ids are [`NotFound`](Error::NotFound),
  /// execute-only resources [`MethodNotAllowed`](Error::MethodNotAllowed).
  fn read(&mut self,
          instance: InstanceId,
          records: &mut Vec<Record<'static>>)
          -> Result<(), Error> {
    let _ = (instance, records);
    Err(Error::NotImplemented)
  }

  /// Apply resource values to one instance.
  ///
  /// `bootstrap` is true while a bootstrap sequence is pending, which
  /// makes otherwise-immutable resources (e.g. the short server id)
  /// writable.
  ///
  /// Out-of-range values are [`NotAcceptable`](Error::NotAcceptable),
  /// undecodable ones [`BadRequest`](Error::BadRequest).
  fn write(&mut self,
           instance: InstanceId,
           records: &[Record<'_>],
           bootstrap: bool)
           -> Result<(), Error> {
    let _ = (instance, records, bootstrap);
    Err(Error::NotImplemented)
  }

  /// Create `instance` initialized to defaults, then apply `records`.
  ///
  /// On any failure the half-created instance must be removed again
  /// before the error is returned.
  fn create(&mut self, instance: InstanceId, records: &[Record<'_>]) -> Result<(), Error> {
    let _ = (instance, records);
    Err(Error::NotImplemented)
  }

  /// Remove one instance.
  fn delete(&mut self, instance: InstanceId) -> Result<(), Error> {
    let _ = instance;
    Err(Error::NotImplemented)
  }

  /// Run the action behind an executable resource.
  fn execute(&mut self,
             instance: InstanceId,
             resource: ResourceId,
             args: &[u8])
             -> Result<(), Error> {
    let _ = (instance, resource, args);
    Err(Error::NotImplemented)
  }

  /// Release whatever the object holds; invoked once when the context
  /// closes.
  fn close(&mut self) {}

  /// Deep-copy the object and its instances, leaving any host user
  /// data behind.
  ///
  /// Objects that support this participate in the bootstrap
  /// backup/restore cycle.
  fn snapshot(&self) -> Option<Box<dyn Object>> {
    None
  }

  /// Write a human-readable dump of the object state to the log.
  fn log_state(&self) {}
}

impl core::fmt::Debug for dyn Object {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    write!(f, "Object({})", self.id().0)
  }
}

/// The set of objects implemented by this device.
///
/// Lookup is a linear scan; the table is small (rarely more than ten
/// objects).
#[derive(Debug, Default)]
pub struct Registry {
  objects: Vec<Box<dyn Object>>,
}

impl Registry {
  /// Wrap an object list.
  pub fn new(objects: Vec<Box<dyn Object>>) -> Self {
    Registry { objects }
  }

  /// Whether an object with this id is present.
  pub fn has(&self, id: ObjectId) -> bool {
    self.get(id).is_some()
  }

  /// Whether two objects share an id, which configuration rejects.
  pub(crate) fn has_duplicate_ids(&self) -> bool {
    self.objects
        .iter()
        .enumerate()
        .any(|(ix, o)| {
          self.objects[..ix].iter().any(|other| other.id() == o.id())
        })
  }

  /// Borrow an object by id.
  pub fn get(&self, id: ObjectId) -> Option<&dyn Object> {
    self.objects
        .iter()
        .find(|o| o.id() == id)
        .map(AsRef::as_ref)
  }

  /// Mutably borrow an object by id.
  pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut (dyn Object + 'static)> {
    self.objects
        .iter_mut()
        .find(|o| o.id() == id)
        .map(AsMut::as_mut)
  }

  /// Iterate `(id, instances)` pairs.
  pub fn iter(&self) -> impl Iterator<Item = (ObjectId, Vec<InstanceId>)> + '_ {
    self.objects.iter().map(|o| (o.id(), o.instances()))
  }

  /// Read one resource of one instance through the read capability.
  pub(crate) fn read_resource(&mut self,
                              object: ObjectId,
                              instance: InstanceId,
                              resource: ResourceId)
                              -> Result<Record<'static>, Error> {
    let obj = self.get_mut(object).ok_or(Error::NotFound)?;
    let mut records = Vec::from([Record::resource(resource.0)]);
    obj.read(instance, &mut records)?;

    records.pop().ok_or(Error::Internal)
  }

  /// Snapshot every object that offers the capability.
  pub(crate) fn snapshot_all(&self) -> Vec<Box<dyn Object>> {
    self.objects
        .iter()
        .filter_map(|o| o.snapshot())
        .collect()
  }

  /// Replace objects wholesale with snapshots taken earlier; objects
  /// without a snapshot are left untouched.
  pub(crate) fn restore(&mut self, backup: Vec<Box<dyn Object>>) {
    for restored in backup {
      match self.objects.iter_mut().find(|o| o.id() == restored.id()) {
        | Some(slot) => *slot = restored,
        | None => self.objects.push(restored),
      }
    }
  }

  /// Invoke every object's close hook, in registration order.
  pub(crate) fn close_all(&mut self) {
    for o in self.objects.iter_mut() {
      o.close();
    }
  }
}
