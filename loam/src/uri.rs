use core::fmt;
use core::str::FromStr;

use std_alloc::string::String;
use std_alloc::vec::Vec;

use crate::error::Error;

/// Identifies an object kind (Security = 0, Server = 1, Device = 3, …)
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(pub u16);

/// Identifies an instance within an object
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstanceId(pub u16);

/// Identifies a resource within an instance
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId(pub u16);

/// An LwM2M path of one, two or three levels:
/// a whole object, one instance, or one resource.
///
/// ```
/// use loam::uri::Uri;
///
/// let uri: Uri = "/1/0/7".parse().unwrap();
/// assert_eq!(uri.to_string(), "/1/0/7");
///
/// assert!("/1/0/7/2".parse::<Uri>().is_err());
/// assert!("/x".parse::<Uri>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Uri {
  /// First level
  pub object: ObjectId,
  /// Second level; `None` addresses the whole object
  pub instance: Option<InstanceId>,
  /// Third level; `None` addresses the whole instance
  pub resource: Option<ResourceId>,
}

impl Uri {
  /// Address a whole object
  pub fn object(object: u16) -> Self {
    Uri { object: ObjectId(object),
          instance: None,
          resource: None }
  }

  /// Address one instance
  pub fn instance(object: u16, instance: u16) -> Self {
    Uri { instance: Some(InstanceId(instance)),
          ..Uri::object(object) }
  }

  /// Address one resource
  pub fn resource(object: u16, instance: u16, resource: u16) -> Self {
    Uri { resource: Some(ResourceId(resource)),
          ..Uri::instance(object, instance) }
  }

  /// Whether one of the two paths contains (or equals) the other.
  ///
  /// A watcher of `/1/0` cares about a change to `/1/0/7`, and a
  /// watcher of `/1/0/7` cares about a rewrite of all of `/1/0`.
  pub fn overlaps(&self, other: &Uri) -> bool {
    self.object == other.object
    && match (self.instance, other.instance) {
      | (Some(a), Some(b)) if a != b => false,
      | (Some(_), Some(_)) => match (self.resource, other.resource) {
        | (Some(a), Some(b)) => a == b,
        | _ => true,
      },
      | _ => true,
    }
  }

  /// The path as Uri-Path segments, without a leading slash
  /// (CoAP options carry segments, not strings).
  pub fn to_segments(&self) -> String {
    use core::fmt::Write;

    let mut out = String::new();
    write!(out, "{}", self.object.0).ok();
    if let Some(InstanceId(i)) = self.instance {
      write!(out, "/{}", i).ok();
    }
    if let Some(ResourceId(r)) = self.resource {
      write!(out, "/{}", r).ok();
    }
    out
  }
}

impl fmt::Display for Uri {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "/{}", self.to_segments())
  }
}

/// Where an inbound request should be routed, selected by the first
/// path segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target<'a> {
  /// `rd`: the registration interface; carries the remaining
  /// location segments (empty on initial registration).
  Registration(Vec<&'a str>),
  /// `bs`: the bootstrap interface.
  Bootstrap,
  /// Numeric: object access.
  Object(Uri),
}

/// First path segment of the registration interface
pub const REGISTRATION_SEGMENT: &str = "rd";
/// First path segment of the bootstrap interface
pub const BOOTSTRAP_SEGMENT: &str = "bs";

fn numeric(s: &str) -> Result<u16, Error> {
  if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
    return Err(Error::BadRequest);
  }

  u16::from_str(s).map_err(|_| Error::BadRequest)
}

/// Route a request by its Uri-Path segments.
///
/// An empty path is a bad request, as are non-numeric or oversized
/// segments in object paths and object paths deeper than three levels.
pub fn target<'a>(mut segments: impl Iterator<Item = &'a str>) -> Result<Target<'a>, Error> {
  let first = segments.next().ok_or(Error::BadRequest)?;

  match first {
    | REGISTRATION_SEGMENT => Ok(Target::Registration(segments.collect())),
    | BOOTSTRAP_SEGMENT => match segments.next() {
      | None => Ok(Target::Bootstrap),
      | Some(_) => Err(Error::BadRequest),
    },
    | _ => {
      let object = numeric(first)?;
      let instance = segments.next().map(numeric).transpose()?;
      let resource = segments.next().map(numeric).transpose()?;

      if segments.next().is_some() {
        return Err(Error::BadRequest);
      }

      Ok(Target::Object(Uri { object: ObjectId(object),
                              instance: instance.map(InstanceId),
                              resource: resource.map(ResourceId) }))
    },
  }
}

impl FromStr for Uri {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match target(s.strip_prefix('/').unwrap_or(s).split('/'))? {
      | Target::Object(uri) => Ok(uri),
      | _ => Err(Error::BadRequest),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn parse(s: &str) -> Result<Target<'_>, Error> {
    target(s.split('/'))
  }

  #[test]
  fn three_levels_roundtrip() {
    for (s, uri) in [("3", Uri::object(3)),
                     ("1/0", Uri::instance(1, 0)),
                     ("1/0/7", Uri::resource(1, 0, 7)),
                     ("65535/65535/65535", Uri::resource(65_535, 65_535, 65_535))]
    {
      assert_eq!(parse(s), Ok(Target::Object(uri)));
      assert_eq!(uri.to_segments(), s);
    }
  }

  #[test]
  fn interface_segments_route() {
    assert_eq!(parse("bs"), Ok(Target::Bootstrap));
    assert_eq!(parse("rd"), Ok(Target::Registration(vec![])));
    assert_eq!(parse("rd/5"), Ok(Target::Registration(vec!["5"])));
  }

  #[test]
  fn bad_shapes_are_rejected() {
    for s in ["", "x", "1/x", "1/0/x", "1/0/7/2", "65536", "1/-1", "1//2", "bs/extra"] {
      assert_eq!(parse(s), Err(Error::BadRequest), "path {:?}", s);
    }
  }

  #[test]
  fn overlap_is_prefix_both_ways() {
    let instance = Uri::instance(1, 0);
    let resource = Uri::resource(1, 0, 7);

    assert!(instance.overlaps(&resource));
    assert!(resource.overlaps(&instance));
    assert!(Uri::object(1).overlaps(&resource));
    assert!(!Uri::resource(1, 0, 6).overlaps(&resource));
    assert!(!Uri::instance(1, 1).overlaps(&resource));
    assert!(!Uri::object(3).overlaps(&resource));
  }
}
