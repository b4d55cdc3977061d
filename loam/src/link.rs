//! CoRE link-format ([RFC 6690]) subset used by the registration
//! interface.
//!
//! Registration payloads list what a client exposes:
//! `</1/0>,</3/0>`: one link per instance, or a bare `</5>` for an
//! object without instances. Link attributes (`;rt=…`) are accepted
//! and ignored.
//!
//! [RFC 6690]: https://datatracker.ietf.org/doc/html/rfc6690

use core::fmt::Write;

use std_alloc::string::String;
use std_alloc::vec::Vec;

use crate::error::Error;
use crate::uri::{InstanceId, ObjectId};

/// Compose a registration payload from an object listing.
///
/// ```
/// use loam::link;
/// use loam::uri::{InstanceId, ObjectId};
///
/// let payload = link::write([(ObjectId(1), vec![InstanceId(0)]),
///                            (ObjectId(3), vec![InstanceId(0)]),
///                            (ObjectId(5), vec![])].into_iter());
///
/// assert_eq!(payload, "</1/0>,</3/0>,</5>");
/// ```
pub fn write(objects: impl Iterator<Item = (ObjectId, Vec<InstanceId>)>) -> String {
  let mut out = String::new();

  for (ObjectId(obj), instances) in objects {
    if instances.is_empty() {
      if !out.is_empty() {
        out.push(',');
      }
      write!(out, "</{}>", obj).ok();
    } else {
      for InstanceId(inst) in instances {
        if !out.is_empty() {
          out.push(',');
        }
        write!(out, "</{}/{}>", obj, inst).ok();
      }
    }
  }

  out
}

fn numeric(s: &str) -> Result<u16, Error> {
  if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
    return Err(Error::BadRequest);
  }

  s.parse().map_err(|_| Error::BadRequest)
}

/// Parse a registration payload into `(object, instance)` pairs.
///
/// The root link (`</>…`) some clients prepend is skipped; anything
/// else that is not `</obj>` or `</obj/inst>` is a bad request.
pub fn parse(payload: &[u8]) -> Result<Vec<(ObjectId, Option<InstanceId>)>, Error> {
  let text = core::str::from_utf8(payload).map_err(|_| Error::BadRequest)?;
  let mut links = Vec::new();

  for part in text.split(',') {
    let target = part.trim()
                     .split(';')
                     .next()
                     .unwrap_or("")
                     .trim();

    let path = target.strip_prefix('<')
                     .and_then(|t| t.strip_suffix('>'))
                     .ok_or(Error::BadRequest)?
                     .trim_start_matches('/');

    if path.is_empty() {
      // root link, carries only attributes
      continue;
    }

    let mut segments = path.split('/');
    let object = numeric(segments.next().ok_or(Error::BadRequest)?)?;
    let instance = segments.next().map(numeric).transpose()?;

    if segments.next().is_some() {
      return Err(Error::BadRequest);
    }

    links.push((ObjectId(object), instance.map(InstanceId)));
  }

  Ok(links)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parse_reverses_write() {
    let listing = vec![(ObjectId(1), Some(InstanceId(0))),
                       (ObjectId(3), Some(InstanceId(0))),
                       (ObjectId(5), None)];

    let payload = write([(ObjectId(1), vec![InstanceId(0)]),
                         (ObjectId(3), vec![InstanceId(0)]),
                         (ObjectId(5), vec![])].into_iter());

    assert_eq!(parse(payload.as_bytes()), Ok(listing));
  }

  #[test]
  fn attributes_and_root_link_are_skipped() {
    let payload = br#"</>;rt="oma.lwm2m", </1/0>;ct=11542 ,</3/0>"#;

    assert_eq!(parse(payload),
               Ok(vec![(ObjectId(1), Some(InstanceId(0))),
                       (ObjectId(3), Some(InstanceId(0)))]));
  }

  #[test]
  fn garbage_is_a_bad_request() {
    for bad in ["</1/0", "1/0", "</1/0/7/9>", "</x>", "</65536>"].iter() {
      assert_eq!(parse(bad.as_bytes()), Err(Error::BadRequest), "{}", bad);
    }
  }
}
