use std_alloc::string::String;

use crate::Message;

pub(crate) fn msg_summary(msg: &Message) -> String {
  use core::fmt::Write;

  let mut buf = String::new();
  write!(buf,
         "{:?} {} {:?} with {} byte payload",
         msg.ty,
         String::from_iter(msg.code.to_human()),
         msg.id,
         msg.payload.0.len()).ok();
  buf
}
