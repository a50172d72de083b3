//! Reply channels
//!
//! ```text
//!  scope process                                 client process
//! ┌──────────────────────────┐                 ┌─────────────────────────┐
//! │ SearchReply ─► ReplyImpl │  push/finished  │ ReplyObject             │
//! │  (cardinality, in-flight │────────────────►│  (decoders, reaper)     │
//! │   accounting)            │    oneway       │    └─► SearchListener   │
//! └──────────────────────────┘                 └─────────────────────────┘
//! ```

mod handles;
mod in_flight;
mod listener;
mod query_ctrl;
mod reply_impl;
mod reply_object;

pub use handles::*;
pub use in_flight::*;
pub use listener::*;
pub use query_ctrl::*;
pub use reply_impl::*;
pub use reply_object::*;

#[cfg(test)]
pub(crate) use reply_impl::tests::RecordingSink;
#[cfg(test)]
pub(crate) use reply_object::tests::RecordingListener;
