//! Server-side query machinery
//!
//! The scope servant turns each search, preview or activation request into
//! a [`QueryObject`] (runs the user query) and a [`QueryCtrlObject`] (lets
//! the client cancel it).

mod base;
mod ctrl_object;
mod query_object;

pub use base::*;
pub use ctrl_object::*;
pub use query_object::*;

/// Operation names of query and query control objects
pub mod op {
    pub const RUN: &str = "run";
    pub const CANCEL: &str = "cancel";
    pub const DESTROY: &str = "destroy";
}
