//! Value types carried by queries and replies
//!
//! These are plain data objects with a dictionary wire form. The runtime
//! moves them between processes as opaque variant maps.

mod activation;
mod category;
mod completion;
mod result;
mod variant;

pub use activation::*;
pub use category::*;
pub use completion::*;
pub use result::*;
pub use variant::*;
