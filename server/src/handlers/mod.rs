//! Request handlers for the collection endpoints.

mod pull;
mod push;

pub use pull::*;
pub use push::*;
