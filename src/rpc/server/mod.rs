//! Answering inbound requests.

pub mod request;
pub mod values;

pub use request::*;
pub use values::*;
