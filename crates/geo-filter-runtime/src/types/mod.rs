//! Message and error types shared by both sides of the lookup bridge.

pub mod error;
pub mod message;

pub use error::*;
pub use message::*;
