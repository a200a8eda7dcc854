//! HTTP request handlers.

pub mod common;
pub mod upload;

pub use common::*;
pub use upload::*;
