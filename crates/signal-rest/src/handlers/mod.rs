//! HTTP request handlers.

mod extract;
mod general;
pub mod v1;
pub mod v2;

pub use extract::{JsonBody, OptionalJsonBody, PathParams, QueryParams};
pub use general::{about, get_configuration, health, set_configuration};
