//! signal-rest - a REST gateway in front of per-account signal-cli state.

pub mod account;
pub mod backend;
pub mod config;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod logging;
pub mod qr;
pub mod send;
pub mod server;
pub mod store;
pub mod sync;
