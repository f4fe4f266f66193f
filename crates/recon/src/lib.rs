pub mod bruteforce;
pub mod config;
pub mod diff;
pub mod dns;
pub mod domain;
mod error;
pub mod fingerprint;
pub mod model;
pub mod orchestrator;
pub mod sources;
pub mod store;
pub mod takeover;

pub use error::{Error, Result};
