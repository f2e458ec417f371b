//! Application configuration
//!
//! Defaults live in [`schema`]; [`store`] layers an optional JSON file and
//! environment overrides on top of them.

mod schema;
mod store;

pub use schema::*;
pub use store::{apply_env_overrides, load_config, STUN_SERVER_ENV};
