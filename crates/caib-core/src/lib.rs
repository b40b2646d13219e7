//! caib core library
//!
//! Types, manifest preprocessing, retry policy and the build API port
//! shared by the `caib` command-line client.

pub mod api;
pub mod config;
pub mod error;
pub mod manifest;
pub mod retry;
pub mod types;

pub use api::*;
pub use config::*;
pub use error::*;
pub use manifest::*;
pub use retry::*;
pub use types::*;
