pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod links;
pub mod models;
pub mod reclaim;
pub mod redirect;
pub mod stats;
pub mod storage;

pub use engine::Engine;
pub use error::{AuthError, AuthResult, LinkError, LinkResult};
