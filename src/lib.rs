pub mod auth;
pub mod comments;
pub mod config;
pub mod consistency;
pub mod core;
pub mod follow;
pub mod media;
pub mod models;
pub mod posts;
pub mod router;
pub mod users;

#[cfg(target_arch = "wasm32")]
mod component;
