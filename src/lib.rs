pub mod api;
pub mod config;
pub mod handler;
pub mod net;
pub mod server;

pub use server::{CastServer, ServerOptions};
