//! Viewer-facing server

mod handler;
mod listener;

pub use handler::ConnectionHandler;
pub use listener::GatewayServer;
