//! Per-connection state and transports

mod context;
mod stream;

pub use context::{ConnectionContext, TlsState};
pub use stream::BackendStream;
