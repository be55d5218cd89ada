//! Chat relay - client-side chat state manager with HTTP and WebSocket
//! transports.

pub mod config;
pub mod model;
pub mod persistence;
pub mod realtime;
pub mod runtime;
pub mod state_machine;
pub mod transport;
