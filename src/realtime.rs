//! Realtime WebSocket channel
//!
//! Owns the live socket, decodes server pushes and reports everything it
//! sees as `ChannelEvent`s. Reconnect decisions belong to the state
//! machine, which consults `ReconnectPolicy`.

mod backoff;
mod channel;
mod frame;

pub use backoff::ReconnectPolicy;
pub use channel::{
    ChannelError, ChannelEvent, ChannelState, Connector, FrameSink, FrameStream, RealtimeChannel,
    TungsteniteConnector, WireFrame,
};
pub use frame::{FrameError, InboundEvent, InboundMessage};
