//! Realtime channel to the tracking backend.

pub mod channel;
pub mod event;
pub mod socketio;
pub mod transport;

pub use channel::{ConnectionState, RealtimeChannel};
pub use event::{ChannelEvent, InboundEvent, Outbound};
pub use socketio::SocketIoTransport;
pub use transport::{EventSink, InboundQueues, Transport};
