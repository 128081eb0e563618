//! Duplex callback channels: server-to-client result streaming per session.

pub mod channel;
pub mod config;
pub mod registry;

pub use channel::{CallbackListener, CallbackSender, ChannelError, ListenerError, OutboundMessage};
pub use config::ChannelConfig;
pub use registry::{SessionHandle, SessionRegistry};
