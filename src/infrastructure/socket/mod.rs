//! Socket Layer
//!
//! Wire message types, the JSON codec, and the transport client that owns
//! one physical WebSocket connection.

pub mod codec;
pub mod messages;
pub mod transport;

pub use codec::{CodecError, JsonCodec};
pub use messages::{
    ClientMessage, OrderRequest, ReconnectFailure, ServerMessage,
};
pub use transport::{SocketClient, SocketEvent, SocketHandle, TransportError};
