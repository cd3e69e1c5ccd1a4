//! Provider adapters: primary and secondary HTTP clients, the push-feed
//! codec, and the WebSocket transport.

/// Push-feed frame codec.
pub mod codec;

/// Primary provider HTTP client.
pub mod primary;

/// Secondary provider HTTP client with translation boundary.
pub mod secondary;

/// WebSocket stream transport adapter.
pub mod ws;

pub use codec::{BookFrame, CodecError, FeedCodec, FeedFrame, SubscriptionRequest};
pub use primary::{PrimaryClient, PrimaryConfig};
pub use secondary::{SecondaryClient, SecondaryConfig};
pub use ws::WsTransport;
