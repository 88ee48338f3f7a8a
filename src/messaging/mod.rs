//! Chat transport seam: outbound publishing and the JSON-lines transport

pub mod publisher;
pub mod transport;

pub use publisher::{ChannelMessagePublisher, MessagePublisher, MockMessagePublisher};
pub use transport::ConsoleTransport;
