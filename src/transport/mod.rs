//! Transports: stdio and streamable HTTP with SSE resumability.

pub mod event_store;
pub mod http;
pub mod stdio;

pub use event_store::{EventStore, InMemoryEventStore};
pub use http::{HttpMode, HttpTransport};
pub use stdio::StdioTransport;
