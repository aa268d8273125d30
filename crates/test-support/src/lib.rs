//! WebSocket test clients for driving the relay-hub and subscription-hub
//! services in integration tests. These talk to a real running service
//! instance; they don't stand one up themselves.

pub mod mock_ws_client;

pub use mock_ws_client::{InboundFrame, RelayTestClient, SubscriberTestClient};
