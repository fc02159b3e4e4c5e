//! HTTP boundary gated by the rate limiting engine.

mod gate;
mod server;
mod service;

pub use gate::{GateDecision, RateLimitGate};
pub use server::HttpServer;
pub use service::{router, ClientQuery, Message};
