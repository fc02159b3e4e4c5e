//! Throttle - Per-client Request Throttling
//!
//! This crate implements an admission control engine that throttles requests
//! per client identity. It provides interchangeable strategies (fixed window,
//! leaky bucket, token bucket) that keep their state in process memory, and a
//! distributed token bucket whose state lives in a shared store (Redis) so a
//! fleet of stateless instances enforces one cluster-wide limit.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
pub mod store;
