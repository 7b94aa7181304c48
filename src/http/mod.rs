// src/http/mod.rs
pub mod client;
pub mod telemetry;

pub use client::{OutboundRequest, RetryPolicy, RetryingClient, TransportError, CORRELATION_HEADER};
pub use telemetry::{RequestEvent, ResponseEvent, TelemetryHook};
