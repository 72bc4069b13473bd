//! Shared plumbing for the bridge client
//!
//! - Circuit breaker so a dead bridge fails fast instead of timing out
//! - Token bucket rate limiter for outbound requests

pub mod circuit_breaker;
pub mod rate_limiter;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use rate_limiter::{RateLimiter, RateLimiterConfig};
