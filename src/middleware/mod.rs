//! Cross-cutting request processing: identity, client IP, rate limiting,
//! request validation and response security headers.

pub mod auth;
pub mod ip;
pub mod rate_limit;
pub mod security_headers;
pub mod validation;

pub use auth::{AdminAuth, Authenticated, BuyerAuth, Identity, Role};
pub use rate_limit::EndpointRateLimiter;
