//! HTTP request handlers.
//!
//! Handlers are thin: they translate the HTTP surface (verb, body bytes)
//! into a dispatcher call and hand the resulting envelope back as JSON.

/// The /api operation surface
pub mod api;
/// Service health endpoint
pub mod health;
