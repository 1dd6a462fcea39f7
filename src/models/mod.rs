//! Data models: database entities and the wire-level operation payload.

/// API key tier and authenticated principal
pub mod api_key;
/// Customer/license rows
pub mod customer;
/// Operation payload parsing (the wire contract)
pub mod operation;
