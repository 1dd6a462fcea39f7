//! The authorization-and-dispatch core.
//!
//! Everything with real decision logic lives here: key validation and tier
//! gating, the operation state machine, and the response envelope shapes.
//! HTTP and storage stay behind the handler and repository seams.

pub mod auth_service;
pub mod operation_service;
pub mod response;
