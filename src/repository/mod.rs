//! Storage and audit collaborator seams.
//!
//! The engine never talks to the database directly: it is handed these
//! trait objects at startup. That keeps the core free of ambient state and
//! lets the authorization/dispatch tests run against in-memory doubles.

use async_trait::async_trait;

use crate::models::api_key::{Principal, Tier};
use crate::models::customer::{CustomerKeyRow, NewCustomer};
use crate::models::operation::{FieldAssignment, FilterField};

/// Audit log writer
pub mod audit;
/// PostgreSQL implementations
pub mod postgres;

pub use audit::FileAuditSink;
pub use postgres::{PgCustomerRepository, PgKeyStore};

/// A storage collaborator failed.
///
/// Carries only a short internal context label; the driver error text is
/// logged at the boundary and never reaches a caller.
#[derive(Debug, Clone, thiserror::Error)]
#[error("storage operation failed: {0}")]
pub struct StorageError(pub String);

/// Resolves an opaque API key to a principal.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Point lookup. Unknown keys are `Ok(None)`, never an error.
    async fn resolve(&self, apikey: &str) -> Result<Option<Principal>, StorageError>;
}

/// Lookup and mutation of customer/license rows.
///
/// Every lookup returns the customer row joined with its key row; `field`
/// is restricted to the [`FilterField`] allow-list so identifiers are never
/// caller-controlled.
#[async_trait]
pub trait CustomerRepository: Send + Sync {
    /// Joined point lookup by one permitted column. Absence is `Ok(None)`.
    async fn find_by(
        &self,
        field: FilterField,
        value: &str,
    ) -> Result<Option<CustomerKeyRow>, StorageError>;

    /// Display name (`cust_name`) for a customer id, for the response
    /// envelope's `requestor` field.
    async fn display_name(&self, cust_id: i64) -> Result<Option<String>, StorageError>;

    /// Insert a customer row and its key row as one atomic unit and return
    /// the joined result. A failure of either insert leaves nothing behind.
    async fn insert_customer_with_key(
        &self,
        customer: &NewCustomer,
        apikey: &str,
        tier: Tier,
    ) -> Result<CustomerKeyRow, StorageError>;

    /// Apply the given column assignments to the row owned by `cust_id`,
    /// atomically.
    async fn apply_updates(
        &self,
        cust_id: i64,
        changes: &[FieldAssignment],
    ) -> Result<(), StorageError>;
}

/// Fire-and-forget audit trail.
///
/// A failed write is logged and swallowed; it must never abort the primary
/// operation.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, message: &str, actor: Option<&str>);
}
