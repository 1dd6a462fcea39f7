//! Customer/license row models.
//!
//! The `customer` table holds one row per customer account; the `apikeys`
//! table holds the key that gates access to it. Lookups always return the
//! two joined on `cust_id = key_id`, which is also what the `query`
//! operation hands back to the caller.

use serde::Serialize;
use serde_json::{Value, json};

/// A customer row joined with its API key row.
///
/// Field names follow the table columns exactly; they are part of the wire
/// contract for `query` responses and must not be renamed.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow, Serialize)]
pub struct CustomerKeyRow {
    pub cust_id: i64,
    pub cust_acct: String,
    pub cust_name: String,
    pub cust_license: String,
    pub cust_active: bool,

    /// Owning customer id, duplicated from the key row. Equal to `cust_id`
    /// by schema convention.
    pub key_id: i64,
    pub apikey: String,
    pub key_type: String,
}

impl CustomerKeyRow {
    /// Value of a single named column, for field-selected queries.
    ///
    /// Returns `None` for names that are not columns of the joined row,
    /// which the caller reports as a usage error.
    pub fn field_value(&self, field: &str) -> Option<Value> {
        let value = match field {
            "cust_id" => json!(self.cust_id),
            "cust_acct" => json!(self.cust_acct),
            "cust_name" => json!(self.cust_name),
            "cust_license" => json!(self.cust_license),
            "cust_active" => json!(self.cust_active),
            "key_id" => json!(self.key_id),
            "apikey" => json!(self.apikey),
            "key_type" => json!(self.key_type),
            _ => return None,
        };
        Some(value)
    }
}

/// Fields for a new customer row, as validated from a `create` payload.
///
/// The customer id is assigned by the database; the API key is minted by
/// the dispatcher and inserted alongside in the same transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCustomer {
    pub cust_acct: String,
    pub cust_name: String,
    pub cust_license: String,
    pub cust_active: bool,
}
