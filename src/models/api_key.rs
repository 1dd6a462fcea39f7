//! API key tiers and the authenticated principal.
//!
//! API keys are opaque strings stored in the `apikeys` table. Each key
//! belongs to exactly one customer: by schema convention `key_id` equals the
//! owning customer's `cust_id`, so the key id doubles as the owner id.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Privilege tier of an API key.
///
/// Stored lowercase in the `key_type` column and serialized lowercase in
/// JSON.
///
/// # Access Rules
///
/// - `Customer`: read-only, and only the record whose `cust_id` matches the
///   key's own `key_id`
/// - `Admin`: may read any record and invoke write operations
/// - `Super`: same surface as `Admin`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Customer,
    Admin,
    Super,
}

impl Tier {
    /// Lowercase name as stored in `key_type` and shown in diagnostics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Customer => "customer",
            Tier::Admin => "admin",
            Tier::Super => "super",
        }
    }

    /// Whether this tier may invoke write-intent operations and read
    /// arbitrary rows.
    pub fn is_elevated(&self) -> bool {
        matches!(self, Tier::Admin | Tier::Super)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer" => Ok(Tier::Customer),
            "admin" => Ok(Tier::Admin),
            "super" => Ok(Tier::Super),
            _ => Err(()),
        }
    }
}

/// The authenticated identity derived from a request's API key.
///
/// Resolved once per request and immutable for the request's lifetime.
/// `key_id` is also the id of the customer record the key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub key_id: i64,
    pub tier: Tier,
}

impl Principal {
    /// Whether this principal owns the record with the given customer id.
    pub fn owns(&self, cust_id: i64) -> bool {
        self.key_id == cust_id
    }
}
