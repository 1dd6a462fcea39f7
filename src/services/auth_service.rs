//! Authorization engine: key validation, tier classification, and the
//! self-vs-any access rule.
//!
//! The ownership check is centralized here rather than repeated in every
//! operation: a `customer`-tier key may only see or touch the row whose
//! `cust_id` equals its own `key_id`, while `admin`/`super` keys see every
//! row. Row and field reads are checked after the row is fetched (the
//! owner id lives on the row); writes are gated before any lookup so an
//! unauthorized caller learns nothing about target rows.

use std::sync::Arc;

use crate::models::api_key::{Principal, Tier};
use crate::models::customer::CustomerKeyRow;
use crate::repository::{KeyStore, StorageError};

/// Why authentication did not produce a principal.
///
/// `NoKey` and `InvalidKey` are distinguished so the caller can return the
/// more specific diagnostic; both pre-empt everything else in the request.
#[derive(Debug)]
pub enum AuthError {
    /// The payload carried no key at all.
    NoKey,
    /// The key did not resolve in the key store.
    InvalidKey,
    /// The key store itself failed; surfaces as an infrastructure error.
    Storage(StorageError),
}

/// An authenticated caller was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    /// Customer-tier key targeting a record it does not own.
    SelfOnly,
    /// Write-intent operation from a non-elevated tier; carries the tier
    /// for the diagnostic message.
    AdminRequired(Tier),
}

/// Validates keys and enforces the tier access rules.
pub struct AuthorizationEngine {
    keys: Arc<dyn KeyStore>,
}

impl AuthorizationEngine {
    pub fn new(keys: Arc<dyn KeyStore>) -> Self {
        Self { keys }
    }

    /// Resolve a raw key to a principal.
    ///
    /// An absent or empty key is `NoKey`; a key the store does not know is
    /// `InvalidKey`.
    pub async fn authenticate(&self, raw_key: Option<&str>) -> Result<Principal, AuthError> {
        let raw_key = raw_key.filter(|k| !k.is_empty()).ok_or(AuthError::NoKey)?;
        self.keys
            .resolve(raw_key)
            .await
            .map_err(AuthError::Storage)?
            .ok_or(AuthError::InvalidKey)
    }

    /// Row-level read check: elevated tiers read anything, customer tier
    /// only its own row.
    pub fn authorize_read(
        &self,
        principal: &Principal,
        row: &CustomerKeyRow,
    ) -> Result<(), Denial> {
        if principal.tier.is_elevated() || principal.owns(row.key_id) {
            Ok(())
        } else {
            Err(Denial::SelfOnly)
        }
    }

    /// Field-level read check; the rule is the same as for whole rows.
    pub fn authorize_field_select(
        &self,
        principal: &Principal,
        row: &CustomerKeyRow,
    ) -> Result<(), Denial> {
        self.authorize_read(principal, row)
    }

    /// Write gate: `update` and `create` are for elevated tiers only.
    pub fn authorize_write(&self, principal: &Principal) -> Result<(), Denial> {
        if principal.tier.is_elevated() {
            Ok(())
        } else {
            Err(Denial::AdminRequired(principal.tier))
        }
    }
}
