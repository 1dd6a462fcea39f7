//! PostgreSQL implementations of the storage seams.
//!
//! All statements are fixed strings selected by matching a closed enum;
//! caller-supplied values only ever travel as bind parameters.

use std::str::FromStr;

use async_trait::async_trait;

use crate::db::DbPool;
use crate::models::api_key::{Principal, Tier};
use crate::models::customer::{CustomerKeyRow, NewCustomer};
use crate::models::operation::{FieldAssignment, FilterField};
use crate::repository::{CustomerRepository, KeyStore, StorageError};

/// Columns of the joined customer+key row, in `CustomerKeyRow` order.
const JOINED_COLUMNS: &str = "customer.cust_id, customer.cust_acct, customer.cust_name, \
     customer.cust_license, customer.cust_active, \
     apikeys.key_id, apikeys.apikey, apikeys.key_type";

/// Log a storage failure with its context and demote it to the generic
/// [`StorageError`]. The driver text stays server-side.
fn storage_err(context: &'static str, err: sqlx::Error) -> StorageError {
    tracing::error!(error = %err, context, "storage operation failed");
    StorageError(context.to_string())
}

/// Key lookups against the `apikeys` table.
pub struct PgKeyStore {
    pool: DbPool,
}

impl PgKeyStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KeyStore for PgKeyStore {
    async fn resolve(&self, apikey: &str) -> Result<Option<Principal>, StorageError> {
        let row: Option<(i64, String)> =
            sqlx::query_as("SELECT key_id, key_type FROM apikeys WHERE apikey = $1")
                .bind(apikey)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| storage_err("api key lookup", e))?;

        Ok(row.map(|(key_id, key_type)| {
            // An unrecognized key_type in storage classifies as the least
            // privileged tier rather than locking the key out entirely.
            let tier = Tier::from_str(&key_type).unwrap_or_else(|_| {
                tracing::warn!(key_id, key_type, "unrecognized key_type, treating as customer");
                Tier::Customer
            });
            Principal { key_id, tier }
        }))
    }
}

/// Customer/license row access against the `customer` and `apikeys` tables.
pub struct PgCustomerRepository {
    pool: DbPool,
}

impl PgCustomerRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CustomerRepository for PgCustomerRepository {
    async fn find_by(
        &self,
        field: FilterField,
        value: &str,
    ) -> Result<Option<CustomerKeyRow>, StorageError> {
        // The column name comes from the enum, never from the caller.
        let column = match field {
            FilterField::CustId => "customer.cust_id",
            FilterField::CustAcct => "customer.cust_acct",
            FilterField::CustName => "customer.cust_name",
            FilterField::CustLicense => "customer.cust_license",
            FilterField::KeyId => "apikeys.key_id",
            FilterField::ApiKey => "apikeys.apikey",
        };
        let sql = format!(
            "SELECT {JOINED_COLUMNS} FROM customer \
             JOIN apikeys ON customer.cust_id = apikeys.key_id \
             WHERE {column} = $1"
        );

        let query = sqlx::query_as::<_, CustomerKeyRow>(&sql);
        let row = if field.is_numeric() {
            // A non-numeric value can never match a numeric column.
            let Ok(id) = value.parse::<i64>() else {
                return Ok(None);
            };
            query.bind(id).fetch_optional(&self.pool).await
        } else {
            query.bind(value).fetch_optional(&self.pool).await
        };

        row.map_err(|e| storage_err("customer lookup", e))
    }

    async fn display_name(&self, cust_id: i64) -> Result<Option<String>, StorageError> {
        sqlx::query_scalar("SELECT cust_name FROM customer WHERE cust_id = $1")
            .bind(cust_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| storage_err("requestor lookup", e))
    }

    async fn insert_customer_with_key(
        &self,
        customer: &NewCustomer,
        apikey: &str,
        tier: Tier,
    ) -> Result<CustomerKeyRow, StorageError> {
        // Both inserts commit together; a key insert failure rolls the
        // customer row back instead of leaving it orphaned.
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| storage_err("begin create transaction", e))?;

        let cust_id: i64 = sqlx::query_scalar(
            "INSERT INTO customer (cust_acct, cust_name, cust_license, cust_active) \
             VALUES ($1, $2, $3, $4) RETURNING cust_id",
        )
        .bind(&customer.cust_acct)
        .bind(&customer.cust_name)
        .bind(&customer.cust_license)
        .bind(customer.cust_active)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            tracing::error!(
                error = %e,
                cust_acct = %customer.cust_acct,
                cust_name = %customer.cust_name,
                cust_license = %customer.cust_license,
                cust_active = customer.cust_active,
                "INSERT INTO customer failed"
            );
            StorageError("customer insert".to_string())
        })?;

        sqlx::query("INSERT INTO apikeys (key_id, apikey, key_type) VALUES ($1, $2, $3)")
            .bind(cust_id)
            .bind(apikey)
            .bind(tier.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    key_id = cust_id,
                    key_type = %tier,
                    "INSERT INTO apikeys failed"
                );
                StorageError("api key insert".to_string())
            })?;

        let sql = format!(
            "SELECT {JOINED_COLUMNS} FROM customer \
             JOIN apikeys ON customer.cust_id = apikeys.key_id \
             WHERE customer.cust_id = $1"
        );
        let row = sqlx::query_as::<_, CustomerKeyRow>(&sql)
            .bind(cust_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| storage_err("created record readback", e))?;

        tx.commit()
            .await
            .map_err(|e| storage_err("commit create transaction", e))?;

        Ok(row)
    }

    async fn apply_updates(
        &self,
        cust_id: i64,
        changes: &[FieldAssignment],
    ) -> Result<(), StorageError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| storage_err("begin update transaction", e))?;

        for change in changes {
            // One fixed statement per permitted column.
            let result = match change {
                FieldAssignment::Acct(value) => {
                    sqlx::query("UPDATE customer SET cust_acct = $1 WHERE cust_id = $2")
                        .bind(value)
                        .bind(cust_id)
                        .execute(&mut *tx)
                        .await
                }
                FieldAssignment::Name(value) => {
                    sqlx::query("UPDATE customer SET cust_name = $1 WHERE cust_id = $2")
                        .bind(value)
                        .bind(cust_id)
                        .execute(&mut *tx)
                        .await
                }
                FieldAssignment::License(value) => {
                    sqlx::query("UPDATE customer SET cust_license = $1 WHERE cust_id = $2")
                        .bind(value)
                        .bind(cust_id)
                        .execute(&mut *tx)
                        .await
                }
                FieldAssignment::Active(value) => {
                    sqlx::query("UPDATE customer SET cust_active = $1 WHERE cust_id = $2")
                        .bind(value)
                        .bind(cust_id)
                        .execute(&mut *tx)
                        .await
                }
                FieldAssignment::ApiKey(value) => {
                    sqlx::query("UPDATE apikeys SET apikey = $1 WHERE key_id = $2")
                        .bind(value)
                        .bind(cust_id)
                        .execute(&mut *tx)
                        .await
                }
            };

            result.map_err(|e| {
                tracing::error!(
                    error = %e,
                    cust_id,
                    field = change.field_name(),
                    "UPDATE failed"
                );
                StorageError("customer update".to_string())
            })?;
        }

        tx.commit()
            .await
            .map_err(|e| storage_err("commit update transaction", e))
    }
}
