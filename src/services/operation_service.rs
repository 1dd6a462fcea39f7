//! Operation dispatch: the state machine over (verb intent, operation).
//!
//! Each request is authenticated, classified, routed to one operation flow,
//! and answered with a response envelope. Usage errors and authorization
//! denials travel as ordinary envelopes on separate channels; only
//! infrastructure failures propagate as [`AppError`].
//!
//! # Flow
//!
//! 1. Authenticate the payload's key (pre-empts everything else)
//! 2. Resolve the requestor display name for the envelope
//! 3. Route on `(Intent, Operation)`
//! 4. Per-flow: validate shape, fetch, authorize, mutate, respond

use std::sync::Arc;

use rand::{Rng, distr::Alphanumeric};
use serde_json::{Value, json};

use crate::error::AppError;
use crate::models::api_key::{Principal, Tier};
use crate::models::customer::NewCustomer;
use crate::models::operation::{
    FieldAssignment, FilterField, Intent, Operation, OperationPayload, SelectSpec, WhereClause,
    WhereError, value_as_bool, value_as_string,
};
use crate::repository::{AuditSink, CustomerRepository};
use crate::services::auth_service::{AuthError, AuthorizationEngine, Denial};
use crate::services::response::{Envelope, ResponseBuilder};

/// Length of minted API keys.
const API_KEY_LENGTH: usize = 32;

/// Payload keys a `create` request must carry.
const REQUIRED_CREATE_FIELDS: [&str; 5] =
    ["cust_acct", "cust_name", "cust_license", "cust_active", "type"];

/// Routes authenticated operations and owns the per-operation flows.
pub struct OperationDispatcher {
    auth: AuthorizationEngine,
    repo: Arc<dyn CustomerRepository>,
    audit: Arc<dyn AuditSink>,
}

impl OperationDispatcher {
    pub fn new(
        auth: AuthorizationEngine,
        repo: Arc<dyn CustomerRepository>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { auth, repo, audit }
    }

    /// Handle one request and produce its envelope.
    pub async fn dispatch(
        &self,
        intent: Intent,
        payload: &OperationPayload,
    ) -> Result<Envelope, AppError> {
        let principal = match self.auth.authenticate(payload.apikey.as_deref()).await {
            Ok(principal) => principal,
            Err(AuthError::NoKey) => return Ok(ResponseBuilder::no_api_key()),
            Err(AuthError::InvalidKey) => return Ok(ResponseBuilder::invalid_key()),
            Err(AuthError::Storage(err)) => return Err(err.into()),
        };

        // Elevated keys may have no customer row; the envelope then names
        // nobody rather than failing the request.
        let requestor = self
            .repo
            .display_name(principal.key_id)
            .await?
            .unwrap_or_default();
        let reply = ResponseBuilder::for_requestor(requestor);

        let envelope = match (intent, payload.operation()) {
            (Intent::Read, Operation::Help) => self.help(&reply, payload),
            (Intent::Read, Operation::Query) => self.query(&reply, &principal, payload).await?,
            (Intent::Read, Operation::License) => self.license(&reply, &principal, payload).await?,
            (Intent::Read, Operation::Update | Operation::Create) => reply.post_required(),
            (Intent::Write, Operation::Update) => self.update(&reply, &principal, payload).await?,
            (Intent::Write, Operation::Create) => self.create(&reply, &principal, payload).await?,
            (Intent::Write, Operation::Query | Operation::License) => reply.get_required(),
            (Intent::Write, Operation::Help) => reply.empty_post(),
            (_, Operation::Unknown) => reply.empty_help(),
        };
        Ok(envelope)
    }

    /// Canned help, keyed by a case-insensitive topic substring.
    fn help(&self, reply: &ResponseBuilder, payload: &OperationPayload) -> Envelope {
        let Some(topic) = payload.help.as_deref() else {
            return reply.empty_help();
        };
        let topic = topic.to_ascii_lowercase();
        if topic.contains("license") {
            reply.license_help()
        } else if topic.contains("query") {
            reply.query_help()
        } else if topic.contains("update") {
            reply.update_help()
        } else {
            reply.empty_help()
        }
    }

    async fn query(
        &self,
        reply: &ResponseBuilder,
        principal: &Principal,
        payload: &OperationPayload,
    ) -> Result<Envelope, AppError> {
        let Some(raw_where) = payload.where_clause.as_deref() else {
            return Ok(reply.query_help());
        };
        let clause = match WhereClause::parse(raw_where) {
            Ok(clause) => clause,
            Err(WhereError::Malformed) => return Ok(reply.query_help()),
            Err(WhereError::UnknownField) => return Ok(reply.invalid_where_key()),
        };
        let Ok(select) = SelectSpec::parse(payload.select.as_ref()) else {
            return Ok(reply.query_help());
        };

        let Some(row) = self.repo.find_by(clause.field, &clause.value).await? else {
            // Customer tier learns nothing about which rows exist.
            return Ok(match principal.tier {
                Tier::Customer => reply.self_only(),
                Tier::Admin | Tier::Super => reply.no_match(),
            });
        };

        match select {
            SelectSpec::All => {
                if self.auth.authorize_read(principal, &row).is_err() {
                    return Ok(reply.self_only());
                }
                Ok(reply.data(serde_json::to_value(&row)?))
            }
            SelectSpec::Fields(fields) => {
                if self.auth.authorize_field_select(principal, &row).is_err() {
                    return Ok(reply.self_only());
                }
                let mut selected = serde_json::Map::new();
                for field in &fields {
                    let Some(value) = row.field_value(field) else {
                        return Ok(reply.query_help());
                    };
                    selected.insert(field.clone(), value);
                }
                Ok(reply.data(Value::Object(selected)))
            }
        }
    }

    /// License status lookup.
    ///
    /// Elevated tiers may target any customer by `account` or `license`,
    /// falling back to their own record. Customer tier always resolves its
    /// own record and must additionally supply a matching `account` or
    /// `license` value; this doubled self-check is the deployed behavior.
    async fn license(
        &self,
        reply: &ResponseBuilder,
        principal: &Principal,
        payload: &OperationPayload,
    ) -> Result<Envelope, AppError> {
        let account = value_as_string(payload.account.as_ref());
        let license = value_as_string(payload.license.as_ref());

        if principal.tier.is_elevated() {
            let row = if let Some(account) = account {
                self.repo.find_by(FilterField::CustAcct, &account).await?
            } else if let Some(license) = license {
                self.repo.find_by(FilterField::CustLicense, &license).await?
            } else {
                self.repo
                    .find_by(FilterField::CustId, &principal.key_id.to_string())
                    .await?
            };
            return Ok(match row {
                Some(row) => reply.data(json!({
                    "license": row.cust_license,
                    "active": row.cust_active,
                })),
                None => reply.no_match(),
            });
        }

        let Some(row) = self
            .repo
            .find_by(FilterField::CustId, &principal.key_id.to_string())
            .await?
        else {
            return Ok(reply.no_match());
        };
        let matches = account.as_deref() == Some(row.cust_acct.as_str())
            || license.as_deref() == Some(row.cust_license.as_str());
        if matches {
            Ok(reply.data(json!({
                "license": row.cust_license,
                "active": row.cust_active,
            })))
        } else {
            Ok(reply.self_only())
        }
    }

    async fn update(
        &self,
        reply: &ResponseBuilder,
        principal: &Principal,
        payload: &OperationPayload,
    ) -> Result<Envelope, AppError> {
        // Gated before any row lookup.
        if let Err(Denial::AdminRequired(tier)) = self.auth.authorize_write(principal) {
            return Ok(reply.admin_required(tier));
        }

        let Some(data) = payload.data.as_ref().and_then(Value::as_object) else {
            return Ok(reply.invalid_update_request());
        };
        let Some(selector) = data.get("update").and_then(Value::as_str) else {
            return Ok(reply.invalid_update_request());
        };
        let Ok(clause) = WhereClause::parse(selector) else {
            return Ok(reply.invalid_update_request());
        };
        let raw_assignments: Vec<String> = match data.get("set") {
            Some(Value::String(s)) => vec![s.clone()],
            Some(Value::Array(items)) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    match item.as_str() {
                        Some(s) => out.push(s.to_string()),
                        None => return Ok(reply.invalid_update_request()),
                    }
                }
                out
            }
            _ => return Ok(reply.invalid_update_request()),
        };

        let mut changes = Vec::new();
        for raw in &raw_assignments {
            match classify_assignment(raw) {
                Ok(Some(change)) => changes.push(change),
                // Not a permitted customer column or the key column.
                Ok(None) => {}
                Err(()) => return Ok(reply.invalid_update_request()),
            }
        }

        let Some(target) = self.repo.find_by(clause.field, &clause.value).await? else {
            return Ok(reply.customer_not_found());
        };

        if self
            .repo
            .apply_updates(target.cust_id, &changes)
            .await
            .is_err()
        {
            self.audit
                .record(
                    &format!("database update failure for cust_id {}", target.cust_id),
                    Some(reply.requestor()),
                )
                .await;
            return Ok(reply.db_insert_failure());
        }

        let changed: Vec<&str> = changes.iter().map(FieldAssignment::field_name).collect();
        self.audit
            .record(
                &format!(
                    "updated [{}] for cust_id {}",
                    changed.join(", "),
                    target.cust_id
                ),
                Some(reply.requestor()),
            )
            .await;

        let Some(refreshed) = self
            .repo
            .find_by(FilterField::CustId, &target.cust_id.to_string())
            .await?
        else {
            return Ok(reply.customer_not_found());
        };
        Ok(reply.data(json!({
            "changed": changed,
            "record": serde_json::to_value(&refreshed)?,
        })))
    }

    async fn create(
        &self,
        reply: &ResponseBuilder,
        principal: &Principal,
        payload: &OperationPayload,
    ) -> Result<Envelope, AppError> {
        if let Err(Denial::AdminRequired(tier)) = self.auth.authorize_write(principal) {
            return Ok(reply.admin_required(tier));
        }

        let Some(data) = payload.data.as_ref().and_then(Value::as_object) else {
            return Ok(reply.invalid_create_request());
        };
        if REQUIRED_CREATE_FIELDS
            .iter()
            .any(|field| !data.contains_key(*field))
        {
            return Ok(reply.invalid_create_request());
        }
        let (Some(cust_acct), Some(cust_name), Some(cust_license)) = (
            value_as_string(data.get("cust_acct")),
            value_as_string(data.get("cust_name")),
            value_as_string(data.get("cust_license")),
        ) else {
            return Ok(reply.invalid_create_request());
        };
        let Some(cust_active) = value_as_bool(data.get("cust_active")) else {
            return Ok(reply.invalid_create_request());
        };
        let Some(tier) = value_as_string(data.get("type")).and_then(|s| s.parse::<Tier>().ok())
        else {
            return Ok(reply.invalid_create_request());
        };

        let customer = NewCustomer {
            cust_acct,
            cust_name,
            cust_license,
            cust_active,
        };
        let apikey = generate_api_key();

        match self
            .repo
            .insert_customer_with_key(&customer, &apikey, tier)
            .await
        {
            Ok(row) => {
                self.audit
                    .record(
                        &format!(
                            "created customer account '{}' with {} key",
                            row.cust_acct, row.key_type
                        ),
                        Some(reply.requestor()),
                    )
                    .await;
                Ok(reply.data(serde_json::to_value(&row)?))
            }
            Err(err) => {
                tracing::error!(error = %err, "customer creation failed");
                self.audit
                    .record(
                        "database insert failure during customer creation",
                        Some(reply.requestor()),
                    )
                    .await;
                Ok(reply.db_insert_failure())
            }
        }
    }
}

/// Classify one `field=value` assignment from an update's `set` list.
///
/// `Ok(None)` is an unrecognized field, which is silently skipped;
/// `Err(())` is a malformed assignment, which fails the whole request.
fn classify_assignment(raw: &str) -> Result<Option<FieldAssignment>, ()> {
    let mut parts = raw.splitn(2, '=');
    let field = parts.next().unwrap_or_default();
    let Some(value) = parts.next() else {
        return Err(());
    };
    match field {
        "cust_acct" => Ok(Some(FieldAssignment::Acct(value.to_string()))),
        "cust_name" => Ok(Some(FieldAssignment::Name(value.to_string()))),
        "cust_license" => Ok(Some(FieldAssignment::License(value.to_string()))),
        "cust_active" => match value {
            "1" | "true" => Ok(Some(FieldAssignment::Active(true))),
            "0" | "false" => Ok(Some(FieldAssignment::Active(false))),
            _ => Err(()),
        },
        "apikey" => Ok(Some(FieldAssignment::ApiKey(value.to_string()))),
        _ => Ok(None),
    }
}

/// Mint a fresh opaque API key: fixed length, alphanumeric alphabet.
fn generate_api_key() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(API_KEY_LENGTH)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use crate::models::customer::CustomerKeyRow;
    use crate::repository::{KeyStore, StorageError};

    // ── Test doubles ────────────────────────────────────────────────────

    struct StaticKeys {
        keys: HashMap<String, Principal>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl KeyStore for StaticKeys {
        async fn resolve(&self, apikey: &str) -> Result<Option<Principal>, StorageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.keys.get(apikey).copied())
        }
    }

    #[derive(Default)]
    struct RecordingAudit {
        lines: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AuditSink for RecordingAudit {
        async fn record(&self, message: &str, actor: Option<&str>) {
            self.lines
                .lock()
                .unwrap()
                .push(format!("{} -> {}", actor.unwrap_or(""), message));
        }
    }

    struct MemRepo {
        rows: Mutex<Vec<CustomerKeyRow>>,
        fail_writes: bool,
        find_calls: AtomicUsize,
        name_calls: AtomicUsize,
        insert_calls: AtomicUsize,
        update_calls: AtomicUsize,
    }

    impl MemRepo {
        fn new(rows: Vec<CustomerKeyRow>) -> Self {
            Self {
                rows: Mutex::new(rows),
                fail_writes: false,
                find_calls: AtomicUsize::new(0),
                name_calls: AtomicUsize::new(0),
                insert_calls: AtomicUsize::new(0),
                update_calls: AtomicUsize::new(0),
            }
        }

        /// Row lookups and mutations, excluding requestor name resolution.
        fn data_calls(&self) -> usize {
            self.find_calls.load(Ordering::SeqCst)
                + self.insert_calls.load(Ordering::SeqCst)
                + self.update_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CustomerRepository for MemRepo {
        async fn find_by(
            &self,
            field: FilterField,
            value: &str,
        ) -> Result<Option<CustomerKeyRow>, StorageError> {
            self.find_calls.fetch_add(1, Ordering::SeqCst);
            let rows = self.rows.lock().unwrap();
            Ok(rows
                .iter()
                .find(|row| match field {
                    FilterField::CustId => value.parse() == Ok(row.cust_id),
                    FilterField::CustAcct => row.cust_acct == value,
                    FilterField::CustName => row.cust_name == value,
                    FilterField::CustLicense => row.cust_license == value,
                    FilterField::KeyId => value.parse() == Ok(row.key_id),
                    FilterField::ApiKey => row.apikey == value,
                })
                .cloned())
        }

        async fn display_name(&self, cust_id: i64) -> Result<Option<String>, StorageError> {
            self.name_calls.fetch_add(1, Ordering::SeqCst);
            let rows = self.rows.lock().unwrap();
            Ok(rows
                .iter()
                .find(|row| row.cust_id == cust_id)
                .map(|row| row.cust_name.clone()))
        }

        async fn insert_customer_with_key(
            &self,
            customer: &NewCustomer,
            apikey: &str,
            tier: Tier,
        ) -> Result<CustomerKeyRow, StorageError> {
            self.insert_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_writes {
                return Err(StorageError("customer insert".to_string()));
            }
            let mut rows = self.rows.lock().unwrap();
            let cust_id = rows.iter().map(|r| r.cust_id).max().unwrap_or(0) + 1;
            let row = CustomerKeyRow {
                cust_id,
                cust_acct: customer.cust_acct.clone(),
                cust_name: customer.cust_name.clone(),
                cust_license: customer.cust_license.clone(),
                cust_active: customer.cust_active,
                key_id: cust_id,
                apikey: apikey.to_string(),
                key_type: tier.as_str().to_string(),
            };
            rows.push(row.clone());
            Ok(row)
        }

        async fn apply_updates(
            &self,
            cust_id: i64,
            changes: &[FieldAssignment],
        ) -> Result<(), StorageError> {
            self.update_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_writes {
                return Err(StorageError("customer update".to_string()));
            }
            let mut rows = self.rows.lock().unwrap();
            let row = rows
                .iter_mut()
                .find(|row| row.cust_id == cust_id)
                .expect("update target must exist");
            for change in changes {
                match change {
                    FieldAssignment::Acct(v) => row.cust_acct = v.clone(),
                    FieldAssignment::Name(v) => row.cust_name = v.clone(),
                    FieldAssignment::License(v) => row.cust_license = v.clone(),
                    FieldAssignment::Active(v) => row.cust_active = *v,
                    FieldAssignment::ApiKey(v) => row.apikey = v.clone(),
                }
            }
            Ok(())
        }
    }

    // ── Fixture ─────────────────────────────────────────────────────────

    const ADMIN_KEY: &str = "adminkey000000000000000000000001";
    const ACME_KEY: &str = "acmekey0000000000000000000000002";
    const GLOBEX_KEY: &str = "globexkey00000000000000000000003";

    fn fixture_row(
        cust_id: i64,
        acct: &str,
        name: &str,
        license: &str,
        active: bool,
        apikey: &str,
        key_type: &str,
    ) -> CustomerKeyRow {
        CustomerKeyRow {
            cust_id,
            cust_acct: acct.to_string(),
            cust_name: name.to_string(),
            cust_license: license.to_string(),
            cust_active: active,
            key_id: cust_id,
            apikey: apikey.to_string(),
            key_type: key_type.to_string(),
        }
    }

    fn fixture_rows() -> Vec<CustomerKeyRow> {
        vec![
            fixture_row(1, "10001", "Head Office", "lic-head", true, ADMIN_KEY, "admin"),
            fixture_row(2, "10002", "Acme Widgets", "lic-acme", true, ACME_KEY, "customer"),
            fixture_row(3, "10003", "Globex", "lic-globex", false, GLOBEX_KEY, "customer"),
        ]
    }

    struct Harness {
        dispatcher: OperationDispatcher,
        keys: Arc<StaticKeys>,
        repo: Arc<MemRepo>,
        audit: Arc<RecordingAudit>,
    }

    fn harness_with(fail_writes: bool) -> Harness {
        let mut repo = MemRepo::new(fixture_rows());
        repo.fail_writes = fail_writes;
        let repo = Arc::new(repo);
        let keys = Arc::new(StaticKeys {
            keys: fixture_rows()
                .into_iter()
                .map(|row| {
                    let tier = row.key_type.parse::<Tier>().unwrap();
                    (
                        row.apikey.clone(),
                        Principal {
                            key_id: row.key_id,
                            tier,
                        },
                    )
                })
                .collect(),
            calls: AtomicUsize::new(0),
        });
        let audit = Arc::new(RecordingAudit::default());
        let dispatcher = OperationDispatcher::new(
            AuthorizationEngine::new(keys.clone()),
            repo.clone(),
            audit.clone(),
        );
        Harness {
            dispatcher,
            keys,
            repo,
            audit,
        }
    }

    fn harness() -> Harness {
        harness_with(false)
    }

    fn payload(value: Value) -> OperationPayload {
        serde_json::from_value(value).unwrap()
    }

    async fn read(h: &Harness, value: Value) -> Envelope {
        h.dispatcher
            .dispatch(Intent::Read, &payload(value))
            .await
            .unwrap()
    }

    async fn write(h: &Harness, value: Value) -> Envelope {
        h.dispatcher
            .dispatch(Intent::Write, &payload(value))
            .await
            .unwrap()
    }

    fn create_data() -> Value {
        json!({
            "cust_acct": "10004",
            "cust_name": "Initech",
            "cust_license": "lic-initech",
            "cust_active": 1,
            "type": "customer",
        })
    }

    // ── Authentication ──────────────────────────────────────────────────

    #[tokio::test]
    async fn missing_key_fails_before_any_lookup() {
        let h = harness();
        let envelope = read(&h, json!({"operation": "query", "where": "cust_id=2"})).await;
        assert_eq!(envelope.msg.as_deref(), Some("This API requires an apikey."));
        assert!(envelope.requestor.is_none());
        assert_eq!(h.keys.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.repo.data_calls(), 0);
        assert_eq!(h.repo.name_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unresolvable_key_fails_before_any_lookup() {
        let h = harness();
        for op in ["query", "license", "update", "create", "help"] {
            let envelope = read(&h, json!({"operation": op, "apikey": "nope"})).await;
            assert_eq!(
                envelope.msg.as_deref(),
                Some("The API key supplied is not valid.")
            );
            assert!(envelope.requestor.is_none());
        }
        assert_eq!(h.repo.data_calls(), 0);
        assert_eq!(h.repo.name_calls.load(Ordering::SeqCst), 0);
    }

    // ── Query ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn customer_query_of_another_row_is_denied() {
        let h = harness();
        let envelope = read(
            &h,
            json!({"operation": "query", "apikey": ACME_KEY, "where": "cust_id=3"}),
        )
        .await;
        assert!(!envelope.success);
        assert_eq!(
            envelope.msg.as_deref(),
            Some("This key is limited to self inquires only.")
        );
        assert!(envelope.data.is_none());
    }

    #[tokio::test]
    async fn customer_query_of_its_own_row_returns_the_row() {
        let h = harness();
        let envelope = read(
            &h,
            json!({"operation": "query", "apikey": ACME_KEY, "where": "cust_id=2"}),
        )
        .await;
        assert!(envelope.success);
        assert_eq!(envelope.requestor.as_deref(), Some("Acme Widgets"));
        let data = envelope.data.unwrap();
        assert_eq!(data["cust_name"], json!("Acme Widgets"));
        assert_eq!(data["apikey"], json!(ACME_KEY));
    }

    #[tokio::test]
    async fn admin_queries_any_row_by_any_permitted_field() {
        let h = harness();
        let clauses = vec![
            "cust_id=3".to_string(),
            "cust_acct=10003".to_string(),
            "cust_name=Globex".to_string(),
            "cust_license=lic-globex".to_string(),
            "key_id=3".to_string(),
            format!("apikey={GLOBEX_KEY}"),
        ];
        for clause in clauses {
            let envelope = read(
                &h,
                json!({"operation": "query", "apikey": ADMIN_KEY, "where": clause}),
            )
            .await;
            assert!(envelope.success, "lookup failed for {clause}");
            assert_eq!(envelope.data.unwrap()["cust_id"], json!(3));
        }
    }

    #[tokio::test]
    async fn query_without_a_usable_where_returns_query_help() {
        let h = harness();
        for body in [
            json!({"operation": "query", "apikey": ADMIN_KEY}),
            json!({"operation": "query", "apikey": ADMIN_KEY, "where": "cust_acct"}),
            json!({"operation": "query", "apikey": ADMIN_KEY, "where": "cust_acct=1=2"}),
        ] {
            let envelope = read(&h, body).await;
            assert!(envelope.help.is_some());
            assert!(envelope.example.is_some());
        }
        assert_eq!(h.repo.data_calls(), 0);
    }

    #[tokio::test]
    async fn query_with_an_unlisted_where_field_is_rejected_for_every_tier() {
        let h = harness();
        for key in [ADMIN_KEY, ACME_KEY] {
            let envelope = read(
                &h,
                json!({"operation": "query", "apikey": key, "where": "key_type=admin"}),
            )
            .await;
            assert!(!envelope.success);
            assert!(envelope.msg.unwrap().starts_with("Valid 'where' keys are"));
        }
        assert_eq!(h.repo.data_calls(), 0);
    }

    #[tokio::test]
    async fn select_restricts_the_returned_fields() {
        let h = harness();
        let envelope = read(
            &h,
            json!({"operation": "query", "apikey": ADMIN_KEY, "where": "cust_acct=10002", "select": "cust_license"}),
        )
        .await;
        assert_eq!(envelope.data, Some(json!({"cust_license": "lic-acme"})));

        let envelope = read(
            &h,
            json!({"operation": "query", "apikey": ADMIN_KEY, "where": "cust_acct=10002", "select": ["cust_name", "cust_active"]}),
        )
        .await;
        assert_eq!(
            envelope.data,
            Some(json!({"cust_name": "Acme Widgets", "cust_active": true}))
        );
    }

    #[tokio::test]
    async fn wildcard_select_returns_the_full_row() {
        let h = harness();
        let envelope = read(
            &h,
            json!({"operation": "query", "apikey": ADMIN_KEY, "where": "cust_id=2", "select": "*"}),
        )
        .await;
        let data = envelope.data.unwrap();
        assert_eq!(data["apikey"], json!(ACME_KEY));
        assert_eq!(data["key_type"], json!("customer"));
    }

    #[tokio::test]
    async fn select_of_an_unknown_field_returns_query_help() {
        let h = harness();
        let envelope = read(
            &h,
            json!({"operation": "query", "apikey": ADMIN_KEY, "where": "cust_id=2", "select": "cust_secret"}),
        )
        .await;
        assert!(envelope.help.is_some());
        assert!(envelope.data.is_none());
    }

    #[tokio::test]
    async fn customer_field_select_on_another_row_is_denied() {
        let h = harness();
        let envelope = read(
            &h,
            json!({"operation": "query", "apikey": ACME_KEY, "where": "cust_id=3", "select": "cust_license"}),
        )
        .await;
        assert_eq!(
            envelope.msg.as_deref(),
            Some("This key is limited to self inquires only.")
        );
    }

    #[tokio::test]
    async fn query_miss_is_no_match_for_admin_and_denial_for_customer() {
        let h = harness();
        let envelope = read(
            &h,
            json!({"operation": "query", "apikey": ADMIN_KEY, "where": "cust_acct=99999"}),
        )
        .await;
        assert_eq!(
            envelope.msg.as_deref(),
            Some("No customer record matched the supplied criteria.")
        );

        let envelope = read(
            &h,
            json!({"operation": "query", "apikey": ACME_KEY, "where": "cust_acct=99999"}),
        )
        .await;
        assert_eq!(
            envelope.msg.as_deref(),
            Some("This key is limited to self inquires only.")
        );
    }

    // ── License ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn admin_license_targets_any_customer() {
        let h = harness();
        let envelope = read(
            &h,
            json!({"operation": "license", "apikey": ADMIN_KEY, "account": "10003"}),
        )
        .await;
        assert_eq!(
            envelope.data,
            Some(json!({"license": "lic-globex", "active": false}))
        );

        let envelope = read(
            &h,
            json!({"operation": "license", "apikey": ADMIN_KEY, "license": "lic-acme"}),
        )
        .await;
        assert_eq!(
            envelope.data,
            Some(json!({"license": "lic-acme", "active": true}))
        );
    }

    #[tokio::test]
    async fn admin_license_falls_back_to_its_own_record() {
        let h = harness();
        let envelope = read(&h, json!({"operation": "license", "apikey": ADMIN_KEY})).await;
        assert_eq!(
            envelope.data,
            Some(json!({"license": "lic-head", "active": true}))
        );
    }

    #[tokio::test]
    async fn admin_license_miss_is_no_match() {
        let h = harness();
        let envelope = read(
            &h,
            json!({"operation": "license", "apikey": ADMIN_KEY, "account": "99999"}),
        )
        .await;
        assert_eq!(
            envelope.msg.as_deref(),
            Some("No customer record matched the supplied criteria.")
        );
    }

    #[tokio::test]
    async fn customer_license_requires_a_matching_identifier() {
        let h = harness();
        // Matching account, as a string or a number.
        for account in [json!("10002"), json!(10002)] {
            let envelope = read(
                &h,
                json!({"operation": "license", "apikey": ACME_KEY, "account": account}),
            )
            .await;
            assert_eq!(
                envelope.data,
                Some(json!({"license": "lic-acme", "active": true}))
            );
        }
        // Matching license value.
        let envelope = read(
            &h,
            json!({"operation": "license", "apikey": ACME_KEY, "license": "lic-acme"}),
        )
        .await;
        assert!(envelope.success);

        // No identifier at all, or somebody else's: denied either way.
        for body in [
            json!({"operation": "license", "apikey": ACME_KEY}),
            json!({"operation": "license", "apikey": ACME_KEY, "account": "10003"}),
        ] {
            let envelope = read(&h, body).await;
            assert_eq!(
                envelope.msg.as_deref(),
                Some("This key is limited to self inquires only.")
            );
        }
    }

    // ── Write gating ────────────────────────────────────────────────────

    #[tokio::test]
    async fn customer_write_intent_is_denied_without_touching_rows() {
        let h = harness();
        let bodies = [
            json!({"operation": "update", "apikey": ACME_KEY, "data": {"update": "cust_id=2", "set": "cust_name=X"}}),
            json!({"operation": "create", "apikey": ACME_KEY, "data": create_data()}),
        ];
        for body in bodies {
            let envelope = write(&h, body).await;
            assert!(!envelope.success);
            let msg = envelope.msg.unwrap();
            assert!(msg.contains("admin or higher"));
            assert!(msg.contains("'customer'"));
        }
        assert_eq!(h.repo.data_calls(), 0);
    }

    // ── Create ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn create_with_a_missing_field_performs_no_inserts() {
        let h = harness();
        for missing in REQUIRED_CREATE_FIELDS {
            let mut data = create_data();
            data.as_object_mut().unwrap().remove(missing);
            let envelope = write(
                &h,
                json!({"operation": "create", "apikey": ADMIN_KEY, "data": data}),
            )
            .await;
            assert!(!envelope.success, "accepted create without {missing}");
            assert!(envelope.msg.unwrap().contains("required information"));
            assert!(envelope.example.is_some());
        }
        assert_eq!(h.repo.insert_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn create_rejects_an_unknown_tier() {
        let h = harness();
        let mut data = create_data();
        data["type"] = json!("root");
        let envelope = write(
            &h,
            json!({"operation": "create", "apikey": ADMIN_KEY, "data": data}),
        )
        .await;
        assert!(!envelope.success);
        assert_eq!(h.repo.insert_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn created_records_are_immediately_queryable() {
        let h = harness();
        let envelope = write(
            &h,
            json!({"operation": "create", "apikey": ADMIN_KEY, "data": create_data()}),
        )
        .await;
        assert!(envelope.success);
        let record = envelope.data.unwrap();
        let minted = record["apikey"].as_str().unwrap().to_string();
        assert_eq!(minted.len(), 32);
        assert!(minted.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_eq!(record["key_type"], json!("customer"));
        assert_eq!(record["cust_active"], json!(true));

        let envelope = read(
            &h,
            json!({"operation": "query", "apikey": ADMIN_KEY, "where": "cust_acct=10004"}),
        )
        .await;
        assert!(envelope.success);
        assert_eq!(envelope.data.unwrap()["apikey"], json!(minted));
    }

    #[tokio::test]
    async fn create_reports_storage_failure_generically() {
        let h = harness_with(true);
        let envelope = write(
            &h,
            json!({"operation": "create", "apikey": ADMIN_KEY, "data": create_data()}),
        )
        .await;
        assert!(!envelope.success);
        assert_eq!(
            envelope.msg.as_deref(),
            Some("A failure occured writing to the database. The incident has been logged.")
        );
        assert!(!h.audit.lines.lock().unwrap().is_empty());
    }

    // ── Update ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn update_applies_only_permitted_fields() {
        let h = harness();
        let envelope = write(
            &h,
            json!({"operation": "update", "apikey": ADMIN_KEY, "data": {
                "update": "cust_acct=10002",
                "set": ["cust_name=Acme LLC", "cust_id=99", "foo_bar=1", "cust_active=0"],
            }}),
        )
        .await;
        assert!(envelope.success);
        let data = envelope.data.unwrap();
        assert_eq!(data["changed"], json!(["cust_name", "cust_active"]));
        assert_eq!(data["record"]["cust_name"], json!("Acme LLC"));
        assert_eq!(data["record"]["cust_active"], json!(false));
        assert_eq!(data["record"]["cust_id"], json!(2));
    }

    #[tokio::test]
    async fn update_accepts_a_single_string_assignment() {
        let h = harness();
        let envelope = write(
            &h,
            json!({"operation": "update", "apikey": ADMIN_KEY, "data": {
                "update": "cust_id=3",
                "set": "cust_license=lic-renewed",
            }}),
        )
        .await;
        let data = envelope.data.unwrap();
        assert_eq!(data["changed"], json!(["cust_license"]));
        assert_eq!(data["record"]["cust_license"], json!("lic-renewed"));
    }

    #[tokio::test]
    async fn update_can_rotate_the_api_key() {
        let h = harness();
        let envelope = write(
            &h,
            json!({"operation": "update", "apikey": ADMIN_KEY, "data": {
                "update": "cust_id=2",
                "set": "apikey=rotated0000000000000000000000002",
            }}),
        )
        .await;
        let data = envelope.data.unwrap();
        assert_eq!(data["changed"], json!(["apikey"]));
        assert_eq!(
            data["record"]["apikey"],
            json!("rotated0000000000000000000000002")
        );
    }

    #[tokio::test]
    async fn update_with_malformed_data_is_a_usage_error() {
        let h = harness();
        let bodies = [
            json!({"operation": "update", "apikey": ADMIN_KEY}),
            json!({"operation": "update", "apikey": ADMIN_KEY, "data": "cust_name=X"}),
            json!({"operation": "update", "apikey": ADMIN_KEY, "data": {"set": "cust_name=X"}}),
            json!({"operation": "update", "apikey": ADMIN_KEY, "data": {"update": "cust_id=2"}}),
            json!({"operation": "update", "apikey": ADMIN_KEY, "data": {"update": "key_type=admin", "set": "cust_name=X"}}),
            json!({"operation": "update", "apikey": ADMIN_KEY, "data": {"update": "cust_id=2", "set": "cust_active=maybe"}}),
            json!({"operation": "update", "apikey": ADMIN_KEY, "data": {"update": "cust_id=2", "set": "cust_name"}}),
            json!({"operation": "update", "apikey": ADMIN_KEY, "data": {"update": "cust_id=2", "set": [42]}}),
        ];
        for body in bodies {
            let envelope = write(&h, body).await;
            assert!(!envelope.success);
            assert!(
                envelope
                    .msg
                    .unwrap()
                    .starts_with("In order to update customer information")
            );
        }
        assert_eq!(h.repo.update_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn update_of_a_missing_target_is_customer_not_found() {
        let h = harness();
        let envelope = write(
            &h,
            json!({"operation": "update", "apikey": ADMIN_KEY, "data": {
                "update": "cust_acct=99999",
                "set": "cust_active=0",
            }}),
        )
        .await;
        assert_eq!(
            envelope.msg.as_deref(),
            Some("The target customer record could not be found.")
        );
        assert_eq!(h.repo.update_calls.load(Ordering::SeqCst), 0);
    }

    // ── Routing ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn write_operations_on_the_read_surface_are_redirected() {
        let h = harness();
        for op in ["update", "create"] {
            let envelope = read(&h, json!({"operation": op, "apikey": ACME_KEY})).await;
            assert_eq!(
                envelope.msg.as_deref(),
                Some("Update or create operations should be conducted by POST and only with admin keys.")
            );
        }
        assert_eq!(h.repo.data_calls(), 0);
    }

    #[tokio::test]
    async fn read_operations_on_the_write_surface_are_redirected() {
        let h = harness();
        for op in ["query", "license"] {
            let envelope = write(&h, json!({"operation": op, "apikey": ADMIN_KEY})).await;
            assert_eq!(
                envelope.msg.as_deref(),
                Some("Query or License operations should be conducted via a GET request.")
            );
        }

        let envelope = write(&h, json!({"operation": "help", "apikey": ADMIN_KEY})).await;
        assert!(envelope.msg.unwrap().starts_with("POST requests can be used"));
        assert_eq!(h.repo.data_calls(), 0);
    }

    #[tokio::test]
    async fn unknown_operations_get_usage_help_not_authorization_errors() {
        let h = harness();
        let bodies = [
            json!({"operation": "frobnicate", "apikey": ACME_KEY}),
            json!({"apikey": ACME_KEY}),
        ];
        for body in bodies {
            for intent in [Intent::Read, Intent::Write] {
                let envelope = h
                    .dispatcher
                    .dispatch(intent, &payload(body.clone()))
                    .await
                    .unwrap();
                assert!(!envelope.success);
                assert!(
                    envelope
                        .msg
                        .unwrap()
                        .starts_with("Your transaction was either not valid or badly formed")
                );
            }
        }
        assert_eq!(h.repo.data_calls(), 0);
    }

    // ── Help ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn help_topics_match_by_substring() {
        let h = harness();
        let cases = [
            ("How do I QUERY things?", "query operation"),
            ("tell me about licenses", "license operation"),
            ("update", "update operation"),
        ];
        for (topic, expected) in cases {
            let envelope = read(
                &h,
                json!({"operation": "help", "apikey": ACME_KEY, "help": topic}),
            )
            .await;
            assert!(
                envelope.help.unwrap().contains(expected),
                "topic {topic} missed"
            );
        }

        // Bare help key without an operation field is still a help request.
        let envelope = read(&h, json!({"help": "query", "apikey": ACME_KEY})).await;
        assert!(envelope.help.unwrap().contains("query operation"));

        // Unmatched or absent topics fall back to the generic envelope.
        for body in [
            json!({"operation": "help", "apikey": ACME_KEY, "help": "bogus"}),
            json!({"operation": "help", "apikey": ACME_KEY}),
        ] {
            let envelope = read(&h, body).await;
            assert!(
                envelope
                    .msg
                    .unwrap()
                    .starts_with("Your transaction was either not valid or badly formed")
            );
        }
    }
}
