//! The operation payload and its parsing rules.
//!
//! Every request carries one JSON object; the field names (`operation`,
//! `apikey`, `where`, `select`, `help`, `account`, `license`, `data`) are a
//! wire contract and are preserved exactly. Parsing is deliberately lenient:
//! a malformed request is a usage error answered with a help envelope, never
//! a transport fault.

use serde::Deserialize;
use serde_json::Value;

/// Whether the request arrived on the read or the write surface.
///
/// Maps from the HTTP verb: GET carries read-intent operations (`help`,
/// `query`, `license`), POST carries write-intent operations (`update`,
/// `create`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Read,
    Write,
}

/// The closed set of named operations.
///
/// Parsed case-insensitively from the payload's `operation` field; anything
/// unrecognized is `Unknown`, which is always answered with the generic
/// usage envelope rather than an authorization error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Help,
    Query,
    License,
    Update,
    Create,
    Unknown,
}

/// Deserialized request payload.
///
/// All fields are optional; which ones matter depends on the operation.
/// `account` and `license` accept both JSON strings and numbers (clients
/// send account numbers either way), as does everything nested in `data`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OperationPayload {
    pub operation: Option<String>,
    pub apikey: Option<String>,
    #[serde(rename = "where")]
    pub where_clause: Option<String>,
    pub select: Option<Value>,
    pub help: Option<String>,
    pub account: Option<Value>,
    pub license: Option<Value>,
    pub data: Option<Value>,
}

impl OperationPayload {
    /// Parse a request body, treating an empty or unreadable body as an
    /// empty payload. An empty payload carries no key and fails
    /// authentication downstream.
    pub fn from_bytes(body: &[u8]) -> Self {
        if body.is_empty() {
            return Self::default();
        }
        serde_json::from_slice(body).unwrap_or_default()
    }

    /// The requested operation.
    ///
    /// A payload with no `operation` field but a `help` field is a help
    /// request; clients send `{"help": "query", "apikey": ...}`.
    pub fn operation(&self) -> Operation {
        let Some(name) = self.operation.as_deref() else {
            if self.help.is_some() {
                return Operation::Help;
            }
            return Operation::Unknown;
        };
        match name.to_ascii_lowercase().as_str() {
            "help" => Operation::Help,
            "query" => Operation::Query,
            "license" => Operation::License,
            "update" => Operation::Update,
            "create" => Operation::Create,
            _ => Operation::Unknown,
        }
    }
}

/// Columns a `where` clause (and an update selector) may filter on.
///
/// The closed enum is what keeps caller-controlled identifiers out of SQL:
/// each variant maps to one fixed parameterized statement in the
/// repository. Every permitted column is uniquely indexed or unique in
/// practice, so a filter always identifies at most one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterField {
    CustId,
    CustAcct,
    CustName,
    CustLicense,
    KeyId,
    ApiKey,
}

impl FilterField {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "cust_id" => Some(FilterField::CustId),
            "cust_acct" => Some(FilterField::CustAcct),
            "cust_name" => Some(FilterField::CustName),
            "cust_license" => Some(FilterField::CustLicense),
            "key_id" => Some(FilterField::KeyId),
            "apikey" => Some(FilterField::ApiKey),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FilterField::CustId => "cust_id",
            FilterField::CustAcct => "cust_acct",
            FilterField::CustName => "cust_name",
            FilterField::CustLicense => "cust_license",
            FilterField::KeyId => "key_id",
            FilterField::ApiKey => "apikey",
        }
    }

    /// Whether the underlying column is numeric. A non-numeric filter value
    /// against a numeric column can never match.
    pub fn is_numeric(&self) -> bool {
        matches!(self, FilterField::CustId | FilterField::KeyId)
    }
}

/// A parsed `field=value` filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhereClause {
    pub field: FilterField,
    pub value: String,
}

/// Why a `where` clause was rejected. The two cases travel different
/// channels: a malformed clause earns the query help envelope, an unknown
/// field earns the invalid-where-key envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhereError {
    Malformed,
    UnknownField,
}

impl WhereClause {
    /// Parse a raw `field=value` string. The shape check mirrors the
    /// original contract: exactly one `=`, value may be empty.
    pub fn parse(raw: &str) -> Result<Self, WhereError> {
        let mut parts = raw.splitn(3, '=');
        let field = parts.next().unwrap_or_default();
        let Some(value) = parts.next() else {
            return Err(WhereError::Malformed);
        };
        if parts.next().is_some() {
            return Err(WhereError::Malformed);
        }
        let field = FilterField::parse(field).ok_or(WhereError::UnknownField)?;
        Ok(WhereClause {
            field,
            value: value.to_string(),
        })
    }
}

/// What the `select` field asked for: the whole row or named columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectSpec {
    All,
    Fields(Vec<String>),
}

impl SelectSpec {
    /// Accepts the wildcard `"*"`, a single field name, or a list of field
    /// names (the published examples show a list). Anything else is a usage
    /// error.
    pub fn parse(select: Option<&Value>) -> Result<Self, ()> {
        let Some(select) = select else {
            return Ok(SelectSpec::All);
        };
        match select {
            Value::Null => Ok(SelectSpec::All),
            Value::String(s) if s == "*" => Ok(SelectSpec::All),
            Value::String(s) => Ok(SelectSpec::Fields(vec![s.clone()])),
            Value::Array(items) => {
                let mut fields = Vec::with_capacity(items.len());
                for item in items {
                    match item.as_str() {
                        Some(s) => fields.push(s.to_string()),
                        None => return Err(()),
                    }
                }
                if fields.is_empty() {
                    return Ok(SelectSpec::All);
                }
                Ok(SelectSpec::Fields(fields))
            }
            _ => Err(()),
        }
    }
}

/// One permitted `set` assignment from an update request, already typed.
///
/// Only `cust`-prefixed customer columns and the key table's `apikey`
/// column are updatable; `cust_id` is the join key and is never touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldAssignment {
    Acct(String),
    Name(String),
    License(String),
    Active(bool),
    ApiKey(String),
}

impl FieldAssignment {
    /// Column name reported back in the `changed` list.
    pub fn field_name(&self) -> &'static str {
        match self {
            FieldAssignment::Acct(_) => "cust_acct",
            FieldAssignment::Name(_) => "cust_name",
            FieldAssignment::License(_) => "cust_license",
            FieldAssignment::Active(_) => "cust_active",
            FieldAssignment::ApiKey(_) => "apikey",
        }
    }
}

/// Render a JSON scalar the way it is compared and stored: strings as-is,
/// numbers and booleans by display. Objects and arrays have no scalar form.
pub fn value_as_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Boolean coercion for `cust_active`: JSON booleans plus the `0`/`1` and
/// `"true"`/`"false"` spellings the original accepted.
pub fn value_as_bool(value: Option<&Value>) -> Option<bool> {
    match value? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::String(s) => match s.as_str() {
            "0" | "false" => Some(false),
            "1" | "true" => Some(true),
            _ => None,
        },
        _ => None,
    }
}
