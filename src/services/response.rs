//! Response envelopes and their canned texts.
//!
//! Every reply, success or failure, is one [`Envelope`]: `success` and
//! `timestamp` always, `requestor` on everything except the two
//! pre-authentication failures, and exactly one of `data`/`msg` on
//! operational replies. Help variants carry `help` + `example` instead.
//! The message strings are wire text carried over from the deployed
//! service and must not be reworded.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};

use crate::models::api_key::Tier;

/// The uniform response envelope.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requestor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub example: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

/// Builds envelopes for one request.
///
/// Constructed with the resolved requestor display name once the caller is
/// authenticated; the two pre-authentication failures are associated
/// functions because no requestor exists yet.
pub struct ResponseBuilder {
    requestor: String,
}

impl ResponseBuilder {
    pub fn for_requestor(requestor: String) -> Self {
        Self { requestor }
    }

    /// Resolved display name of the authenticated caller, for audit lines.
    pub fn requestor(&self) -> &str {
        &self.requestor
    }

    fn envelope(&self, success: bool) -> Envelope {
        Envelope {
            success,
            requestor: Some(self.requestor.clone()),
            data: None,
            msg: None,
            help: None,
            example: None,
            timestamp: Utc::now(),
        }
    }

    fn failure(&self, msg: &str) -> Envelope {
        Envelope {
            msg: Some(msg.to_string()),
            ..self.envelope(false)
        }
    }

    /// Successful reply carrying row or field data.
    pub fn data(&self, data: Value) -> Envelope {
        Envelope {
            data: Some(data),
            ..self.envelope(true)
        }
    }

    // ── Authentication failures (pre-requestor) ─────────────────────────

    pub fn no_api_key() -> Envelope {
        Envelope {
            success: false,
            requestor: None,
            data: None,
            msg: Some("This API requires an apikey.".to_string()),
            help: None,
            example: Some(json!({"operation": "help", "apikey": "abc1234"})),
            timestamp: Utc::now(),
        }
    }

    pub fn invalid_key() -> Envelope {
        Envelope {
            success: false,
            requestor: None,
            data: None,
            msg: Some("The API key supplied is not valid.".to_string()),
            help: None,
            example: None,
            timestamp: Utc::now(),
        }
    }

    // ── Authorization denials ───────────────────────────────────────────

    pub fn self_only(&self) -> Envelope {
        self.failure("This key is limited to self inquires only.")
    }

    pub fn admin_required(&self, tier: Tier) -> Envelope {
        self.failure(&format!(
            "Update and create operations require an admin or higher access apikey. \
             This key is type '{tier}'."
        ))
    }

    // ── Usage errors ────────────────────────────────────────────────────

    pub fn invalid_where_key(&self) -> Envelope {
        self.failure(
            "Valid 'where' keys are cust_id, cust_acct, cust_name, cust_license, \
             key_id, and apikey.",
        )
    }

    pub fn post_required(&self) -> Envelope {
        self.failure("Update or create operations should be conducted by POST and only with admin keys.")
    }

    pub fn get_required(&self) -> Envelope {
        self.failure("Query or License operations should be conducted via a GET request.")
    }

    pub fn empty_post(&self) -> Envelope {
        self.failure(
            "POST requests can be used to create or update customer information. \
             These transactions are only available to admin keys.",
        )
    }

    pub fn invalid_update_request(&self) -> Envelope {
        Envelope {
            example: Some(json!({
                "operation": "update",
                "apikey": "abc1234",
                "data": {
                    "update": "cust_acct=10001",
                    "set": "cust_active=1",
                },
            })),
            ..self.failure(
                "In order to update customer information, you must supply a 'data' \
                 object with 'update' and 'set' keys. See example.",
            )
        }
    }

    pub fn invalid_create_request(&self) -> Envelope {
        Envelope {
            example: Some(json!({
                "operation": "create",
                "apikey": "abc1234",
                "data": {
                    "cust_acct": 10001,
                    "cust_name": "Example Customer",
                    "cust_license": "1234abcd",
                    "cust_active": 1,
                    "type": "customer",
                },
            })),
            ..self.failure(
                "In order to create a new customer account, you must supply the \
                 required information. See example.",
            )
        }
    }

    // ── Lookup and storage outcomes ─────────────────────────────────────

    pub fn no_match(&self) -> Envelope {
        self.failure("No customer record matched the supplied criteria.")
    }

    pub fn customer_not_found(&self) -> Envelope {
        self.failure("The target customer record could not be found.")
    }

    pub fn db_insert_failure(&self) -> Envelope {
        self.failure("A failure occured writing to the database. The incident has been logged.")
    }

    // ── Help envelopes ──────────────────────────────────────────────────

    pub fn license_help(&self) -> Envelope {
        Envelope {
            help: Some(
                "The license operation returns the license and license status. If no \
                 'license' or 'account' is supplied, returns the status of the license \
                 associated with the apikey."
                    .to_string(),
            ),
            example: Some(json!({
                "operation": "license",
                "apikey": "abc1234",
                "license": "1234dcba",
            })),
            ..self.envelope(true)
        }
    }

    pub fn query_help(&self) -> Envelope {
        Envelope {
            help: Some(
                "The query operation returns all customer information based on a search \
                 criteria. The results can be filtered with the 'filter' key."
                    .to_string(),
            ),
            example: Some(json!({
                "operation": "query",
                "apikey": "abc1234",
                "select": ["cust_name", "cust_license"],
                "where": "account=00123",
            })),
            ..self.envelope(true)
        }
    }

    pub fn update_help(&self) -> Envelope {
        Envelope {
            help: Some(
                "The update operation requires an admin or higher access apikey. This \
                 allows customer information or license status to be changed."
                    .to_string(),
            ),
            example: Some(json!({
                "operation": "update",
                "apikey": "abc1234",
                "cust_acct": "001234",
                "set": "cust_active=1",
            })),
            ..self.envelope(true)
        }
    }

    pub fn empty_help(&self) -> Envelope {
        Envelope {
            example: Some(json!({"help": "query", "apikey": "abc1234"})),
            ..self.failure(
                "Your transaction was either not valid or badly formed. Try sending a \
                 GET request for specific help. See example...",
            )
        }
    }
}
