//! Messages exchanged with the storage service over the `CspService.Send` call.

use chrono::{DateTime, Utc};
use serde_derive::{Deserialize, Serialize};

/// Path of the unary `Send` call on the storage service.
pub const SEND_PATH: &str = "/csp.CspService/Send";

#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub application: String,
    pub version: String,
    pub checksum: String,
    pub force: bool,
}

#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub remote_address: String,
    pub user_agent: String,
}

#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CspReport {
    pub document_uri: String,
    pub referrer_uri: String,
    pub violated_directive: String,
    pub effective_directive: String,
    pub original_policy: String,
    pub disposition: String,
    pub blocked_uri: String,
    pub status_code: String,
    pub source_uri: String,
    pub line_number: String,
    pub column_number: String,
    pub script_sample: String,
}

/// The submission envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendRequest {
    pub timestamp: DateTime<Utc>,
    pub param: Param,
    pub client: Client,
    pub report: CspReport,
}

#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendResponse {}
