use crate::api::CspReport;
use crate::decode::field_value;
use serde::de::{self, Deserialize, Deserializer, MapAccess, Visitor};
use std::fmt;

/// A violation report as browsers send it. Every field may be missing.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct BrowserCspReport {
    pub document_uri: Option<String>,
    pub referrer: Option<String>,
    pub violated_directive: Option<String>,
    pub effective_directive: Option<String>,
    pub original_policy: Option<String>,
    pub disposition: Option<String>,
    pub blocked_uri: Option<String>,
    pub status_code: Option<i64>,
    pub source_file: Option<String>,
    pub line_number: Option<i64>,
    pub column_number: Option<i64>,
    pub script_sample: Option<String>,
}

/// The request body: `{"csp-report": {...}}`.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct BrowserCspDocument {
    pub csp_report: BrowserCspReport,
}

const REPORT_FIELDS: &[&str] = &[
    "document-uri",
    "referrer",
    "violated-directive",
    "effective-directive",
    "original-policy",
    "disposition",
    "blocked-uri",
    "status-code",
    "source-file",
    "line-number",
    "column-number",
    "script-sample",
];

const DOCUMENT_FIELDS: &[&str] = &["csp-report"];

// Hand-written so that type errors carry the offending key, and `null`
// counts as absent. Keys match without regard to ASCII case.
impl<'de> Deserialize<'de> for BrowserCspReport {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ReportVisitor;

        impl<'de> Visitor<'de> for ReportVisitor {
            type Value = BrowserCspReport;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a CSP report object")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut report = BrowserCspReport::default();
                while let Some(key) = map.next_key::<String>()? {
                    match key.to_ascii_lowercase().as_str() {
                        "document-uri" => report.document_uri = field_value(&mut map, &key)?,
                        "referrer" => report.referrer = field_value(&mut map, &key)?,
                        "violated-directive" => {
                            report.violated_directive = field_value(&mut map, &key)?
                        }
                        "effective-directive" => {
                            report.effective_directive = field_value(&mut map, &key)?
                        }
                        "original-policy" => report.original_policy = field_value(&mut map, &key)?,
                        "disposition" => report.disposition = field_value(&mut map, &key)?,
                        "blocked-uri" => report.blocked_uri = field_value(&mut map, &key)?,
                        "status-code" => report.status_code = field_value(&mut map, &key)?,
                        "source-file" => report.source_file = field_value(&mut map, &key)?,
                        "line-number" => report.line_number = field_value(&mut map, &key)?,
                        "column-number" => report.column_number = field_value(&mut map, &key)?,
                        "script-sample" => report.script_sample = field_value(&mut map, &key)?,
                        _ => return Err(de::Error::unknown_field(&key, REPORT_FIELDS)),
                    }
                }
                Ok(report)
            }
        }

        deserializer.deserialize_map(ReportVisitor)
    }
}

impl<'de> Deserialize<'de> for BrowserCspDocument {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DocumentVisitor;

        impl<'de> Visitor<'de> for DocumentVisitor {
            type Value = BrowserCspDocument;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a CSP report document")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut document = BrowserCspDocument::default();
                while let Some(key) = map.next_key::<String>()? {
                    match key.to_ascii_lowercase().as_str() {
                        "csp-report" => {
                            let report: Option<BrowserCspReport> = field_value(&mut map, &key)?;
                            document.csp_report = report.unwrap_or_default();
                        }
                        _ => return Err(de::Error::unknown_field(&key, DOCUMENT_FIELDS)),
                    }
                }
                Ok(document)
            }
        }

        deserializer.deserialize_map(DocumentVisitor)
    }
}

pub fn null_string(value: Option<&str>) -> String {
    value.unwrap_or_default().to_string()
}

pub fn null_int_to_string(value: Option<i64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Query flag semantics: anything but `""` and `"0"` is true.
pub fn string_to_bool(value: &str) -> bool {
    !matches!(value, "" | "0")
}

impl From<&BrowserCspReport> for CspReport {
    fn from(r: &BrowserCspReport) -> Self {
        CspReport {
            document_uri: null_string(r.document_uri.as_deref()),
            referrer_uri: null_string(r.referrer.as_deref()),
            violated_directive: null_string(r.violated_directive.as_deref()),
            effective_directive: null_string(r.effective_directive.as_deref()),
            original_policy: null_string(r.original_policy.as_deref()),
            disposition: null_string(r.disposition.as_deref()),
            blocked_uri: null_string(r.blocked_uri.as_deref()),
            status_code: null_int_to_string(r.status_code),
            source_uri: null_string(r.source_file.as_deref()),
            line_number: null_int_to_string(r.line_number),
            column_number: null_int_to_string(r.column_number),
            script_sample: null_string(r.script_sample.as_deref()),
        }
    }
}
