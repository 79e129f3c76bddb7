//! Strict JSON request body decoding.
//!
//! A body is accepted only if it arrives by `POST`, carries an acceptable
//! content type (or none), fits in [`MAX_BODY_BYTES`], and holds exactly one
//! JSON value that deserializes without unknown fields. Every rejection is a
//! [`MalformedRequest`] carrying the status code the client gets to see.

use axum::body::Body;
use axum::http::header::{ALLOW, CONTENT_TYPE};
use axum::http::request::Parts;
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use http_body_util::LengthLimitError;
use serde::de::{DeserializeOwned, Error as _, MapAccess};
use serde::Deserialize;
use serde_json::error::Category;
use std::error::Error as StdError;
use thiserror::Error;
use tracing::{error, info};

pub const MAX_BODY_BYTES: usize = 1_048_576;

pub const ACCEPTED_MEDIA_TYPES: &[&str] =
    &["application/csp-report", "application/json", "text/json"];

const UNKNOWN_FIELD: &str = "unknown field `";
const INVALID_FIELD: &str = "invalid value for field `";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{msg}")]
pub struct MalformedRequest {
    status: StatusCode,
    msg: String,
}

impl MalformedRequest {
    fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        MalformedRequest {
            status,
            msg: msg.into(),
        }
    }

    fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error(transparent)]
    Malformed(#[from] MalformedRequest),
    /// Anything we could not classify. The detail stays server side.
    #[error("unclassified decode failure: {0}")]
    Internal(#[source] anyhow::Error),
}

impl DecodeError {
    pub fn status(&self) -> StatusCode {
        match self {
            DecodeError::Malformed(mr) => mr.status(),
            DecodeError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for MalformedRequest {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.msg).into_response();
        if self.status == StatusCode::METHOD_NOT_ALLOWED {
            response
                .headers_mut()
                .insert(ALLOW, HeaderValue::from_static("POST"));
        }
        response
    }
}

impl IntoResponse for DecodeError {
    fn into_response(self) -> Response {
        match self {
            DecodeError::Malformed(mr) => mr.into_response(),
            DecodeError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal Server Error",
            )
                .into_response(),
        }
    }
}

/// Reads the next map value, tagging type mismatches with the key they
/// belong to so the decoder can report it.
pub fn field_value<'de, A, T>(map: &mut A, key: &str) -> Result<T, A::Error>
where
    A: MapAccess<'de>,
    T: Deserialize<'de>,
{
    map.next_value().map_err(|err| {
        let msg = err.to_string();
        if msg.starts_with("invalid type: ") || msg.starts_with("invalid value: ") {
            A::Error::custom(format!("{INVALID_FIELD}{key}`: {msg}"))
        } else {
            err
        }
    })
}

pub async fn decode_json_body<T>(parts: &Parts, body: Body) -> Result<T, DecodeError>
where
    T: DeserializeOwned,
{
    if parts.method != Method::POST {
        return Err(
            MalformedRequest::new(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed").into(),
        );
    }

    if let Some(value) = parts.headers.get(CONTENT_TYPE).filter(|v| !v.is_empty()) {
        let mime = value.to_str().map(media_type).unwrap_or_default();
        if !ACCEPTED_MEDIA_TYPES.contains(&mime.as_str()) {
            return Err(
                MalformedRequest::new(StatusCode::UNSUPPORTED_MEDIA_TYPE, "Unsupported Media Type")
                    .into(),
            );
        }
        info!(content_type = %mime, "accepted report content type");
    }

    let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(err) if exceeds_limit(&err) => {
            return Err(MalformedRequest::new(
                StatusCode::PAYLOAD_TOO_LARGE,
                "Request body must not be larger than 1MB",
            )
            .into());
        }
        Err(err) => {
            error!(error = %err, "failed to read request body");
            return Err(DecodeError::Internal(err.into()));
        }
    };

    decode_slice(&bytes)
}

/// The structural part of [`decode_json_body`], on an already bounded body.
pub fn decode_slice<T>(body: &[u8]) -> Result<T, DecodeError>
where
    T: DeserializeOwned,
{
    if body
        .iter()
        .all(|b| matches!(b, b' ' | b'\t' | b'\n' | b'\r'))
    {
        return Err(MalformedRequest::bad_request("Request body must not be empty").into());
    }

    let mut de = serde_json::Deserializer::from_slice(body);
    let value = T::deserialize(&mut de).map_err(|err| classify(err, body))?;

    if de.end().is_err() {
        return Err(MalformedRequest::bad_request(
            "Request body must only contain a single JSON object",
        )
        .into());
    }

    Ok(value)
}

fn classify(err: serde_json::Error, body: &[u8]) -> DecodeError {
    let position = byte_offset(body, err.line(), err.column());
    match err.classify() {
        Category::Syntax => MalformedRequest::bad_request(format!(
            "Request body contains badly-formed JSON (at position {position})"
        ))
        .into(),
        Category::Eof => {
            MalformedRequest::bad_request("Request body contains badly-formed JSON").into()
        }
        Category::Data => {
            let msg = err.to_string();
            if let Some(field) = backquoted(&msg, UNKNOWN_FIELD) {
                MalformedRequest::bad_request(format!(
                    "Request body contains unknown field \"{field}\""
                ))
                .into()
            } else {
                let field = backquoted(&msg, INVALID_FIELD).unwrap_or_default();
                MalformedRequest::bad_request(format!(
                    "Request body contains an invalid value for the \"{field}\" field (at position {position})"
                ))
                .into()
            }
        }
        Category::Io => {
            error!(error = %err, "Unknown error");
            DecodeError::Internal(err.into())
        }
    }
}

fn backquoted<'a>(msg: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = msg.strip_prefix(prefix)?;
    rest.split_once('`').map(|(name, _)| name)
}

/// Turns serde_json's 1-based line and column into a byte offset. The result
/// points just past the offending byte.
fn byte_offset(body: &[u8], line: usize, column: usize) -> usize {
    let line_start = match line {
        0 | 1 => 0,
        n => body
            .iter()
            .enumerate()
            .filter(|(_, b)| **b == b'\n')
            .nth(n - 2)
            .map(|(i, _)| i + 1)
            .unwrap_or(0),
    };
    (line_start + column).min(body.len())
}

/// `text/JSON; charset=utf-8` -> `text/json`
fn media_type(value: &str) -> String {
    value
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn exceeds_limit(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(err) = current {
        if err.is::<LengthLimitError>() {
            return true;
        }
        current = err.source();
    }
    false
}
