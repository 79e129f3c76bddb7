use crate::api::{Client, CspReport, Param, SendRequest};
use crate::csp::{BrowserCspDocument, string_to_bool};
use crate::decode::{DecodeError, decode_json_body};
use crate::forward::Forwarder;
use axum::Router;
use axum::extract::{ConnectInfo, Query, Request, State};
use axum::http::header::USER_AGENT;
use axum::http::request::Parts;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, warn};

/// Dependencies of the report handler.
#[derive(Clone)]
pub struct AppEnv {
    forwarder: Arc<dyn Forwarder>,
}

impl AppEnv {
    pub fn new(forwarder: Arc<dyn Forwarder>) -> AppEnv {
        AppEnv { forwarder }
    }
}

pub fn router(app: AppEnv) -> Router {
    // Every method reaches the handler so the decoder can answer 405 itself.
    Router::new()
        .route("/csp-report", any(create_csp_report))
        .layer(TraceLayer::new_for_http())
        .with_state(app)
}

/// Validates, normalizes and forwards one report.
///
/// The outcome of the forward call is logged and then dropped: the browser
/// gets 200 as soon as the body was acceptable, whether or not storage took
/// the report. Delivery is not retried.
pub async fn create_csp_report(State(app): State<AppEnv>, request: Request) -> Response {
    let (parts, body) = request.into_parts();

    let doc: BrowserCspDocument = match decode_json_body(&parts, body).await {
        Ok(doc) => doc,
        Err(err) => {
            match &err {
                DecodeError::Malformed(mr) => {
                    error!(error = %mr, status = mr.status().as_u16(), "rejected CSP report")
                }
                DecodeError::Internal(cause) => error!(
                    error = ?cause,
                    status = StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                    "Internal Server Error"
                ),
            }
            return err.into_response();
        }
    };
    debug!(csp_report = ?doc.csp_report, "Received CSP report");

    let send_request = SendRequest {
        timestamp: Utc::now(),
        param: request_params(&parts.uri),
        client: client_context(&parts),
        report: CspReport::from(&doc.csp_report),
    };
    if let Err(err) = app.forwarder.send(send_request).await {
        warn!(error = %err, "failed to forward CSP report");
    }

    StatusCode::OK.into_response()
}

/// `a`, `v`, `c` and `f` from the query string. The first occurrence of a
/// key wins; an undecodable query counts as empty.
pub fn request_params(uri: &Uri) -> Param {
    let pairs = Query::<Vec<(String, String)>>::try_from_uri(uri)
        .map(|Query(pairs)| pairs)
        .unwrap_or_default();
    let value = |key: &str| {
        pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .unwrap_or_default()
    };

    Param {
        application: value("a"),
        version: value("v"),
        checksum: value("c"),
        force: string_to_bool(&value("f")),
    }
}

pub fn client_context(parts: &Parts) -> Client {
    let remote_address = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_default();
    let user_agent = parts
        .headers
        .get(USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();

    Client {
        remote_address,
        user_agent,
    }
}

#[cfg(test)]
mod tests {
    use crate::api::{Client, CspReport, Param, SendRequest, SendResponse};
    use crate::app::{AppEnv, request_params, router};
    use crate::decode::MAX_BODY_BYTES;
    use crate::forward::Forwarder;
    use anyhow::{Result, anyhow};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::extract::ConnectInfo;
    use axum::http::{Method, Request, StatusCode, Uri};
    use axum::response::Response;
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};
    use tower::ServiceExt;

    #[derive(Default)]
    struct RecordingForwarder {
        sent: Mutex<Vec<SendRequest>>,
    }

    #[async_trait]
    impl Forwarder for RecordingForwarder {
        async fn send(&self, request: SendRequest) -> Result<SendResponse> {
            self.sent.lock().unwrap().push(request);
            Ok(SendResponse {})
        }
    }

    struct FailingForwarder;

    #[async_trait]
    impl Forwarder for FailingForwarder {
        async fn send(&self, _request: SendRequest) -> Result<SendResponse> {
            Err(anyhow!("storage service unavailable"))
        }
    }

    fn report_request(method: Method, uri: &str, body: impl Into<Body>) -> Request<Body> {
        let mut request = Request::builder()
            .method(method)
            .uri(uri)
            .header("Content-Type", "application/csp-report")
            .header("User-Agent", "Mozilla/5.0 (X11; Linux x86_64)")
            .body(body.into())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo("192.0.2.7:51234".parse::<SocketAddr>().unwrap()));
        request
    }

    async fn call(forwarder: Arc<dyn Forwarder>, request: Request<Body>) -> (Response, String) {
        let response = router(AppEnv::new(forwarder))
            .oneshot(request)
            .await
            .unwrap();
        let (parts, body) = response.into_parts();
        let body = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        (
            Response::from_parts(parts, Body::empty()),
            String::from_utf8(body.to_vec()).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_report_is_forwarded() {
        let forwarder = Arc::new(RecordingForwarder::default());
        let body = r#"{"csp-report":{"document-uri":"https://example.com/","blocked-uri":"inline","status-code":0,"line-number":12}}"#;
        let (response, text) = call(
            forwarder.clone(),
            report_request(Method::POST, "/csp-report?a=shop&v=1.2.3&c=abc123&f=1", body),
        )
        .await;

        assert_eq!(StatusCode::OK, response.status());
        assert_eq!("", text);

        let sent = forwarder.sent.lock().unwrap();
        assert_eq!(1, sent.len());
        let request = &sent[0];
        assert_eq!(
            Param {
                application: "shop".to_string(),
                version: "1.2.3".to_string(),
                checksum: "abc123".to_string(),
                force: true,
            },
            request.param
        );
        assert_eq!(
            Client {
                remote_address: "192.0.2.7:51234".to_string(),
                user_agent: "Mozilla/5.0 (X11; Linux x86_64)".to_string(),
            },
            request.client
        );
        assert_eq!(
            CspReport {
                document_uri: "https://example.com/".to_string(),
                blocked_uri: "inline".to_string(),
                status_code: "0".to_string(),
                line_number: "12".to_string(),
                ..CspReport::default()
            },
            request.report
        );
    }

    #[tokio::test]
    async fn test_empty_document_is_forwarded() {
        let forwarder = Arc::new(RecordingForwarder::default());
        let (response, _) = call(
            forwarder.clone(),
            report_request(Method::POST, "/csp-report", "{}"),
        )
        .await;

        assert_eq!(StatusCode::OK, response.status());
        let sent = forwarder.sent.lock().unwrap();
        assert_eq!(CspReport::default(), sent[0].report);
        assert_eq!(Param::default(), sent[0].param);
    }

    #[tokio::test]
    async fn test_get_is_rejected() {
        let forwarder = Arc::new(RecordingForwarder::default());
        let (response, text) = call(
            forwarder.clone(),
            report_request(Method::GET, "/csp-report", "{}"),
        )
        .await;

        assert_eq!(StatusCode::METHOD_NOT_ALLOWED, response.status());
        assert_eq!("POST", response.headers()["Allow"]);
        assert_eq!("Method Not Allowed", text);
        assert!(forwarder.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejections() {
        let forwarder = Arc::new(RecordingForwarder::default());

        let mut request = report_request(Method::POST, "/csp-report", "{}");
        request
            .headers_mut()
            .insert("Content-Type", "text/plain".parse().unwrap());
        let (response, _) = call(forwarder.clone(), request).await;
        assert_eq!(StatusCode::UNSUPPORTED_MEDIA_TYPE, response.status());

        let (response, _) = call(
            forwarder.clone(),
            report_request(Method::POST, "/csp-report", vec![b' '; MAX_BODY_BYTES + 1]),
        )
        .await;
        assert_eq!(StatusCode::PAYLOAD_TOO_LARGE, response.status());

        let (response, text) = call(
            forwarder.clone(),
            report_request(
                Method::POST,
                "/csp-report",
                r#"{"csp-report":{"document-uri":"https://x"},"extra":"y"}"#,
            ),
        )
        .await;
        assert_eq!(StatusCode::BAD_REQUEST, response.status());
        assert_eq!("Request body contains unknown field \"extra\"", text);

        let (response, text) = call(
            forwarder.clone(),
            report_request(Method::POST, "/csp-report", "{}{}"),
        )
        .await;
        assert_eq!(StatusCode::BAD_REQUEST, response.status());
        assert_eq!("Request body must only contain a single JSON object", text);

        assert!(forwarder.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_forward_failure_is_not_surfaced() {
        let (response, text) = call(
            Arc::new(FailingForwarder),
            report_request(Method::POST, "/csp-report", "{}"),
        )
        .await;

        assert_eq!(StatusCode::OK, response.status());
        assert_eq!("", text);
    }

    #[test]
    fn test_force_flag() {
        let force = |uri: &'static str| request_params(&Uri::from_static(uri)).force;
        assert!(!force("/csp-report?f=0"));
        assert!(!force("/csp-report?f="));
        assert!(!force("/csp-report"));
        assert!(force("/csp-report?f=1"));
        assert!(force("/csp-report?f=true"));
    }

    #[test]
    fn test_first_param_wins() {
        let param = request_params(&Uri::from_static("/csp-report?a=one&a=two&v=%31.0"));
        assert_eq!("one", param.application);
        assert_eq!("1.0", param.version);
        assert_eq!("", param.checksum);
    }
}
