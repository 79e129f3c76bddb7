use crate::api::{SEND_PATH, SendRequest, SendResponse};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};

/// Delivers submission envelopes to the storage service.
///
/// Implementations are shared by all in-flight requests and must not
/// serialize them.
#[async_trait]
pub trait Forwarder: Send + Sync {
    async fn send(&self, request: SendRequest) -> Result<SendResponse>;
}

/// `Send` as a JSON POST against the storage service.
#[derive(Debug, Clone)]
pub struct HttpForwarder {
    client: Client,
    endpoint: Url,
}

impl HttpForwarder {
    pub fn new(base: &str) -> Result<HttpForwarder> {
        let endpoint = Url::parse(base)
            .and_then(|base| base.join(SEND_PATH))
            .with_context(|| format!("invalid storage service address {base}"))?;
        let client = Client::builder().build()?;
        Ok(HttpForwarder { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl Forwarder for HttpForwarder {
    async fn send(&self, request: SendRequest) -> Result<SendResponse> {
        let res = self
            .client
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await?
            .error_for_status()?;

        let result: SendResponse = res.json().await?;
        Ok(result)
    }
}
