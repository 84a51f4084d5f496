use async_trait::async_trait;
use reqwest::{header, Client};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, trace};
use url::Url;

use crate::error::{Error, Fault, Result};

/// The network seam: send one named remote method and return its raw reply.
///
/// Implementations surface backend-reported failures as `Error::Request`
/// and connection failures as `Error::Transport`. They do not retry.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn send(&self, method: &str, params: Vec<Value>) -> Result<Value>;

  /// Normalize a fault reported by the backend into its classified form.
  fn translate(&self, fault: Fault) -> Fault {
    fault
  }
}

#[derive(Debug, Deserialize)]
struct RpcError {
  #[serde(default)]
  code: Option<i64>,
  #[serde(default)]
  message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
  #[serde(default)]
  result: Option<Value>,
  #[serde(default)]
  error: Option<RpcError>,
}

/// JSON-RPC 2.0 over HTTP POST.
pub struct HttpTransport {
  client: Client,
  endpoint: Url,
  credentials: Option<(String, String)>,
  translator: fn(Fault) -> Fault,
  next_id: AtomicU64,
}

impl HttpTransport {
  pub fn new(endpoint: Url, timeout: Duration) -> Result<Self> {
    let mut headers = header::HeaderMap::new();
    // some trackers reject RPC requests without it
    headers.insert(
      "x-requested-with",
      header::HeaderValue::from_static("XMLHttpRequest"),
    );

    let client = Client::builder()
      .default_headers(headers)
      .timeout(timeout)
      .build()?;

    Ok(Self {
      client,
      endpoint,
      credentials: None,
      translator: |fault| fault,
      next_id: AtomicU64::new(1),
    })
  }

  /// Authenticate every request with HTTP basic auth.
  pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
    self.credentials = Some((user.into(), password.into()));
    self
  }

  pub fn with_translator(mut self, translator: fn(Fault) -> Fault) -> Self {
    self.translator = translator;
    self
  }
}

#[async_trait]
impl Transport for HttpTransport {
  async fn send(&self, method: &str, params: Vec<Value>) -> Result<Value> {
    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    let body = json!({
      "jsonrpc": "2.0",
      "method": method,
      "params": params,
      "id": id,
    });
    debug!(method, id, endpoint = %self.endpoint, "sending request");

    let mut request = self.client.post(self.endpoint.clone()).json(&body);
    if let Some((user, password)) = &self.credentials {
      request = request.basic_auth(user, Some(password));
    }

    let response = request.send().await?.error_for_status()?;
    let response: RpcResponse = response.json().await?;
    trace!(id, "received reply");

    match response.error {
      Some(err) => {
        let fault = Fault::new(err.code.map(|c| c.to_string()), err.message);
        Err(Error::Request(self.translate(fault)))
      }
      None => Ok(response.result.unwrap_or(Value::Null)),
    }
  }

  fn translate(&self, fault: Fault) -> Fault {
    (self.translator)(fault)
  }
}
