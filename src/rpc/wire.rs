//! Batch wire protocol.
//!
//! A batch is sent as one `system.multicall` whose params are
//! `[{"method": m, "params": [...]}, ...]`. The reply is an array of the same
//! length, each entry either `{"result": value}` or
//! `{"error": {"kind": k, "message": m}}`.

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::call::WireCall;
use super::transport::Transport;
use crate::error::{Error, Fault, Result};

pub const MULTICALL_METHOD: &str = "system.multicall";

/// Outcome of one position of a batched reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
  Value(Value),
  Fault(Fault),
}

#[derive(Debug, Deserialize)]
struct WireFault {
  #[serde(default)]
  kind: Option<String>,
  #[serde(default)]
  message: String,
}

#[derive(Debug, Deserialize)]
struct WireReply {
  #[serde(default)]
  result: Option<Value>,
  #[serde(default)]
  error: Option<WireFault>,
}

impl WireReply {
  fn into_reply(self, transport: &dyn Transport) -> Reply {
    match self.error {
      Some(fault) => Reply::Fault(transport.translate(Fault::new(fault.kind, fault.message))),
      None => Reply::Value(self.result.unwrap_or(Value::Null)),
    }
  }
}

/// Send `calls` in one round trip and return one reply per call, in order.
///
/// A reply whose length differs from the request is a protocol violation.
pub async fn multicall(transport: &dyn Transport, calls: Vec<WireCall>) -> Result<Vec<Reply>> {
  let expected = calls.len();
  debug!(calls = expected, "sending multicall");

  let params = calls
    .into_iter()
    .map(|call| json!({ "method": call.method, "params": call.params }))
    .collect();
  let reply = transport.send(MULTICALL_METHOD, params).await?;

  let entries: Vec<WireReply> = serde_json::from_value(reply)
    .map_err(|e| Error::Protocol(format!("malformed multicall reply: {}", e)))?;
  if entries.len() != expected {
    return Err(Error::Protocol(format!(
      "multicall returned {} replies for {} calls",
      entries.len(),
      expected
    )));
  }

  Ok(
    entries
      .into_iter()
      .map(|entry| entry.into_reply(transport))
      .collect(),
  )
}
