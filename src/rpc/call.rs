use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use super::transport::Transport;
use crate::error::Result;

/// Lazily produced parameters for one call.
///
/// Streams are single-pass: a stream is drained the first time its call is
/// encoded, and the materialized list is reused by every later encode.
pub type ParamStream = Box<dyn Iterator<Item = Value> + Send>;

/// Turns the raw reply of one call into domain values.
pub type Decoder<T> = Arc<dyn Fn(Value) -> Result<Vec<T>> + Send + Sync>;

/// One `(method, params)` entry of a wire request.
#[derive(Debug, Clone, PartialEq)]
pub struct WireCall {
  pub method: String,
  pub params: Vec<Value>,
}

enum Params {
  Pending(ParamStream),
  Encoded(Vec<Value>),
}

impl Params {
  fn encoded(&mut self) -> &[Value] {
    if let Params::Pending(stream) = self {
      let values = stream.by_ref().collect();
      *self = Params::Encoded(values);
    }
    match self {
      Params::Encoded(values) => values,
      Params::Pending(_) => &[],
    }
  }
}

enum Kind<T> {
  Remote {
    method: String,
    params: Params,
    decode: Decoder<T>,
  },
  Noop,
}

/// A remote operation that can be queued, batched and decoded later.
pub struct Call<T> {
  kind: Kind<T>,
}

impl<T> Call<T> {
  /// Create a call whose parameters are produced on demand by `params`.
  pub fn new<I, F>(method: impl Into<String>, params: I, decode: F) -> Self
  where
    I: IntoIterator<Item = Value>,
    I::IntoIter: Send + 'static,
    F: Fn(Value) -> Result<Vec<T>> + Send + Sync + 'static,
  {
    Self::with_decoder(method, params, Arc::new(decode))
  }

  /// Create a call that shares its decoder with other calls.
  pub fn with_decoder<I>(method: impl Into<String>, params: I, decode: Decoder<T>) -> Self
  where
    I: IntoIterator<Item = Value>,
    I::IntoIter: Send + 'static,
  {
    Self {
      kind: Kind::Remote {
        method: method.into(),
        params: Params::Pending(Box::new(params.into_iter())),
        decode,
      },
    }
  }

  /// A placeholder for a batch position that needs no fetch.
  ///
  /// It never reaches the wire and always decodes to an empty result.
  pub fn noop() -> Self {
    Self { kind: Kind::Noop }
  }

  pub fn is_noop(&self) -> bool {
    matches!(self.kind, Kind::Noop)
  }

  #[cfg(test)]
  pub fn method(&self) -> Option<&str> {
    match &self.kind {
      Kind::Remote { method, .. } => Some(method),
      Kind::Noop => None,
    }
  }

  /// Wire form of this call, or `None` for a no-op.
  pub fn encode(&mut self) -> Option<WireCall> {
    match &mut self.kind {
      Kind::Remote { method, params, .. } => Some(WireCall {
        method: method.clone(),
        params: params.encoded().to_vec(),
      }),
      Kind::Noop => None,
    }
  }

  pub fn decode(&self, reply: Value) -> Result<Vec<T>> {
    match &self.kind {
      Kind::Remote { decode, .. } => decode(reply),
      Kind::Noop => Ok(Vec::new()),
    }
  }

  /// Send this call on its own, without batching.
  pub async fn send(mut self, transport: &dyn Transport) -> Result<Vec<T>> {
    let Some(wire) = self.encode() else {
      return Ok(Vec::new());
    };
    let reply = transport.send(&wire.method, wire.params).await?;
    self.decode(reply)
  }
}

impl<T> fmt::Debug for Call<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.kind {
      Kind::Remote { method, params, .. } => {
        let state = match params {
          Params::Pending(_) => "pending",
          Params::Encoded(_) => "encoded",
        };
        f.debug_struct("Call")
          .field("method", method)
          .field("params", &state)
          .finish_non_exhaustive()
      }
      Kind::Noop => f.write_str("Call::Noop"),
    }
  }
}
