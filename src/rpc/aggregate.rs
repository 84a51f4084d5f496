use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use super::call::{Call, Decoder, WireCall};
use super::transport::Transport;
use super::wire::{multicall, Reply};
use crate::error::{Error, Result};

/// Decoded result of one batched call.
///
/// A fault for one call stays in its slot; it only surfaces when that slot is
/// consumed.
pub type Slot<T> = Result<Vec<T>>;

/// Flatten slots into one sequence, raising the first fault encountered.
pub fn collect_slots<T>(slots: Vec<Slot<T>>) -> Result<Vec<T>> {
  let mut values = Vec::new();
  for slot in slots {
    values.extend(slot?);
  }
  Ok(values)
}

/// Anything that can take part in a merged round trip.
pub trait Batch {
  type Output;

  /// Number of entries this batch contributes to the wire request.
  fn remote_len(&self) -> usize;

  fn encode(&mut self) -> Result<Vec<WireCall>>;

  /// Decode exactly `remote_len()` replies.
  fn decode(&self, replies: Vec<Reply>) -> Result<Self::Output>;
}

/// Batches calls of one remote method into a single multicall.
#[derive(Debug)]
pub struct Aggregator<T> {
  calls: Vec<Call<T>>,
  abort_on_fault: bool,
}

impl<T> Aggregator<T> {
  pub fn new(calls: impl IntoIterator<Item = Call<T>>) -> Self {
    Self {
      calls: calls.into_iter().collect(),
      abort_on_fault: false,
    }
  }

  /// One call of `method` per parameter list, all sharing `decode`.
  pub fn from_params<P, F>(method: &str, params: P, decode: F) -> Self
  where
    P: IntoIterator,
    P::Item: IntoIterator<Item = Value>,
    <P::Item as IntoIterator>::IntoIter: Send + 'static,
    F: Fn(Value) -> Result<Vec<T>> + Send + Sync + 'static,
  {
    let decode: Decoder<T> = Arc::new(decode);
    Self::new(
      params
        .into_iter()
        .map(|p| Call::with_decoder(method, p, decode.clone())),
    )
  }

  /// A batch holding a single no-op call; it never touches the network and
  /// decodes to one empty slot.
  pub fn noop() -> Self {
    Self::new([Call::noop()])
  }

  /// Fail the whole decode on the first faulted slot.
  pub fn abort_on_fault(mut self) -> Self {
    self.abort_on_fault = true;
    self
  }

  /// Number of calls, including no-ops.
  #[cfg(test)]
  pub fn len(&self) -> usize {
    self.calls.len()
  }

  /// Adapt the decoded output, e.g. to merge batches of different types.
  pub fn map<O, F>(self, f: F) -> Mapped<Self, F>
  where
    F: Fn(Vec<Slot<T>>) -> O,
  {
    Mapped { inner: self, f }
  }

  pub async fn send(mut self, transport: &dyn Transport) -> Result<Vec<Slot<T>>> {
    let wire = self.encode()?;
    let replies = if wire.is_empty() {
      Vec::new()
    } else {
      multicall(transport, wire).await?
    };
    self.decode(replies)
  }
}

impl<T> Batch for Aggregator<T> {
  type Output = Vec<Slot<T>>;

  fn remote_len(&self) -> usize {
    self.calls.iter().filter(|c| !c.is_noop()).count()
  }

  fn encode(&mut self) -> Result<Vec<WireCall>> {
    let wire: Vec<WireCall> = self.calls.iter_mut().filter_map(Call::encode).collect();
    if let Some(first) = wire.first() {
      if let Some(other) = wire.iter().find(|w| w.method != first.method) {
        return Err(Error::Protocol(format!(
          "cannot batch {} with {}",
          other.method, first.method
        )));
      }
    }
    Ok(wire)
  }

  fn decode(&self, replies: Vec<Reply>) -> Result<Vec<Slot<T>>> {
    let expected = self.remote_len();
    if replies.len() != expected {
      return Err(Error::Protocol(format!(
        "expected {} replies, got {}",
        expected,
        replies.len()
      )));
    }

    let mut replies = replies.into_iter();
    let mut slots = Vec::with_capacity(self.calls.len());
    for call in &self.calls {
      let slot = if call.is_noop() {
        Ok(Vec::new())
      } else {
        match replies.next() {
          Some(Reply::Value(value)) => call.decode(value),
          Some(Reply::Fault(fault)) => Err(Error::Request(fault)),
          None => Err(Error::Protocol("reply ended early".to_string())),
        }
      };
      let slot = match slot {
        Err(e) if self.abort_on_fault => return Err(e),
        slot => slot,
      };
      slots.push(slot);
    }
    Ok(slots)
  }
}

/// A batch whose decoded output is passed through a function.
pub struct Mapped<B, F> {
  inner: B,
  f: F,
}

impl<B, O, F> Batch for Mapped<B, F>
where
  B: Batch,
  F: Fn(B::Output) -> O,
{
  type Output = O;

  fn remote_len(&self) -> usize {
    self.inner.remote_len()
  }

  fn encode(&mut self) -> Result<Vec<WireCall>> {
    self.inner.encode()
  }

  fn decode(&self, replies: Vec<Reply>) -> Result<O> {
    self.inner.decode(replies).map(&self.f)
  }
}

/// Sends several independent batches in one round trip.
///
/// The combined reply is split into contiguous slices sized by each batch's
/// remote call count, in the order the batches were pushed. Each batch decodes
/// only its own slice, so its output matches a standalone send.
pub struct MergedAggregator<O> {
  batches: Vec<Box<dyn Batch<Output = O> + Send>>,
}

impl<O> Default for MergedAggregator<O> {
  fn default() -> Self {
    Self {
      batches: Vec::new(),
    }
  }
}

impl<O> MergedAggregator<O> {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push<B>(&mut self, batch: B)
  where
    B: Batch<Output = O> + Send + 'static,
  {
    self.batches.push(Box::new(batch));
  }

  #[cfg(test)]
  pub fn with<B>(mut self, batch: B) -> Self
  where
    B: Batch<Output = O> + Send + 'static,
  {
    self.push(batch);
    self
  }

  /// Slice sizes the combined reply will be split into.
  pub fn slice_lens(&self) -> Vec<usize> {
    self.batches.iter().map(|b| b.remote_len()).collect()
  }

  pub fn encode(&mut self) -> Result<Vec<WireCall>> {
    let mut wire = Vec::new();
    for batch in &mut self.batches {
      wire.extend(batch.encode()?);
    }
    Ok(wire)
  }

  /// One result per batch; a failure confined to one slice leaves the others
  /// intact.
  pub fn decode(&self, replies: Vec<Reply>) -> Result<Vec<Result<O>>> {
    let lens = self.slice_lens();
    let expected: usize = lens.iter().sum();
    if replies.len() != expected {
      return Err(Error::Protocol(format!(
        "merged batch expected {} replies, got {}",
        expected,
        replies.len()
      )));
    }

    let mut replies = replies.into_iter();
    Ok(
      self
        .batches
        .iter()
        .zip(lens)
        .map(|(batch, len)| batch.decode(replies.by_ref().take(len).collect()))
        .collect(),
    )
  }

  pub async fn send(mut self, transport: &dyn Transport) -> Result<Vec<Result<O>>> {
    let wire = self.encode()?;
    debug!(batches = self.batches.len(), calls = wire.len(), "sending merged batch");
    let replies = if wire.is_empty() {
      Vec::new()
    } else {
      multicall(transport, wire).await?
    };
    self.decode(replies)
  }
}
