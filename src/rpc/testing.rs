//! Scripted transport for unit tests.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;

use super::call::WireCall;
use super::transport::Transport;
use crate::error::{Error, Fault, Result};

/// Replays canned replies in order and records every request it receives.
pub(crate) struct MockTransport {
  replies: Mutex<VecDeque<Value>>,
  requests: Mutex<Vec<WireCall>>,
  translator: fn(Fault) -> Fault,
}

impl MockTransport {
  pub(crate) fn new(replies: Vec<Value>) -> Self {
    Self {
      replies: Mutex::new(replies.into()),
      requests: Mutex::new(Vec::new()),
      translator: |fault| fault,
    }
  }

  pub(crate) fn with_translator(mut self, translator: fn(Fault) -> Fault) -> Self {
    self.translator = translator;
    self
  }

  pub(crate) fn requests(&self) -> Vec<WireCall> {
    self.requests.lock().unwrap().clone()
  }
}

#[async_trait]
impl Transport for MockTransport {
  async fn send(&self, method: &str, params: Vec<Value>) -> Result<Value> {
    self.requests.lock().unwrap().push(WireCall {
      method: method.to_string(),
      params,
    });
    self
      .replies
      .lock()
      .unwrap()
      .pop_front()
      .ok_or_else(|| Error::Protocol(format!("no scripted reply for {}", method)))
  }

  fn translate(&self, fault: Fault) -> Fault {
    (self.translator)(fault)
  }
}
