//! Remote call composition and batching.
//!
//! This module is tracker-agnostic. It provides:
//! - `Call`: one remote method invocation with lazy parameters and a decode step
//! - `Aggregator`: many calls of one method sent as a single multicall
//! - `MergedAggregator`: several batches, possibly of different methods and
//!   output types, sent as one round trip and split back per batch
//! - `Transport`: the seam to the network

mod aggregate;
mod call;
mod transport;
mod wire;

pub use aggregate::{collect_slots, Aggregator, MergedAggregator, Slot};
pub use call::Call;
pub use transport::{HttpTransport, Transport};

#[cfg(test)]
pub(crate) mod testing;
