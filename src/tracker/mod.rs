//! Roundup tracker backend.

pub mod api_types;
pub mod client;
pub mod errors;
pub mod search;
pub mod types;

pub use client::{GetOptions, RoundupClient};
pub use errors::translate;
pub use types::{Attachment, Comment, Item};
