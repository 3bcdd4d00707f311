//! Tag-based query cache.
//!
//! Each distinct read operation is keyed by its identity (operation name +
//! normalized arguments) and tagged with the resource identifiers its
//! response depends on. A write invalidates by tag, and every cached read
//! whose tag set intersects refetches (when subscribed) or is evicted.

mod entry;
mod key;
mod store;
mod tag;

pub use entry::QueryState;
pub use key::OperationKey;
pub use store::{QueryCache, Subscription};
pub use tag::{Tag, TagId};
