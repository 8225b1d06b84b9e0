//! In-memory driver for sqlscope.
//!
//! `sqlscope-memory` implements the `Connector`, `Connection` and
//! `TransactionOps` traits from `sqlscope-core` over plain in-process tables.
//! It is the reference driver the transaction layer is tested against.
//!
//! # Role In The Architecture
//!
//! - Per-transaction snapshots with a write log replayed at commit
//! - Unique, required and max-length constraints reported with query-engine codes
//! - One-shot fault injection for every lifecycle call
//! - Lifecycle counters (`StoreStats`) for asserting exactly-once behavior
//!
//! # Example
//!
//! ```ignore
//! let store = MemoryStore::new()
//!     .with_model(ModelSchema::new("User").unique("email").required("email"));
//! let client = Client::new(store.clone());
//! ```

mod engine;
pub mod schema;
pub mod store;

pub use schema::ModelSchema;
pub use store::{FaultPoint, MemoryConnection, MemoryStore, MemoryTransaction, StoreStats};
