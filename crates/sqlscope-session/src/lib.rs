//! Scoped clients and ambient transactions for sqlscope.
//!
//! `sqlscope-session` is the **transaction layer**. It owns the rules for
//! when a transaction is begun, joined, committed or rolled back, and for
//! when a connection is opened and closed.
//!
//! # Role In The Architecture
//!
//! - **Client**: connects per scope and disconnects exactly once.
//! - **Scope**: the explicit context threaded through data-access code.
//! - **Transactions**: nested calls join the active transaction; only the
//!   outermost call commits or rolls back.
//! - **Operations**: lazily resolved, so they run wherever they are awaited.
//!
//! # Example
//!
//! ```ignore
//! let client = Client::new(store);
//! let users = model::<User>();
//!
//! let exit = client
//!     .scoped(&cx, |scope| async move {
//!         scope
//!             .transaction(|tx| async move {
//!                 let user = try_exit!(users.create(json!({"email": "a@b.c"})).run(&tx).await);
//!                 Exit::Success(user)
//!             })
//!             .await
//!     })
//!     .await;
//! ```

pub mod client;
pub mod config;
pub mod operation;
pub mod scope;
pub mod transaction;

#[cfg(test)]
mod testing;

pub use client::Client;
pub use config::ClientConfig;
pub use operation::{BatchPayload, Model, ModelDelegate, Operation, model};
pub use scope::{Executor, Scope};
pub use transaction::{ActiveTransaction, TransactionHandle};
