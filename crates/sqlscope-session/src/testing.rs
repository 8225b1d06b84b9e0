//! Mock driver for unit tests.

use asupersync::types::CancelReason;
use asupersync::{Cx, Outcome};
use sqlscope_core::{
    Connection, Connector, Exit, Request, StoreError, TransactionOps, TransactionOptions,
};
use std::fmt::Debug;
use std::future::Future;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
pub(crate) struct MockState {
    pub connects: usize,
    pub disconnects: usize,
    pub begins: usize,
    pub commits: usize,
    pub rollbacks: usize,
    pub executes: usize,
    pub tx_executes: usize,
    pub last_options: Option<TransactionOptions>,
    pub fail_connect: Option<StoreError>,
    pub fail_disconnect: Option<StoreError>,
    pub fail_begin: Option<StoreError>,
    pub fail_commit: Option<StoreError>,
    pub cancel_commit: Option<CancelReason>,
    /// Request cancellation of the caller's context when commit is called.
    pub cancel_cx_on_commit: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct MockConnection {
    state: Arc<Mutex<MockState>>,
}

impl MockConnection {
    pub(crate) fn new(state: Arc<Mutex<MockState>>) -> Self {
        Self { state }
    }
}

#[derive(Debug)]
pub(crate) struct MockTransaction {
    state: Arc<Mutex<MockState>>,
}

impl TransactionOps for MockTransaction {
    fn execute(
        &self,
        _cx: &Cx,
        request: Request,
    ) -> impl Future<Output = Outcome<serde_json::Value, StoreError>> + Send {
        let state = Arc::clone(&self.state);
        async move {
            state.lock().expect("lock poisoned").tx_executes += 1;
            Outcome::Ok(serde_json::json!({ "model": request.model }))
        }
    }

    fn commit(&self, cx: &Cx) -> impl Future<Output = Outcome<(), StoreError>> + Send {
        let state = Arc::clone(&self.state);
        if state.lock().expect("lock poisoned").cancel_cx_on_commit {
            cx.set_cancel_requested(true);
        }
        async move {
            let mut guard = state.lock().expect("lock poisoned");
            guard.commits += 1;
            if let Some(reason) = guard.cancel_commit.take() {
                return Outcome::Cancelled(reason);
            }
            match guard.fail_commit.take() {
                Some(err) => Outcome::Err(err),
                None => Outcome::Ok(()),
            }
        }
    }

    fn rollback(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), StoreError>> + Send {
        let state = Arc::clone(&self.state);
        async move {
            state.lock().expect("lock poisoned").rollbacks += 1;
            Outcome::Ok(())
        }
    }
}

impl Connection for MockConnection {
    type Tx = MockTransaction;

    fn execute(
        &self,
        _cx: &Cx,
        request: Request,
    ) -> impl Future<Output = Outcome<serde_json::Value, StoreError>> + Send {
        let state = Arc::clone(&self.state);
        async move {
            state.lock().expect("lock poisoned").executes += 1;
            Outcome::Ok(serde_json::json!({ "model": request.model }))
        }
    }

    fn begin(
        &self,
        _cx: &Cx,
        options: &TransactionOptions,
    ) -> impl Future<Output = Outcome<MockTransaction, StoreError>> + Send {
        let state = Arc::clone(&self.state);
        let options = options.clone();
        async move {
            let mut guard = state.lock().expect("lock poisoned");
            if let Some(err) = guard.fail_begin.take() {
                return Outcome::Err(err);
            }
            guard.begins += 1;
            guard.last_options = Some(options);
            drop(guard);
            Outcome::Ok(MockTransaction { state })
        }
    }

    fn disconnect(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), StoreError>> + Send {
        let state = Arc::clone(&self.state);
        async move {
            let mut guard = state.lock().expect("lock poisoned");
            guard.disconnects += 1;
            match guard.fail_disconnect.take() {
                Some(err) => Outcome::Err(err),
                None => Outcome::Ok(()),
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct MockConnector {
    pub state: Arc<Mutex<MockState>>,
}

impl Connector for MockConnector {
    type Connection = MockConnection;

    fn connect(&self, _cx: &Cx) -> impl Future<Output = Outcome<MockConnection, StoreError>> + Send {
        let state = Arc::clone(&self.state);
        async move {
            let mut guard = state.lock().expect("lock poisoned");
            if let Some(err) = guard.fail_connect.take() {
                return Outcome::Err(err);
            }
            guard.connects += 1;
            drop(guard);
            Outcome::Ok(MockConnection::new(state))
        }
    }
}

pub(crate) fn unwrap_exit<T: Debug, E: Debug>(exit: Exit<T, E>) -> T {
    match exit {
        Exit::Success(v) => v,
        other => std::panic::panic_any(format!("unexpected exit: {other:?}")),
    }
}
