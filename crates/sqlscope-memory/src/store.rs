//! The shared store, its connections and transactions.

use crate::engine::{self, Change, Sequences, Tables};
use crate::schema::ModelSchema;
use asupersync::{Cx, Outcome};
use sqlscope_core::{
    Connection, Connector, Request, StoreError, TransactionOps, TransactionOptions,
};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A driver call that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    Connect,
    Begin,
    Execute,
    Commit,
    Rollback,
    Disconnect,
}

/// Counters for every lifecycle call the store has seen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub connects: usize,
    pub disconnects: usize,
    pub begins: usize,
    pub commits: usize,
    pub rollbacks: usize,
    /// Transactions dropped without commit or rollback
    pub abandoned: usize,
    pub executes: usize,
}

type Hook = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct StoreState {
    schemas: HashMap<String, ModelSchema>,
    sequences: Sequences,
    tables: Tables,
    stats: StoreStats,
    faults: HashMap<FaultPoint, VecDeque<StoreError>>,
    last_begin_options: Option<TransactionOptions>,
    before_commit: Option<Hook>,
}

impl StoreState {
    fn take_fault(&mut self, point: FaultPoint) -> Option<StoreError> {
        let err = self.faults.get_mut(&point)?.pop_front();
        if err.is_some() {
            tracing::debug!(?point, "injecting store fault");
        }
        err
    }
}

/// An in-memory store shared by every connection made from it.
///
/// Cloning the store shares its tables, so tests can keep a clone to inspect
/// what was committed while a client owns another.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model.
    #[must_use]
    pub fn with_model(self, schema: ModelSchema) -> Self {
        self.register(schema);
        self
    }

    pub fn register(&self, schema: ModelSchema) {
        self.lock()
            .schemas
            .insert(schema.name().to_string(), schema);
    }

    /// Make the next call at `point` fail with `err`.
    ///
    /// Faults queue up: registering two for the same point fails the next
    /// two calls.
    pub fn fail_next(&self, point: FaultPoint, err: StoreError) {
        self.lock().faults.entry(point).or_default().push_back(err);
    }

    /// Run `hook` at the start of every commit, before anything is applied.
    pub fn on_before_commit(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.lock().before_commit = Some(Arc::new(hook));
    }

    pub fn stats(&self) -> StoreStats {
        self.lock().stats.clone()
    }

    /// The options the most recent transaction was begun with.
    pub fn last_begin_options(&self) -> Option<TransactionOptions> {
        self.lock().last_begin_options.clone()
    }

    /// Committed rows of `model`, ordered by id.
    pub fn rows(&self, model: &str) -> Vec<serde_json::Value> {
        self.lock().tables.rows(model)
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn connect_sync(&self) -> Result<MemoryConnection, StoreError> {
        let mut state = self.lock();
        if let Some(err) = state.take_fault(FaultPoint::Connect) {
            return Err(err);
        }
        state.stats.connects += 1;
        tracing::trace!(connects = state.stats.connects, "memory store connected");
        Ok(MemoryConnection {
            store: self.clone(),
            open: AtomicBool::new(true),
        })
    }
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        let mut models: Vec<&String> = state.schemas.keys().collect();
        models.sort();
        f.debug_struct("MemoryStore")
            .field("models", &models)
            .field("stats", &state.stats)
            .finish_non_exhaustive()
    }
}

impl Connector for MemoryStore {
    type Connection = MemoryConnection;

    fn connect(&self, _cx: &Cx) -> impl Future<Output = Outcome<MemoryConnection, StoreError>> + Send {
        let result = self.connect_sync();
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }
}

fn connection_closed() -> StoreError {
    StoreError::known("P1017", "Server has closed the connection.")
}

fn transaction_closed() -> StoreError {
    StoreError::known(
        "P2028",
        "Transaction API error: Transaction already closed.",
    )
}

/// A connection to a [`MemoryStore`].
///
/// Requests outside a transaction are applied to the committed tables
/// immediately, one statement at a time.
pub struct MemoryConnection {
    store: MemoryStore,
    open: AtomicBool,
}

impl MemoryConnection {
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn execute_sync(&self, request: &Request) -> Result<serde_json::Value, StoreError> {
        if !self.is_open() {
            return Err(connection_closed());
        }
        let mut guard = self.store.lock();
        let state = &mut *guard;
        if let Some(err) = state.take_fault(FaultPoint::Execute) {
            return Err(err);
        }
        state.stats.executes += 1;

        let mut staged = state.tables.clone();
        let mut log = Vec::new();
        let value = engine::execute(
            &state.schemas,
            &mut state.sequences,
            &mut staged,
            request,
            &mut log,
        )?;
        state.tables = staged;
        Ok(value)
    }

    fn begin_sync(&self, options: &TransactionOptions) -> Result<MemoryTransaction, StoreError> {
        if !self.is_open() {
            return Err(connection_closed());
        }
        let mut state = self.store.lock();
        if let Some(err) = state.take_fault(FaultPoint::Begin) {
            return Err(err);
        }
        state.stats.begins += 1;
        state.last_begin_options = Some(options.clone());
        tracing::trace!(?options, "memory transaction started");
        Ok(MemoryTransaction {
            store: self.store.clone(),
            working: Mutex::new(state.tables.clone()),
            log: Mutex::new(Vec::new()),
            finished: AtomicBool::new(false),
        })
    }

    fn disconnect_sync(&self) -> Result<(), StoreError> {
        self.open.store(false, Ordering::Release);
        let mut state = self.store.lock();
        state.stats.disconnects += 1;
        match state.take_fault(FaultPoint::Disconnect) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for MemoryConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryConnection")
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

impl Connection for MemoryConnection {
    type Tx = MemoryTransaction;

    fn execute(
        &self,
        _cx: &Cx,
        request: Request,
    ) -> impl Future<Output = Outcome<serde_json::Value, StoreError>> + Send {
        let result = self.execute_sync(&request);
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    fn begin(
        &self,
        _cx: &Cx,
        options: &TransactionOptions,
    ) -> impl Future<Output = Outcome<MemoryTransaction, StoreError>> + Send {
        let result = self.begin_sync(options);
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    fn disconnect(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), StoreError>> + Send {
        let result = self.disconnect_sync();
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }
}

/// A transaction on a [`MemoryStore`].
///
/// Reads and writes go to a snapshot of the committed tables taken at begin.
/// Commit replays the recorded writes onto the current committed tables and
/// fails with a write conflict if another commit touched the same rows in
/// the meantime. Dropping the transaction without finishing it discards its
/// writes.
pub struct MemoryTransaction {
    store: MemoryStore,
    working: Mutex<Tables>,
    log: Mutex<Vec<Change>>,
    finished: AtomicBool,
}

impl MemoryTransaction {
    fn execute_sync(&self, request: &Request) -> Result<serde_json::Value, StoreError> {
        if self.finished.load(Ordering::Acquire) {
            return Err(transaction_closed());
        }
        let mut guard = self.store.lock();
        let state = &mut *guard;
        if let Some(err) = state.take_fault(FaultPoint::Execute) {
            return Err(err);
        }
        state.stats.executes += 1;

        let mut working = self.working.lock().unwrap_or_else(PoisonError::into_inner);
        let mut staged = working.clone();
        let mut changes = Vec::new();
        let value = engine::execute(
            &state.schemas,
            &mut state.sequences,
            &mut staged,
            request,
            &mut changes,
        )?;
        *working = staged;
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(changes);
        Ok(value)
    }

    fn commit_sync(&self) -> Result<(), StoreError> {
        if self.finished.swap(true, Ordering::AcqRel) {
            return Err(transaction_closed());
        }
        let hook = self.store.lock().before_commit.clone();
        if let Some(hook) = hook {
            hook();
        }

        let mut guard = self.store.lock();
        let state = &mut *guard;
        state.stats.commits += 1;
        if let Some(err) = state.take_fault(FaultPoint::Commit) {
            return Err(err);
        }
        let log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        engine::replay(&state.schemas, &mut state.tables, &log)?;
        tracing::trace!(changes = log.len(), "memory transaction committed");
        Ok(())
    }

    fn rollback_sync(&self) -> Result<(), StoreError> {
        if self.finished.swap(true, Ordering::AcqRel) {
            return Err(transaction_closed());
        }
        let mut state = self.store.lock();
        state.stats.rollbacks += 1;
        match state.take_fault(FaultPoint::Rollback) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if !self.finished.load(Ordering::Acquire) {
            self.store.lock().stats.abandoned += 1;
        }
    }
}

impl fmt::Debug for MemoryTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTransaction")
            .field("finished", &self.finished.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl TransactionOps for MemoryTransaction {
    fn execute(
        &self,
        _cx: &Cx,
        request: Request,
    ) -> impl Future<Output = Outcome<serde_json::Value, StoreError>> + Send {
        let result = self.execute_sync(&request);
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    fn commit(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), StoreError>> + Send {
        let result = self.commit_sync();
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    fn rollback(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), StoreError>> + Send {
        let result = self.rollback_sync();
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }
}
