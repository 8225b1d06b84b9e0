//! Ambient transactions.
//!
//! [`Scope::transaction`] either joins the transaction already installed in
//! the scope or begins a new one, runs the body with the transaction in its
//! ambient context, and lets only the owning call commit or roll back:
//!
//! ```ignore
//! let exit = scope
//!     .transaction(|tx| async move {
//!         let user = try_exit!(users.create(json!({"email": "a@b.c"})).run(&tx).await);
//!         // Joins `tx` instead of opening a second transaction.
//!         try_exit!(audit_log(&tx, &user).await);
//!         Exit::Success(user)
//!     })
//!     .await;
//! ```
//!
//! Joining never creates a savepoint. A failure caught inside a joined call
//! does not undo that call's writes; they stay in the shared transaction and
//! are committed or rolled back with it.
//!
//! # Cancellation
//!
//! Interrupts and cancellation of the asupersync context are deferred while
//! a commit or rollback runs, and reported as a defect once it has finished.
//! Dropping the transaction future is different: nothing can run after the
//! drop, so a commit or rollback that is in flight is abandoned and the
//! driver discards the transaction. Always drive a transaction future to
//! completion and cancel it through the [`Cx`] or an
//! [`InterruptHandle`](sqlscope_core::InterruptHandle) instead.

use crate::scope::{Scope, honor_deferred_cancellation};
use asupersync::{Cx, Outcome};
use sqlscope_core::{
    Connection, Exit, ErrorMapper, OperationDescriptor, Request, ResourceKey, StoreError,
    TransactionOps, TransactionOptions, bracket, settle,
};
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

static NEXT_TRANSACTION_ID: AtomicU64 = AtomicU64::new(1);

struct HandleInner<T> {
    id: u64,
    tx: T,
    options: TransactionOptions,
    finalized: AtomicBool,
}

impl<T> Drop for HandleInner<T> {
    fn drop(&mut self) {
        if !self.finalized.load(Ordering::Acquire) {
            tracing::warn!(
                transaction_id = self.id,
                "transaction dropped without commit or rollback; pending writes are discarded"
            );
        }
    }
}

/// A shared handle to one driver transaction.
///
/// Every scope that joins the transaction holds a clone. Only the scope that
/// began it finalizes it, exactly once.
pub struct TransactionHandle<T> {
    inner: Arc<HandleInner<T>>,
}

impl<T: TransactionOps> TransactionHandle<T> {
    fn new(tx: T, options: TransactionOptions) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                id: NEXT_TRANSACTION_ID.fetch_add(1, Ordering::Relaxed),
                tx,
                options,
                finalized: AtomicBool::new(false),
            }),
        }
    }

    /// Process-unique transaction id.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// The options the transaction was begun with.
    pub fn options(&self) -> &TransactionOptions {
        &self.inner.options
    }

    pub fn is_finalized(&self) -> bool {
        self.inner.finalized.load(Ordering::Acquire)
    }

    /// Execute a request inside the transaction.
    pub async fn execute(
        &self,
        cx: &Cx,
        request: Request,
    ) -> Outcome<serde_json::Value, StoreError> {
        if self.is_finalized() {
            return Outcome::Err(self.finished_error("execute"));
        }
        self.inner.tx.execute(cx, request).await
    }

    async fn commit(&self, cx: &Cx) -> Outcome<(), StoreError> {
        if self.inner.finalized.swap(true, Ordering::AcqRel) {
            return Outcome::Err(self.finished_error("commit"));
        }
        self.inner.tx.commit(cx).await
    }

    async fn rollback(&self, cx: &Cx) -> Outcome<(), StoreError> {
        if self.inner.finalized.swap(true, Ordering::AcqRel) {
            return Outcome::Err(self.finished_error("rollback"));
        }
        self.inner.tx.rollback(cx).await
    }

    fn finished_error(&self, action: &str) -> StoreError {
        StoreError::unknown(format!(
            "cannot {} transaction {}: it has already been committed or rolled back",
            action,
            self.id()
        ))
    }
}

impl<T> Clone for TransactionHandle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for TransactionHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionHandle")
            .field("id", &self.inner.id)
            .field("options", &self.inner.options)
            .field("finalized", &self.inner.finalized.load(Ordering::Acquire))
            .finish()
    }
}

/// Ambient key under which the active transaction is installed.
pub struct ActiveTransaction<T>(PhantomData<fn() -> T>);

impl<T: TransactionOps> ResourceKey for ActiveTransaction<T> {
    type Value = TransactionHandle<T>;
    const NAME: &'static str = "ActiveTransaction";
}

/// How a transaction call holds its handle.
enum Lease<T> {
    /// Began the transaction; must commit or roll back.
    Owned(TransactionHandle<T>),
    /// Joined a transaction owned by an outer call.
    Joined(TransactionHandle<T>),
}

impl<T> Lease<T> {
    fn handle(&self) -> &TransactionHandle<T> {
        match self {
            Lease::Owned(handle) | Lease::Joined(handle) => handle,
        }
    }
}

impl<T> Clone for Lease<T> {
    fn clone(&self) -> Self {
        match self {
            Lease::Owned(handle) => Lease::Owned(handle.clone()),
            Lease::Joined(handle) => Lease::Joined(handle.clone()),
        }
    }
}

impl<'a, C: Connection, M: ErrorMapper> Scope<'a, C, M> {
    /// Run `body` in a transaction using the client's default options.
    ///
    /// See [`transaction_with`](Self::transaction_with).
    pub async fn transaction<V, E, F, Fut>(&self, body: F) -> Exit<V, E>
    where
        F: FnOnce(Scope<'a, C, M>) -> Fut,
        Fut: Future<Output = Exit<V, E>>,
        E: From<M::Failure> + fmt::Debug,
    {
        let options = self.config().transaction.clone();
        self.transaction_with(options, body).await
    }

    /// Run `body` in a transaction.
    ///
    /// If this scope already has an active transaction, `body` joins it:
    /// nothing is begun, `options` are ignored, and the outer call decides
    /// whether it commits. Otherwise a transaction is begun with `options`
    /// and committed if `body` succeeds, rolled back if it fails or hits a
    /// defect.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn transaction_with<V, E, F, Fut>(
        &self,
        options: TransactionOptions,
        body: F,
    ) -> Exit<V, E>
    where
        F: FnOnce(Scope<'a, C, M>) -> Fut,
        Fut: Future<Output = Exit<V, E>>,
        E: From<M::Failure> + fmt::Debug,
    {
        if let Some(defect) = self.checkpoint() {
            return Exit::Defect(defect);
        }
        let joined = self.active_transaction().cloned();
        let acquire = async {
            match joined {
                Some(handle) => {
                    tracing::debug!(transaction_id = handle.id(), "joining active transaction");
                    Exit::Success(Lease::Joined(handle))
                }
                None => self.begin(options).await.map(Lease::Owned).map_failure(E::from),
            }
        };
        self.run_leased(acquire, body).await
    }

    /// Run `body` in a brand-new transaction, whatever the ambient one.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn isolated_transaction<V, E, F, Fut>(&self, body: F) -> Exit<V, E>
    where
        F: FnOnce(Scope<'a, C, M>) -> Fut,
        Fut: Future<Output = Exit<V, E>>,
        E: From<M::Failure> + fmt::Debug,
    {
        let options = self.config().transaction.clone();
        self.isolated_transaction_with(options, body).await
    }

    /// Run `body` in a brand-new transaction begun with `options`.
    ///
    /// The new transaction shadows any active one for the duration of `body`
    /// and is committed or rolled back on its own. The outer transaction is
    /// not affected by its outcome.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn isolated_transaction_with<V, E, F, Fut>(
        &self,
        options: TransactionOptions,
        body: F,
    ) -> Exit<V, E>
    where
        F: FnOnce(Scope<'a, C, M>) -> Fut,
        Fut: Future<Output = Exit<V, E>>,
        E: From<M::Failure> + fmt::Debug,
    {
        if let Some(defect) = self.checkpoint() {
            return Exit::Defect(defect);
        }
        if let Some(outer) = self.active_transaction() {
            tracing::debug!(outer_transaction_id = outer.id(), "shadowing active transaction");
        }
        let acquire = async { self.begin(options).await.map(Lease::Owned).map_failure(E::from) };
        self.run_leased(acquire, body).await
    }

    async fn run_leased<V, E, A, F, Fut>(&self, acquire: A, body: F) -> Exit<V, E>
    where
        A: Future<Output = Exit<Lease<C::Tx>, E>>,
        F: FnOnce(Scope<'a, C, M>) -> Fut,
        Fut: Future<Output = Exit<V, E>>,
        E: From<M::Failure> + fmt::Debug,
    {
        let exit = bracket(
            self.interrupt_handle(),
            acquire,
            |lease| body(self.with_transaction(lease.handle().clone())),
            |lease, exit: &Exit<V, E>| {
                let commit = exit.is_success();
                async move {
                    match lease {
                        Lease::Joined(_) => Exit::Success(()),
                        Lease::Owned(handle) => self.finish(&handle, commit).await.map_failure(E::from),
                    }
                }
            },
        )
        .await;
        honor_deferred_cancellation(exit, self.cx(), self.interrupt_handle())
    }

    async fn begin(
        &self,
        options: TransactionOptions,
    ) -> Exit<TransactionHandle<C::Tx>, M::Failure> {
        let outcome = self.connection().begin(self.cx(), &options).await;
        let exit = settle(
            self.mapper(),
            outcome,
            &OperationDescriptor::transaction("begin"),
        );
        exit.map(|tx| {
            let handle = TransactionHandle::new(tx, options);
            tracing::debug!(
                transaction_id = handle.id(),
                options = ?handle.options(),
                "began transaction"
            );
            handle
        })
    }

    async fn finish(
        &self,
        handle: &TransactionHandle<C::Tx>,
        commit: bool,
    ) -> Exit<(), M::Failure> {
        let (operation, outcome) = if commit {
            tracing::debug!(transaction_id = handle.id(), "committing transaction");
            ("commit", handle.commit(self.cx()).await)
        } else {
            tracing::debug!(transaction_id = handle.id(), "rolling back transaction");
            ("rollback", handle.rollback(self.cx()).await)
        };
        let exit = settle(
            self.mapper(),
            outcome,
            &OperationDescriptor::transaction(operation),
        );
        if !exit.is_success() {
            tracing::warn!(
                transaction_id = handle.id(),
                operation,
                status = %exit.status(),
                "transaction did not finish cleanly"
            );
        }
        exit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::testing::{MockConnection, MockState, unwrap_exit};
    use asupersync::runtime::RuntimeBuilder;
    use asupersync::types::CancelReason;
    use sqlscope_core::{
        Action, DataError, DefectKind, ErrorKind, InterruptHandle, IsolationLevel, StandardMapper,
    };
    use std::sync::Mutex;
    use std::sync::atomic::AtomicBool;

    #[derive(Debug)]
    enum AppError {
        Data(DataError),
        Rule(&'static str),
    }

    impl From<DataError> for AppError {
        fn from(err: DataError) -> Self {
            AppError::Data(err)
        }
    }

    fn scope_over<'a>(cx: &'a Cx, state: &Arc<Mutex<MockState>>) -> Scope<'a, MockConnection> {
        Scope::new(
            cx,
            Arc::new(MockConnection::new(Arc::clone(state))),
            Arc::new(StandardMapper),
            Arc::new(ClientConfig::default()),
            InterruptHandle::new(),
        )
    }

    fn ping(model: &str) -> Request {
        Request::new(model, Action::Count, serde_json::Value::Null)
    }

    #[test]
    fn test_commit_on_success() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let state = Arc::new(Mutex::new(MockState::default()));
        let scope = scope_over(&cx, &state);

        rt.block_on(async {
            let exit: Exit<u64, DataError> = scope
                .transaction(|tx| async move {
                    assert!(tx.in_transaction());
                    let id = tx.transaction_id().expect("transaction installed");
                    let outcome = tx.executor().execute(tx.cx(), ping("User")).await;
                    assert!(matches!(outcome, Outcome::Ok(_)));
                    Exit::Success(id)
                })
                .await;
            unwrap_exit(exit);
        });

        let guard = state.lock().expect("lock poisoned");
        assert_eq!(guard.begins, 1);
        assert_eq!(guard.commits, 1);
        assert_eq!(guard.rollbacks, 0);
        assert_eq!(guard.tx_executes, 1);
        assert!(!scope.in_transaction());
    }

    #[test]
    fn test_rollback_on_failure() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let state = Arc::new(Mutex::new(MockState::default()));
        let scope = scope_over(&cx, &state);

        rt.block_on(async {
            let exit: Exit<(), AppError> = scope
                .transaction(|_tx| async { Exit::Failure(AppError::Rule("business rule")) })
                .await;
            assert!(matches!(exit.failure(), Some(AppError::Rule("business rule"))));
        });

        let guard = state.lock().expect("lock poisoned");
        assert_eq!(guard.commits, 0);
        assert_eq!(guard.rollbacks, 1);
    }

    #[test]
    fn test_nested_call_joins_without_begin() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let state = Arc::new(Mutex::new(MockState::default()));
        let scope = scope_over(&cx, &state);

        rt.block_on(async {
            let exit: Exit<(u64, u64), DataError> = scope
                .transaction(|outer| async move {
                    let outer_id = outer.transaction_id().expect("outer transaction");
                    let inner_id = unwrap_exit(
                        outer
                            .transaction(|inner| async move {
                                Exit::<_, DataError>::Success(
                                    inner.transaction_id().expect("inner transaction"),
                                )
                            })
                            .await,
                    );
                    Exit::Success((outer_id, inner_id))
                })
                .await;
            let (outer_id, inner_id) = unwrap_exit(exit);
            assert_eq!(outer_id, inner_id);
        });

        let guard = state.lock().expect("lock poisoned");
        assert_eq!(guard.begins, 1);
        assert_eq!(guard.commits, 1);
    }

    #[test]
    fn test_isolated_transaction_begins_its_own() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let state = Arc::new(Mutex::new(MockState::default()));
        let scope = scope_over(&cx, &state);

        rt.block_on(async {
            let exit: Exit<(), DataError> = scope
                .transaction(|outer| async move {
                    let outer_id = outer.transaction_id();
                    let inner: Exit<(), AppError> = outer
                        .isolated_transaction(|inner| async move {
                            assert_ne!(inner.transaction_id(), outer_id);
                            Exit::Failure(AppError::Rule("inner failed"))
                        })
                        .await;
                    assert!(inner.is_failure());
                    assert_eq!(outer.transaction_id(), outer_id);
                    Exit::Success(())
                })
                .await;
            unwrap_exit(exit);
        });

        let guard = state.lock().expect("lock poisoned");
        assert_eq!(guard.begins, 2);
        assert_eq!(guard.commits, 1);
        assert_eq!(guard.rollbacks, 1);
    }

    #[test]
    fn test_begin_failure_is_classified() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let state = Arc::new(Mutex::new(MockState::default()));
        state.lock().expect("lock poisoned").fail_begin =
            Some(StoreError::known("P2024", "timed out fetching a connection"));
        let scope = scope_over(&cx, &state);

        rt.block_on(async {
            let ran = AtomicBool::new(false);
            let ran_ref = &ran;
            let exit: Exit<(), DataError> = scope
                .transaction(|_tx| async move {
                    ran_ref.store(true, Ordering::SeqCst);
                    Exit::Success(())
                })
                .await;
            let failure = exit.failure().expect("typed failure");
            assert_eq!(failure.kind, ErrorKind::Connection);
            assert_eq!(failure.operation, "begin");
            assert_eq!(failure.model, "$transaction");
            assert!(!ran.load(Ordering::SeqCst));
        });
    }

    #[test]
    fn test_commit_failure_wins_over_success() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let state = Arc::new(Mutex::new(MockState::default()));
        state.lock().expect("lock poisoned").fail_commit =
            Some(StoreError::known("P2034", "write conflict"));
        let scope = scope_over(&cx, &state);

        rt.block_on(async {
            let exit: Exit<(), DataError> = scope.transaction(|_tx| async { Exit::Success(()) }).await;
            let failure = exit.failure().expect("commit failure surfaces");
            assert_eq!(failure.kind, ErrorKind::TransactionConflict);
            assert_eq!(failure.operation, "commit");
            assert_eq!(failure.model, "$transaction");
        });
    }

    #[test]
    fn test_cancelled_commit_is_a_defect_without_rollback() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let state = Arc::new(Mutex::new(MockState::default()));
        state.lock().expect("lock poisoned").cancel_commit =
            Some(CancelReason::user("driver shutting down"));
        let scope = scope_over(&cx, &state);

        rt.block_on(async {
            let mut seen = None;
            let seen_ref = &mut seen;
            let exit: Exit<(), DataError> = scope
                .transaction(|tx| async move {
                    *seen_ref = tx.active_transaction().cloned();
                    Exit::Success(())
                })
                .await;
            let defect = exit.defect().expect("cancelled commit");
            assert_eq!(defect.kind(), DefectKind::Cancelled);
            assert!(defect.message().contains("$transaction.commit"));
            assert!(seen.expect("handle installed").is_finalized());
        });

        let guard = state.lock().expect("lock poisoned");
        assert_eq!(guard.commits, 1);
        assert_eq!(guard.rollbacks, 0);
    }

    #[test]
    fn test_cancellation_during_commit_is_honored_after_it() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let state = Arc::new(Mutex::new(MockState::default()));
        state.lock().expect("lock poisoned").cancel_cx_on_commit = true;
        let scope = scope_over(&cx, &state);

        rt.block_on(async {
            let exit: Exit<(), DataError> = scope.transaction(|_tx| async { Exit::Success(()) }).await;
            assert_eq!(exit.defect().map(|d| d.kind()), Some(DefectKind::Cancelled));
        });

        // The commit itself ran to completion.
        let guard = state.lock().expect("lock poisoned");
        assert_eq!(guard.commits, 1);
        assert_eq!(guard.rollbacks, 0);
    }

    #[test]
    fn test_options_reach_driver_untouched() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let state = Arc::new(Mutex::new(MockState::default()));
        let scope = scope_over(&cx, &state);
        let options = TransactionOptions::new()
            .isolation_level(IsolationLevel::Serializable)
            .timeout_ms(1_500);

        rt.block_on(async {
            let exit: Exit<(), DataError> = scope
                .transaction_with(options.clone(), |_tx| async { Exit::Success(()) })
                .await;
            unwrap_exit(exit);
        });

        assert_eq!(
            state.lock().expect("lock poisoned").last_options,
            Some(options)
        );
    }

    #[test]
    fn test_defect_in_body_rolls_back() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let state = Arc::new(Mutex::new(MockState::default()));
        let scope = scope_over(&cx, &state);

        rt.block_on(async {
            let exit: Exit<(), DataError> = scope
                .transaction(|_tx| async {
                    Exit::Defect(sqlscope_core::Defect::die("invariant broken"))
                })
                .await;
            assert_eq!(exit.defect().map(|d| d.kind()), Some(DefectKind::Die));
        });

        let guard = state.lock().expect("lock poisoned");
        assert_eq!(guard.commits, 0);
        assert_eq!(guard.rollbacks, 1);
    }

    #[test]
    fn test_handle_refuses_use_after_finish() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let state = Arc::new(Mutex::new(MockState::default()));
        let scope = scope_over(&cx, &state);

        rt.block_on(async {
            let escaped: Exit<Scope<'_, MockConnection>, DataError> =
                scope.transaction(|tx| async move { Exit::Success(tx) }).await;
            let escaped = unwrap_exit(escaped);
            let handle = escaped.active_transaction().expect("handle still installed");
            assert!(handle.is_finalized());
            match handle.execute(&cx, ping("User")).await {
                Outcome::Err(err) => assert!(!err.is_known()),
                other => std::panic::panic_any(format!("unexpected outcome: {other:?}")),
            }
        });
    }
}
