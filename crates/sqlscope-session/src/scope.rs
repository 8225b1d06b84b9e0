//! The context object threaded through data-access code.
//!
//! A [`Scope`] bundles everything an operation needs to run: the asupersync
//! [`Cx`], the scope's connection, the error mapper, the client config, the
//! ambient context (which may hold an active transaction) and the shared
//! [`InterruptHandle`]. Scopes are cheap to clone; nested transactions hand
//! their body a child scope instead of mutating the caller's.

use crate::config::ClientConfig;
use crate::transaction::{ActiveTransaction, TransactionHandle};
use asupersync::{Cx, Outcome};
use sqlscope_core::{
    AmbientContext, Connection, Defect, ErrorMapper, Exit, InterruptHandle, Request, ResourceKey,
    StandardMapper, StoreError,
};
use std::fmt;
use std::sync::Arc;

pub struct Scope<'a, C: Connection, M: ErrorMapper = StandardMapper> {
    cx: &'a Cx,
    connection: Arc<C>,
    mapper: Arc<M>,
    config: Arc<ClientConfig>,
    ambient: AmbientContext,
    interrupt: InterruptHandle,
}

impl<'a, C: Connection, M: ErrorMapper> Scope<'a, C, M> {
    /// Create a root scope over an already open connection.
    ///
    /// The caller stays responsible for disconnecting it. Use
    /// [`Client::scoped`](crate::Client::scoped) to have the connection
    /// managed for you.
    pub fn new(
        cx: &'a Cx,
        connection: Arc<C>,
        mapper: Arc<M>,
        config: Arc<ClientConfig>,
        interrupt: InterruptHandle,
    ) -> Self {
        Self {
            cx,
            connection,
            mapper,
            config,
            ambient: AmbientContext::new(),
            interrupt,
        }
    }

    pub fn cx(&self) -> &'a Cx {
        self.cx
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub fn mapper(&self) -> &M {
        &self.mapper
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn ambient(&self) -> &AmbientContext {
        &self.ambient
    }

    /// The interrupt handle shared by this scope and every scope derived from it.
    pub fn interrupt_handle(&self) -> &InterruptHandle {
        &self.interrupt
    }

    /// Child scope with `value` installed in the ambient context.
    pub fn provide<K: ResourceKey>(&self, value: K::Value) -> Self {
        let mut child = self.clone();
        child.ambient = self.ambient.with::<K>(value);
        child
    }

    /// Value installed for `K` in the ambient context.
    pub fn resource<K: ResourceKey>(&self) -> Option<&K::Value> {
        self.ambient.get::<K>()
    }

    /// Report a pending interruption or cancellation as a defect.
    ///
    /// Interrupts requested through the scope's handle and cancellation of
    /// the asupersync context are both deferred while the handle is masked.
    pub fn checkpoint(&self) -> Option<Defect> {
        if let Some(defect) = self.interrupt.checkpoint() {
            return Some(defect);
        }
        cancellation(self.cx, &self.interrupt)
    }

    /// The transaction installed in this scope, if any.
    pub fn active_transaction(&self) -> Option<&TransactionHandle<C::Tx>> {
        self.ambient.get::<ActiveTransaction<C::Tx>>()
    }

    pub fn in_transaction(&self) -> bool {
        self.active_transaction().is_some()
    }

    pub fn transaction_id(&self) -> Option<u64> {
        self.active_transaction().map(TransactionHandle::id)
    }

    /// Where operations in this scope run: the active transaction if one is
    /// installed, the scope's connection otherwise.
    pub fn executor(&self) -> Executor<'_, C> {
        match self.active_transaction() {
            Some(handle) => Executor::Transaction(handle),
            None => Executor::Connection(&self.connection),
        }
    }

    pub(crate) fn with_transaction(&self, handle: TransactionHandle<C::Tx>) -> Self {
        self.provide::<ActiveTransaction<C::Tx>>(handle)
    }
}

/// Cancellation requested on `cx`, unless `interrupt` is masked.
pub(crate) fn cancellation(cx: &Cx, interrupt: &InterruptHandle) -> Option<Defect> {
    if interrupt.is_masked() || !cx.is_cancel_requested() {
        return None;
    }
    let reason = cx
        .cancel_reason()
        .map_or_else(|| "cancellation requested".to_string(), |reason| format!("{reason:?}"));
    Some(Defect::cancelled(reason))
}

/// Turn a cancellation that arrived during a masked release into a defect.
///
/// [`bracket`](sqlscope_core::bracket) already does this for the interrupt
/// handle; the asupersync context is checked here once it has returned.
pub(crate) fn honor_deferred_cancellation<V, E>(
    exit: Exit<V, E>,
    cx: &Cx,
    interrupt: &InterruptHandle,
) -> Exit<V, E> {
    if exit.is_defect() {
        return exit;
    }
    match cancellation(cx, interrupt) {
        Some(defect) => {
            tracing::warn!(
                reason = defect.message(),
                "cancellation was deferred until release completed"
            );
            Exit::Defect(defect)
        }
        None => exit,
    }
}

impl<C: Connection, M: ErrorMapper> Clone for Scope<'_, C, M> {
    fn clone(&self) -> Self {
        Self {
            cx: self.cx,
            connection: Arc::clone(&self.connection),
            mapper: Arc::clone(&self.mapper),
            config: Arc::clone(&self.config),
            ambient: self.ambient.clone(),
            interrupt: self.interrupt.clone(),
        }
    }
}

impl<C: Connection, M: ErrorMapper> fmt::Debug for Scope<'_, C, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("transaction_id", &self.transaction_id())
            .field("ambient", &self.ambient)
            .field("interrupt", &self.interrupt)
            .finish_non_exhaustive()
    }
}

/// The handle an operation runs against.
pub enum Executor<'s, C: Connection> {
    Connection(&'s C),
    Transaction(&'s TransactionHandle<C::Tx>),
}

impl<C: Connection> Executor<'_, C> {
    pub async fn execute(&self, cx: &Cx, request: Request) -> Outcome<serde_json::Value, StoreError> {
        match self {
            Executor::Connection(connection) => connection.execute(cx, request).await,
            Executor::Transaction(handle) => handle.execute(cx, request).await,
        }
    }

    pub fn is_transaction(&self) -> bool {
        matches!(self, Executor::Transaction(_))
    }
}
