//! Scoped clients.
//!
//! A [`Client`] never holds an open connection. Each call to
//! [`Client::scoped`] connects, runs the body with a fresh root [`Scope`]
//! and disconnects exactly once, however the body ends.

use crate::config::ClientConfig;
use crate::scope::{Scope, honor_deferred_cancellation};
use asupersync::Cx;
use sqlscope_core::{
    Connection, Connector, ErrorMapper, Exit, InterruptHandle, OperationDescriptor,
    StandardMapper, bracket, settle,
};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

pub struct Client<K: Connector, M: ErrorMapper = StandardMapper> {
    connector: K,
    mapper: Arc<M>,
    config: Arc<ClientConfig>,
}

impl<K: Connector> Client<K> {
    /// Create a client with the standard error classification.
    pub fn new(connector: K) -> Self {
        Self {
            connector,
            mapper: Arc::new(StandardMapper),
            config: Arc::new(ClientConfig::default()),
        }
    }
}

impl<K: Connector, M: ErrorMapper> Client<K, M> {
    /// Replace the error mapper.
    pub fn with_mapper<N: ErrorMapper>(self, mapper: N) -> Client<K, N> {
        Client {
            connector: self.connector,
            mapper: Arc::new(mapper),
            config: self.config,
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn connector(&self) -> &K {
        &self.connector
    }

    /// Connect, run `body` against a root scope, disconnect.
    ///
    /// Connect and disconnect failures are classified under the model
    /// `$client`. A disconnect failure replaces the body's result.
    pub async fn scoped<'a, V, E, F, Fut>(&'a self, cx: &'a Cx, body: F) -> Exit<V, E>
    where
        F: FnOnce(Scope<'a, K::Connection, M>) -> Fut,
        Fut: Future<Output = Exit<V, E>>,
        E: From<M::Failure> + fmt::Debug,
    {
        self.scoped_with(cx, InterruptHandle::new(), body).await
    }

    /// Like [`scoped`](Self::scoped), with a caller-provided interrupt handle.
    ///
    /// Interrupting the handle makes the next operation or transaction
    /// boundary inside `body` stop with a defect. Disconnect still runs.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn scoped_with<'a, V, E, F, Fut>(
        &'a self,
        cx: &'a Cx,
        interrupt: InterruptHandle,
        body: F,
    ) -> Exit<V, E>
    where
        F: FnOnce(Scope<'a, K::Connection, M>) -> Fut,
        Fut: Future<Output = Exit<V, E>>,
        E: From<M::Failure> + fmt::Debug,
    {
        let acquire = async {
            let outcome = self.connector.connect(cx).await;
            let exit = settle(
                &*self.mapper,
                outcome,
                &OperationDescriptor::client("connect"),
            );
            if exit.is_success() {
                tracing::debug!("client connected");
            }
            exit.map(Arc::new).map_failure(E::from)
        };

        let exit = bracket(
            &interrupt,
            acquire,
            |connection| {
                body(Scope::new(
                    cx,
                    connection,
                    Arc::clone(&self.mapper),
                    Arc::clone(&self.config),
                    interrupt.clone(),
                ))
            },
            |connection, exit: &Exit<V, E>| {
                tracing::debug!(body = %exit.status(), "disconnecting client");
                async move {
                    let outcome = connection.disconnect(cx).await;
                    settle(
                        &*self.mapper,
                        outcome,
                        &OperationDescriptor::client("disconnect"),
                    )
                    .map_failure(E::from)
                }
            },
        )
        .await;
        honor_deferred_cancellation(exit, cx, &interrupt)
    }
}

impl<K: Connector + fmt::Debug, M: ErrorMapper> fmt::Debug for Client<K, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("connector", &self.connector)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
