//! Typed data operations.
//!
//! A [`ModelDelegate`] builds [`Operation`] values. Building one does not
//! touch the store: the handle it runs against is only resolved when
//! [`Operation::run`] is awaited, so an operation built outside a
//! transaction and run inside one uses the transaction.

use crate::scope::Scope;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sqlscope_core::{
    Action, Connection, Defect, ErrorMapper, Exit, OperationDescriptor, Request, settle, try_exit,
};
use std::fmt;
use std::marker::PhantomData;

/// A record type stored under a model name.
pub trait Model: DeserializeOwned + Send + 'static {
    /// Model name as known to the store (`"User"`, `"Post"`, ...).
    const NAME: &'static str;
}

/// Result of a bulk write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchPayload {
    pub count: u64,
}

type Decode<T> = fn(Value) -> Result<T, serde_json::Error>;

/// A data operation that has not run yet.
#[must_use = "operations do nothing until `run` is awaited"]
pub struct Operation<T> {
    request: Request,
    decode: Decode<T>,
}

impl<T: DeserializeOwned> Operation<T> {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            decode: serde_json::from_value::<T>,
        }
    }
}

impl<T> Operation<T> {
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Which operation on which model this is.
    pub fn descriptor(&self) -> OperationDescriptor {
        OperationDescriptor::new(self.request.action.as_str(), self.request.model.clone())
    }

    /// Run against the scope's active transaction, or its connection when
    /// no transaction is active.
    pub async fn run<C: Connection, M: ErrorMapper>(
        self,
        scope: &Scope<'_, C, M>,
    ) -> Exit<T, M::Failure> {
        if let Some(defect) = scope.checkpoint() {
            return Exit::Defect(defect);
        }
        let descriptor = self.descriptor();
        let executor = scope.executor();
        if scope.config().log_operations {
            tracing::info!(
                model = %descriptor.model,
                operation = %descriptor.operation,
                in_transaction = executor.is_transaction(),
                "running operation"
            );
        } else {
            tracing::trace!(
                model = %descriptor.model,
                operation = %descriptor.operation,
                in_transaction = executor.is_transaction(),
                "running operation"
            );
        }

        let outcome = executor.execute(scope.cx(), self.request).await;
        let value = try_exit!(settle(scope.mapper(), outcome, &descriptor));
        match (self.decode)(value) {
            Ok(decoded) => Exit::Success(decoded),
            Err(err) => Exit::Defect(Defect::unclassified(
                format!("malformed response to {}", descriptor),
                err,
            )),
        }
    }
}

impl<T> fmt::Debug for Operation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}

/// Builds operations for one model.
pub struct ModelDelegate<M> {
    _model: PhantomData<fn() -> M>,
}

/// Delegate for model `M`.
pub fn model<M: Model>() -> ModelDelegate<M> {
    ModelDelegate {
        _model: PhantomData,
    }
}

impl<M: Model> ModelDelegate<M> {
    fn op<T: DeserializeOwned>(&self, action: Action, args: Value) -> Operation<T> {
        Operation::new(Request::new(M::NAME, action, args))
    }

    pub fn create(&self, data: Value) -> Operation<M> {
        self.op(Action::Create, json!({ "data": data }))
    }

    pub fn create_many(&self, data: Vec<Value>) -> Operation<BatchPayload> {
        self.op(Action::CreateMany, json!({ "data": data }))
    }

    pub fn find_unique(&self, filter: Value) -> Operation<Option<M>> {
        self.op(Action::FindUnique, json!({ "where": filter }))
    }

    /// Like [`find_unique`](Self::find_unique), failing with record-not-found
    /// when nothing matches.
    pub fn find_unique_or_throw(&self, filter: Value) -> Operation<M> {
        self.op(Action::FindUniqueOrThrow, json!({ "where": filter }))
    }

    pub fn find_first(&self, args: Value) -> Operation<Option<M>> {
        self.op(Action::FindFirst, args)
    }

    pub fn find_first_or_throw(&self, args: Value) -> Operation<M> {
        self.op(Action::FindFirstOrThrow, args)
    }

    /// `args` takes `where`, `orderBy`, `skip` and `take`.
    pub fn find_many(&self, args: Value) -> Operation<Vec<M>> {
        self.op(Action::FindMany, args)
    }

    pub fn update(&self, filter: Value, data: Value) -> Operation<M> {
        self.op(Action::Update, json!({ "where": filter, "data": data }))
    }

    pub fn update_many(&self, filter: Value, data: Value) -> Operation<BatchPayload> {
        self.op(Action::UpdateMany, json!({ "where": filter, "data": data }))
    }

    pub fn upsert(&self, filter: Value, create: Value, update: Value) -> Operation<M> {
        self.op(
            Action::Upsert,
            json!({ "where": filter, "create": create, "update": update }),
        )
    }

    pub fn delete(&self, filter: Value) -> Operation<M> {
        self.op(Action::Delete, json!({ "where": filter }))
    }

    pub fn delete_many(&self, filter: Value) -> Operation<BatchPayload> {
        self.op(Action::DeleteMany, json!({ "where": filter }))
    }

    pub fn count(&self, filter: Value) -> Operation<u64> {
        self.op(Action::Count, json!({ "where": filter }))
    }

    /// `args` takes `where` plus any of `_count`, `_sum`, `_min`, `_max`.
    pub fn aggregate(&self, args: Value) -> Operation<Value> {
        self.op(Action::Aggregate, args)
    }

    /// `args` takes `by` (field names) and `where`.
    pub fn group_by(&self, args: Value) -> Operation<Vec<Value>> {
        self.op(Action::GroupBy, args)
    }
}

impl<M> Clone for ModelDelegate<M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M> Copy for ModelDelegate<M> {}

impl<M: Model> fmt::Debug for ModelDelegate<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelDelegate")
            .field("model", &M::NAME)
            .finish()
    }
}
