//! Acquire/use/release with exactly-once release.
//!
//! [`bracket`] is the primitive every transaction and scoped client is built
//! on:
//!
//! - if acquire does not succeed, use and release never run
//! - use runs to completion; a panic inside it becomes a [`Defect`]
//! - release runs exactly once after a successful acquire and receives the
//!   exit of use, whatever its variant
//! - acquire and release run with interruption masked; an interrupt that
//!   arrives meanwhile is honored once release has finished
//!
//! When both use and release fail, the release failure wins: it decides what
//! was persisted. A use defect always re-propagates as a defect, with any
//! release failure recorded in its suppressed list.

use crate::exit::{Defect, Exit};
use crate::interrupt::InterruptHandle;
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;

/// Run `use_` against a resource produced by `acquire`, then `release` it.
///
/// The resource is cloned into `use_`; release gets the original together
/// with a reference to the exit of use. The release future must not borrow
/// that reference: inspect it synchronously and move what you need.
pub async fn bracket<R, V, E, A, U, UF, L, LF>(
    interrupt: &InterruptHandle,
    acquire: A,
    use_: U,
    release: L,
) -> Exit<V, E>
where
    R: Clone,
    E: fmt::Debug,
    A: Future<Output = Exit<R, E>>,
    U: FnOnce(R) -> UF,
    UF: Future<Output = Exit<V, E>>,
    L: FnOnce(R, &Exit<V, E>) -> LF,
    LF: Future<Output = Exit<(), E>>,
{
    if let Some(defect) = interrupt.checkpoint() {
        return Exit::Defect(defect);
    }

    let resource = {
        let _mask = interrupt.mask();
        match AssertUnwindSafe(acquire).catch_unwind().await {
            Ok(Exit::Success(resource)) => resource,
            Ok(Exit::Failure(e)) => return Exit::Failure(e),
            Ok(Exit::Defect(d)) => return Exit::Defect(d),
            Err(payload) => return Exit::Defect(Defect::from_panic(payload)),
        }
    };

    let for_use = resource.clone();
    let used = match AssertUnwindSafe(async move { use_(for_use).await })
        .catch_unwind()
        .await
    {
        Ok(exit) => exit,
        Err(payload) => Exit::Defect(Defect::from_panic(payload)),
    };

    let released = {
        let _mask = interrupt.mask();
        let used_ref = &used;
        match AssertUnwindSafe(async move { release(resource, used_ref).await })
            .catch_unwind()
            .await
        {
            Ok(exit) => exit,
            Err(payload) => Exit::Defect(Defect::from_panic(payload)),
        }
    };

    let combined = combine(used, released);

    if !combined.is_defect() {
        if let Some(defect) = interrupt.checkpoint() {
            tracing::warn!(
                reason = defect.message(),
                "interrupt was deferred until release completed"
            );
            return Exit::Defect(defect);
        }
    }
    combined
}

/// Merge the exits of use and release according to the precedence rules.
fn combine<V, E: fmt::Debug>(used: Exit<V, E>, released: Exit<(), E>) -> Exit<V, E> {
    match (used, released) {
        (Exit::Success(v), Exit::Success(())) => Exit::Success(v),
        (Exit::Failure(e), Exit::Success(())) => Exit::Failure(e),
        (Exit::Success(_), Exit::Failure(release_err)) => Exit::Failure(release_err),
        (Exit::Failure(use_err), Exit::Failure(release_err)) => {
            tracing::warn!(
                use_failure = ?use_err,
                release_failure = ?release_err,
                "release failed after use failed; reporting the release failure"
            );
            Exit::Failure(release_err)
        }
        (Exit::Defect(d), Exit::Success(())) => Exit::Defect(d),
        (Exit::Defect(mut d), Exit::Failure(release_err)) => {
            tracing::warn!(release_failure = ?release_err, "release failed while a defect was propagating");
            d.push_suppressed(format!("release failure: {release_err:?}"));
            Exit::Defect(d)
        }
        (Exit::Defect(mut d), Exit::Defect(release_defect)) => {
            tracing::error!(release_defect = %release_defect, "release raised a defect while a defect was propagating");
            d.push_suppressed(format!("release defect: {release_defect}"));
            Exit::Defect(d)
        }
        (Exit::Success(_) | Exit::Failure(_), Exit::Defect(release_defect)) => {
            Exit::Defect(release_defect)
        }
    }
}
