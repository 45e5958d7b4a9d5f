use crate::utils::error::Result;
use async_trait::async_trait;
use std::future::Future;

/// A wrapper with an explicit enter/exit lifecycle around its external resource.
#[async_trait]
pub trait Scoped: Send + Sync {
    async fn enter(&self) -> Result<()>;

    async fn exit(&self);
}

/// Runs `body` between `enter` and `exit`.
///
/// `exit` runs exactly once after the body, whether the body succeeded or not.
/// If `enter` fails the body is skipped and the error is returned.
pub async fn using<S, F, Fut, T>(scoped: &S, body: F) -> Result<T>
where
    S: Scoped + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    scoped.enter().await?;
    let outcome = body().await;
    scoped.exit().await;
    outcome
}
