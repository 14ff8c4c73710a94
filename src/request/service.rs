//! The injected service call.

use std::future::Future;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::RequestError;

/// An async function from params to data.
///
/// The token is cancelled when the orchestrator abandons the call
/// (superseded, cancelled or disposed); honouring it is up to the transport.
#[async_trait]
pub trait Service<P, T>: Send + Sync + 'static {
    async fn call(&self, params: P, cancel: CancellationToken) -> Result<T, RequestError>;
}

/// Adapter turning an async closure into a [`Service`].
pub struct ServiceFn<F> {
    f: F,
}

/// Wrap `f` as a [`Service`].
///
/// ```ignore
/// let svc = service_fn(|id: u32, _cancel| async move { Ok::<_, RequestError>(id * 2) });
/// ```
pub fn service_fn<F>(f: F) -> ServiceFn<F> {
    ServiceFn { f }
}

#[async_trait]
impl<P, T, F, Fut> Service<P, T> for ServiceFn<F>
where
    P: Send + 'static,
    T: Send + 'static,
    F: Fn(P, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, RequestError>> + Send + 'static,
{
    async fn call(&self, params: P, cancel: CancellationToken) -> Result<T, RequestError> {
        (self.f)(params, cancel).await
    }
}
