pub mod batch;
pub mod jobs;
pub mod lifecycle;
pub mod query;

#[cfg(test)]
pub(crate) mod testing;

use std::future::Future;
use std::time::Duration;

use crate::errors::ServiceError;

pub use batch::{BatchCommand, BatchOrchestrator};
pub use jobs::JobService;

/// Run a store call under the engine's deadline, translating its failure.
pub(crate) async fn with_deadline<T, F>(
    timeout: Duration,
    context: &str,
    call: F,
) -> Result<T, ServiceError>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(ServiceError::from_store(context, e)),
        Err(_) => Err(ServiceError::Timeout(format!(
            "{}: store did not answer within {}ms",
            context,
            timeout.as_millis()
        ))),
    }
}
