pub mod orchestrator;
pub mod persistence_coordinator;

#[cfg(test)]
pub(crate) mod test_support;

use std::future::Future;
use std::time::Duration;

use crate::domain::errors::{PipelineError, PipelineResult};

/// Run a store round-trip under a hard deadline
pub(crate) async fn with_deadline<T, F>(what: &str, deadline: Duration, call: F) -> PipelineResult<T>
where
    F: Future<Output = PipelineResult<T>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(PipelineError::timeout(what, deadline)),
    }
}
