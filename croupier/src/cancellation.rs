use crate::errors::EngineError;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Sleeps for `duration` unless the token fires first.
pub async fn pause(token: &CancellationToken, duration: Duration) -> Result<(), EngineError> {
    if duration.is_zero() {
        return ensure_running(token);
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => Ok(()),
        _ = token.cancelled() => Err(EngineError::Cancelled("abort requested during wait".to_string())),
    }
}

/// Fails fast when an abort has already been requested.
pub fn ensure_running(token: &CancellationToken) -> Result<(), EngineError> {
    if token.is_cancelled() {
        Err(EngineError::Cancelled("abort requested".to_string()))
    } else {
        Ok(())
    }
}

/// Races an operation against the abort signal.
pub async fn with_cancellation<F, T>(token: &CancellationToken, operation: F) -> Result<T, EngineError>
where
    F: Future<Output = Result<T, EngineError>>,
{
    tokio::select! {
        result = operation => result,
        _ = token.cancelled() => Err(EngineError::Cancelled("abort requested".to_string())),
    }
}
