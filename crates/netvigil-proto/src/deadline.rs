// ── Deadline + cancellation guard ──
//
// Every network call in this crate runs under `guarded`. Losing the race
// drops the inner future, which closes sockets and kills child processes
// instead of leaving them running in the background.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::Error;

/// Race `fut` against a timer and a cancellation token.
///
/// Whichever finishes first wins. When the timer or the token wins, `fut`
/// is dropped at its current suspension point.
pub async fn guarded<T, F>(
    timeout: Duration,
    cancel: &CancellationToken,
    fut: F,
) -> Result<T, Error>
where
    F: Future<Output = Result<T, Error>>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(Error::Cancelled),
        res = tokio::time::timeout(timeout, fut) => match res {
            Ok(inner) => inner,
            Err(_) => Err(Error::Timeout(timeout)),
        },
    }
}
