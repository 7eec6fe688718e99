use crate::commitlog::Index;
use crate::extent::{Attr, ExtentError, InodeId};
use bytes::Bytes;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio::time::{Duration, Instant};

/// What applying one command to the extent store produced.
#[derive(Clone, Debug, PartialEq)]
pub enum CommandOutput {
    Noop,
    Created { inode: InodeId },
    Content { data: Bytes },
    Attr(Attr),
    Written,
    Removed,
}

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ApplyError {
    #[error(transparent)]
    Extent(#[from] ExtentError),
    #[error("Entry at index {index:?} was overwritten after leadership changed")]
    Superseded { index: Index },
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum CommandWaitError {
    #[error("Command was not applied within {0:?}")]
    Timeout(Duration),
    #[error("Command failed to apply")]
    Apply(#[from] ApplyError),
}

/// CommandResult is the one-shot completion cell shared between the submitter of a command and
/// the apply loop. The apply loop completes it exactly once; later completions are ignored.
/// Submitters may wait on it from any task.
#[derive(Clone)]
pub struct CommandResult {
    inner: Arc<ResultCell>,
}

struct ResultCell {
    outcome: Mutex<Option<Result<CommandOutput, ApplyError>>>,
    applied: Notify,
}

impl CommandResult {
    pub fn new() -> Self {
        CommandResult {
            inner: Arc::new(ResultCell {
                outcome: Mutex::new(None),
                applied: Notify::new(),
            }),
        }
    }

    /// Returns false if the cell was already completed.
    pub(crate) fn complete(&self, outcome: Result<CommandOutput, ApplyError>) -> bool {
        {
            let mut slot = self.lock();
            if slot.is_some() {
                return false;
            }
            slot.replace(outcome);
        }
        self.inner.applied.notify_waiters();
        true
    }

    pub fn is_done(&self) -> bool {
        self.lock().is_some()
    }

    pub fn outcome(&self) -> Option<Result<CommandOutput, ApplyError>> {
        self.lock().clone()
    }

    /// Wait until the command is applied, or fail with `Timeout` once `timeout` elapses.
    pub async fn wait(&self, timeout: Duration) -> Result<CommandOutput, CommandWaitError> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register interest before checking, so a completion between the check and the
            // await isn't missed.
            let notified = self.inner.applied.notified();
            if let Some(outcome) = self.outcome() {
                return outcome.map_err(CommandWaitError::from);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return match self.outcome() {
                    Some(outcome) => outcome.map_err(CommandWaitError::from),
                    None => Err(CommandWaitError::Timeout(timeout)),
                };
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Result<CommandOutput, ApplyError>>> {
        self.inner.outcome.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for CommandResult {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CommandResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CommandResult(done={})", self.is_done())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn waiter_wakes_on_completion() {
        let result = CommandResult::new();
        let waiter = {
            let result = result.clone();
            tokio::spawn(async move { result.wait(Duration::from_secs(5)).await })
        };

        tokio::task::yield_now().await;
        assert!(result.complete(Ok(CommandOutput::Created { inode: 4 })));

        let output = waiter.await.unwrap().unwrap();
        assert_eq!(output, CommandOutput::Created { inode: 4 });
    }

    #[tokio::test]
    async fn completes_only_once() {
        let result = CommandResult::new();
        assert!(result.complete(Ok(CommandOutput::Written)));
        assert!(!result.complete(Ok(CommandOutput::Removed)));
        assert_eq!(
            result.wait(Duration::from_millis(1)).await,
            Ok(CommandOutput::Written)
        );
    }

    #[tokio::test]
    async fn timeout_is_recoverable() {
        let result = CommandResult::new();
        let err = result.wait(Duration::from_millis(20)).await.unwrap_err();
        assert_eq!(err, CommandWaitError::Timeout(Duration::from_millis(20)));

        // A late completion is still observable.
        result.complete(Err(ApplyError::Superseded { index: Index::new(3) }));
        assert!(result.is_done());
        assert_eq!(
            result.wait(Duration::from_millis(1)).await,
            Err(CommandWaitError::Apply(ApplyError::Superseded { index: Index::new(3) }))
        );
    }
}
