use crate::api::RaftClient;
use crate::command::{ApplyError, Command, CommandOutput, CommandWaitError};
use crate::extent::{Attr, FileType, InodeId};
use crate::replica::{SubmitError, SubmittedCommand};
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::time::{Duration, Instant};

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(3);
const RETRY_BACKOFF: Duration = Duration::from_millis(20);

#[derive(Debug, thiserror::Error)]
pub enum ExtentClientError {
    #[error("No leader accepted the command within {0:?}")]
    NoLeader(Duration),
    #[error("Command was accepted but not applied within {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Apply(#[from] ApplyError),
    #[error("Unexpected command output: {0:?}")]
    UnexpectedOutput(CommandOutput),
}

/// DistExtentServer runs extent operations through the raft cluster. Each call blocks until the
/// command is committed and applied on the leader, or the command timeout passes.
pub struct DistExtentServer {
    logger: slog::Logger,
    nodes: Vec<RaftClient>,
    command_timeout: Duration,
    // Position in `nodes` of the last node that accepted a command.
    leader_hint: AtomicUsize,
}

impl DistExtentServer {
    pub fn new(logger: slog::Logger, nodes: Vec<RaftClient>) -> Self {
        DistExtentServer {
            logger,
            nodes,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            leader_hint: AtomicUsize::new(0),
        }
    }

    pub fn with_command_timeout(mut self, command_timeout: Duration) -> Self {
        self.command_timeout = command_timeout;
        self
    }

    pub async fn create(&self, file_type: FileType) -> Result<InodeId, ExtentClientError> {
        match self.execute(Command::Create { file_type }).await? {
            CommandOutput::Created { inode } => Ok(inode),
            other => Err(ExtentClientError::UnexpectedOutput(other)),
        }
    }

    pub async fn put(&self, inode: InodeId, data: Bytes) -> Result<(), ExtentClientError> {
        match self.execute(Command::Put { inode, data }).await? {
            CommandOutput::Written => Ok(()),
            other => Err(ExtentClientError::UnexpectedOutput(other)),
        }
    }

    pub async fn get(&self, inode: InodeId) -> Result<Bytes, ExtentClientError> {
        match self.execute(Command::Get { inode }).await? {
            CommandOutput::Content { data } => Ok(data),
            other => Err(ExtentClientError::UnexpectedOutput(other)),
        }
    }

    pub async fn getattr(&self, inode: InodeId) -> Result<Attr, ExtentClientError> {
        match self.execute(Command::GetAttr { inode }).await? {
            CommandOutput::Attr(attr) => Ok(attr),
            other => Err(ExtentClientError::UnexpectedOutput(other)),
        }
    }

    pub async fn remove(&self, inode: InodeId) -> Result<(), ExtentClientError> {
        match self.execute(Command::Remove { inode }).await? {
            CommandOutput::Removed => Ok(()),
            other => Err(ExtentClientError::UnexpectedOutput(other)),
        }
    }

    async fn execute(&self, command: Command) -> Result<CommandOutput, ExtentClientError> {
        let deadline = Instant::now() + self.command_timeout;
        loop {
            let submitted = self.submit_to_leader(&command, deadline).await?;
            let remaining = deadline.saturating_duration_since(Instant::now());

            match submitted.result.wait(remaining).await {
                Ok(output) => return Ok(output),
                Err(CommandWaitError::Timeout(_)) => return Err(ExtentClientError::Timeout(self.command_timeout)),
                // Never applied, so it is safe to submit again to whoever leads now.
                Err(CommandWaitError::Apply(ApplyError::Superseded { index })) => {
                    slog::info!(self.logger, "Command at {:?} was superseded. Retrying.", index);
                }
                Err(CommandWaitError::Apply(e)) => return Err(e.into()),
            }
        }
    }

    async fn submit_to_leader(
        &self,
        command: &Command,
        deadline: Instant,
    ) -> Result<SubmittedCommand, ExtentClientError> {
        let num_nodes = self.nodes.len();
        if num_nodes == 0 {
            return Err(ExtentClientError::NoLeader(self.command_timeout));
        }

        loop {
            let start = self.leader_hint.load(Ordering::Relaxed);
            for offset in 0..num_nodes {
                let position = (start + offset) % num_nodes;
                match self.nodes[position].new_command(command.clone()).await {
                    Ok(submitted) => {
                        self.leader_hint.store(position, Ordering::Relaxed);
                        return Ok(submitted);
                    }
                    Err(SubmitError::NotLeader { .. }) | Err(SubmitError::ActorExited) => continue,
                    Err(SubmitError::Persistence(e)) => {
                        slog::warn!(self.logger, "Node at position {} failed to persist: {}", position, e);
                        continue;
                    }
                }
            }

            if Instant::now() + RETRY_BACKOFF >= deadline {
                return Err(ExtentClientError::NoLeader(self.command_timeout));
            }
            slog::debug!(self.logger, "No leader found. Retrying in {:?}.", RETRY_BACKOFF);
            tokio::time::sleep(RETRY_BACKOFF).await;
        }
    }
}
