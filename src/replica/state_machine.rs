use crate::command::{ApplyError, Command, CommandOutput};

/// StateMachine is the application specific view of applying the replicated log in sequentially
/// consistent order.
pub trait StateMachine: Send + 'static {
    /// Called only for committed entries, in index order, exactly once per entry per replica.
    /// Committed entries are never reversed, so the implementation need not be reversible.
    ///
    /// The output is handed to whoever submitted the command, if that submitter is waiting on
    /// this replica.
    fn apply_command(&mut self, command: &Command) -> Result<CommandOutput, ApplyError>;

    // TODO:3 snapshot and restore once InstallSnapshot carries data.
}
