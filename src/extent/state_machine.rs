use crate::command::{ApplyError, Command, CommandOutput};
use crate::extent::{Attr, ExtentError, ExtentStore, FileType, InodeId};
use crate::replica::StateMachine;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// ExtentStateMachine applies committed commands to a shared extent store. Clones share the same
/// store, so the application can read what the raft apply loop wrote.
#[derive(Clone)]
pub struct ExtentStateMachine {
    store: Arc<Mutex<ExtentStore>>,
}

impl ExtentStateMachine {
    pub fn new() -> Self {
        ExtentStateMachine {
            store: Arc::new(Mutex::new(ExtentStore::new())),
        }
    }

    pub fn get(&self, inode: InodeId) -> Result<Bytes, ExtentError> {
        self.lock().get(inode)
    }

    pub fn getattr(&self, inode: InodeId) -> Result<Attr, ExtentError> {
        self.lock().getattr(inode)
    }

    pub fn contents(&self) -> BTreeMap<InodeId, (FileType, Bytes)> {
        self.lock().contents()
    }

    fn lock(&self) -> MutexGuard<'_, ExtentStore> {
        self.store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ExtentStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine for ExtentStateMachine {
    fn apply_command(&mut self, command: &Command) -> Result<CommandOutput, ApplyError> {
        let mut store = self.lock();
        let output = match command {
            Command::Noop => CommandOutput::Noop,
            Command::Create { file_type } => CommandOutput::Created {
                inode: store.create(*file_type)?,
            },
            Command::Put { inode, data } => {
                store.put(*inode, data.clone())?;
                CommandOutput::Written
            }
            Command::Get { inode } => CommandOutput::Content {
                data: store.get(*inode)?,
            },
            Command::GetAttr { inode } => CommandOutput::Attr(store.getattr(*inode)?),
            Command::Remove { inode } => {
                store.remove(*inode)?;
                CommandOutput::Removed
            }
        };

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applies_commands_in_order() {
        let mut sm = ExtentStateMachine::new();
        let reader = sm.clone();

        let created = sm
            .apply_command(&Command::Create {
                file_type: FileType::File,
            })
            .unwrap();
        assert_eq!(created, CommandOutput::Created { inode: 2 });

        sm.apply_command(&Command::Put {
            inode: 2,
            data: Bytes::from_static(b"hi"),
        })
        .unwrap();
        assert_eq!(
            sm.apply_command(&Command::Get { inode: 2 }).unwrap(),
            CommandOutput::Content {
                data: Bytes::from_static(b"hi")
            }
        );
        assert_eq!(reader.get(2).unwrap(), Bytes::from_static(b"hi"));

        assert_eq!(sm.apply_command(&Command::Remove { inode: 2 }).unwrap(), CommandOutput::Removed);
        assert_eq!(
            sm.apply_command(&Command::GetAttr { inode: 2 }),
            Err(ApplyError::Extent(ExtentError::NoEntry(2)))
        );
    }
}
