use serde::{Deserialize, Serialize};

/// Stable identifier used to look up a session across navigation and
/// remount. Typically the task identifier.
pub type SessionKey = String;

/// What a session runs: which workflow and task it belongs to and the shell
/// command the PTY was started with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescriptor {
    pub workflow: String,
    pub task: String,
    pub command: String,
}

impl SessionDescriptor {
    pub fn new(
        workflow: impl Into<String>,
        task: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            workflow: workflow.into(),
            task: task.into(),
            command: command.into(),
        }
    }
}
