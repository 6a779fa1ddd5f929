use std::collections::HashMap;
use std::time::Duration;

use crate::subprocess::ProcessCommand;

/// Fluent construction of a [`ProcessCommand`]
///
/// ```
/// use stagehand::subprocess::ProcessCommandBuilder;
/// use std::time::Duration;
///
/// let cmd = ProcessCommandBuilder::new("ssh")
///     .args(["-o", "BatchMode=yes", "kvm1", "true"])
///     .timeout(Duration::from_secs(30))
///     .build();
/// assert_eq!(cmd.display(), "ssh -o BatchMode=yes kvm1 true");
/// ```
pub struct ProcessCommandBuilder {
    command: ProcessCommand,
}

impl ProcessCommandBuilder {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            command: ProcessCommand {
                program: program.into(),
                args: Vec::new(),
                env: HashMap::new(),
                timeout: None,
                stdin: None,
            },
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.command.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set a variable on top of the inherited environment
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.command.env.insert(key.into(), value.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.command.timeout = Some(timeout);
        self
    }

    /// Bytes written to the child's stdin, which is closed afterwards
    pub fn stdin(mut self, input: Vec<u8>) -> Self {
        self.command.stdin = Some(input);
        self
    }

    pub fn build(self) -> ProcessCommand {
        self.command
    }
}
