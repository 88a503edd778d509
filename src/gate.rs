use crate::shared::logging::RunLog;
use std::io::{self, BufRead, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseKind {
    /// Always blocks for operator acknowledgement.
    Mandatory,
    /// Blocks only when the run is interactive; otherwise logs and proceeds.
    Conditional,
}

#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("operator aborted during pause")]
    Aborted,
    #[error("operator prompt io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Blocking acknowledgement signal from the operator.
pub trait OperatorPrompt {
    fn acknowledge(&mut self, message: &str) -> Result<(), GateError>;
}

/// Reads one line from stdin. End-of-input or an interrupt while blocked is
/// an operator abort.
#[derive(Debug, Default)]
pub struct ConsolePrompt;

impl OperatorPrompt for ConsolePrompt {
    fn acknowledge(&mut self, message: &str) -> Result<(), GateError> {
        eprint!("⏸ {message} ");
        io::stderr().flush()?;
        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) => Err(GateError::Aborted),
            Ok(_) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => Err(GateError::Aborted),
            Err(err) => Err(GateError::Io(err)),
        }
    }
}

/// Acknowledges immediately. Used by dry runs and scripted tests where no
/// operator is attached.
#[derive(Debug, Default)]
pub struct AutoAckPrompt;

impl OperatorPrompt for AutoAckPrompt {
    fn acknowledge(&mut self, _message: &str) -> Result<(), GateError> {
        Ok(())
    }
}

/// Mediates human-in-the-loop pauses. Every pause flushes the run log first
/// so the on-disk trail matches what the operator sees before anything
/// blocks.
#[derive(Debug)]
pub struct InteractionGate<P: OperatorPrompt> {
    interactive: bool,
    prompt: P,
}

impl<P: OperatorPrompt> InteractionGate<P> {
    pub fn new(interactive: bool, prompt: P) -> Self {
        Self {
            interactive,
            prompt,
        }
    }

    pub fn interactive(&self) -> bool {
        self.interactive
    }

    pub fn pause(
        &mut self,
        log: &mut RunLog,
        kind: PauseKind,
        message: &str,
    ) -> Result<(), GateError> {
        log.pause(message);
        log.flush();

        if kind == PauseKind::Mandatory || self.interactive {
            match self.prompt.acknowledge(message) {
                Ok(()) => Ok(()),
                Err(err) => {
                    log.info("operator aborted during pause");
                    log.flush();
                    Err(err)
                }
            }
        } else {
            log.info("continuing without blocking (non-interactive, conditional pause)");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[derive(Default)]
    struct CountingPrompt {
        acks: usize,
    }

    impl OperatorPrompt for CountingPrompt {
        fn acknowledge(&mut self, _message: &str) -> Result<(), GateError> {
            self.acks += 1;
            Ok(())
        }
    }

    struct AbortingPrompt;

    impl OperatorPrompt for AbortingPrompt {
        fn acknowledge(&mut self, _message: &str) -> Result<(), GateError> {
            Err(GateError::Aborted)
        }
    }

    fn test_log(dir: &std::path::Path) -> RunLog {
        RunLog::create(&dir.join("t_working.json")).expect("create log")
    }

    #[test]
    fn mandatory_pause_blocks_regardless_of_mode() {
        let dir = tempdir().expect("tempdir");
        let mut log = test_log(dir.path());
        let mut gate = InteractionGate::new(false, CountingPrompt::default());
        gate.pause(&mut log, PauseKind::Mandatory, "confirm login")
            .expect("pause");
        assert_eq!(gate.prompt.acks, 1);
    }

    #[test]
    fn conditional_pause_blocks_only_in_interactive_mode() {
        let dir = tempdir().expect("tempdir");
        let mut log = test_log(dir.path());

        let mut silent = InteractionGate::new(false, CountingPrompt::default());
        silent
            .pause(&mut log, PauseKind::Conditional, "row done")
            .expect("pause");
        assert_eq!(silent.prompt.acks, 0);

        let mut interactive = InteractionGate::new(true, CountingPrompt::default());
        interactive
            .pause(&mut log, PauseKind::Conditional, "row done")
            .expect("pause");
        assert_eq!(interactive.prompt.acks, 1);
    }

    #[test]
    fn pause_writes_and_flushes_log_before_blocking() {
        let dir = tempdir().expect("tempdir");
        let mut log = test_log(dir.path());
        let mut gate = InteractionGate::new(false, AbortingPrompt);

        let err = gate
            .pause(&mut log, PauseKind::Mandatory, "fix the table")
            .expect_err("abort propagates");
        assert!(matches!(err, GateError::Aborted));

        let content =
            fs::read_to_string(dir.path().join("t_working_run.log")).expect("read log");
        assert!(content.contains("PAUSE - fix the table"));
        assert!(content.contains("operator aborted during pause"));
    }
}
