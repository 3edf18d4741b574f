// Transactional execution of ordered file operations
// Steps run in order; the first failure rolls back every completed step in
// reverse completion order. Rollback errors are logged, never re-thrown, so
// execute() always returns instead of raising past a partial state.

use super::error::BackupError;
use crate::cancel::CancellationToken;
use crate::logging::warn;

type StepFn = Box<dyn FnOnce() -> Result<(), BackupError>>;

struct PendingStep {
    label: String,
    action: StepFn,
    rollback: Option<StepFn>,
}

struct CompletedStep {
    label: String,
    rollback: Option<StepFn>,
}

/// An ordered list of (action, rollback) pairs.
///
/// Steps may be added and executed in phases; the completed list spans
/// phases so a later `rollback()` undoes the whole run retroactively.
#[derive(Default)]
pub struct BackupTransaction {
    pending: Vec<PendingStep>,
    completed: Vec<CompletedStep>,
}

impl BackupTransaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step with no rollback.
    pub fn add<A>(&mut self, label: impl Into<String>, action: A)
    where
        A: FnOnce() -> Result<(), BackupError> + 'static,
    {
        self.pending.push(PendingStep {
            label: label.into(),
            action: Box::new(action),
            rollback: None,
        });
    }

    /// Append a step with a rollback that undoes its effect.
    pub fn add_with_rollback<A, R>(&mut self, label: impl Into<String>, action: A, rollback: R)
    where
        A: FnOnce() -> Result<(), BackupError> + 'static,
        R: FnOnce() -> Result<(), BackupError> + 'static,
    {
        self.pending.push(PendingStep {
            label: label.into(),
            action: Box::new(action),
            rollback: Some(Box::new(rollback)),
        });
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn completed_len(&self) -> usize {
        self.completed.len()
    }

    /// Run all pending steps in order.
    ///
    /// The cancellation token is polled between steps; cancellation and the
    /// first failing step both roll back every completed step (including
    /// those from earlier execute phases) and return the triggering error.
    pub fn execute(
        &mut self,
        cancel: &CancellationToken,
        mut on_step: impl FnMut(u64, u64, &str),
    ) -> Result<(), BackupError> {
        let total = self.pending.len() as u64;
        let mut done = 0u64;
        let pending = std::mem::take(&mut self.pending);

        for step in pending {
            if cancel.is_cancelled() {
                self.rollback();
                return Err(BackupError::Cancelled);
            }
            on_step(done, total, &step.label);
            match (step.action)() {
                Ok(()) => {
                    self.completed.push(CompletedStep {
                        label: step.label,
                        rollback: step.rollback,
                    });
                }
                Err(e) => {
                    self.rollback();
                    return Err(e);
                }
            }
            done += 1;
            on_step(done, total, "");
        }
        Ok(())
    }

    /// Undo every completed step, newest first. Best-effort: a failing
    /// rollback is logged and the remaining rollbacks still run.
    pub fn rollback(&mut self) {
        while let Some(step) = self.completed.pop() {
            if let Some(rollback) = step.rollback {
                if let Err(e) = rollback() {
                    warn!("rollback of step '{}' failed: {}", step.label, e);
                }
            }
        }
        self.pending.clear();
    }
}
