// Backup manager
// Sequences multiple mappings, gates on confirmation, aggregates failures

use super::error::BackupError;
use super::mapping::{BackupMapping, RunReport};
use crate::cancel::CancellationToken;
use crate::logging::{info, warn};

/// Answers yes/no prompts. The interactive implementation lives with the
/// CLI; the engine only sees this trait.
pub trait Confirmer {
    fn confirm(&mut self, prompt: &str) -> bool;
}

/// Confirms everything. Used for `skip_confirm` runs and tests.
pub struct AutoConfirm;

impl Confirmer for AutoConfirm {
    fn confirm(&mut self, _prompt: &str) -> bool {
        true
    }
}

/// Runs a list of mappings in order.
pub struct BackupManager {
    name: String,
    mappings: Vec<BackupMapping>,
    test: bool,
    overwrite: bool,
    warn_duplicates: bool,
    skip_confirm: bool,
}

impl BackupManager {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mappings: Vec::new(),
            test: true,
            overwrite: false,
            warn_duplicates: false,
            skip_confirm: false,
        }
    }

    pub fn with_mappings(mut self, mappings: Vec<BackupMapping>) -> Self {
        self.mappings = mappings;
        self
    }

    pub fn with_test(mut self, test: bool) -> Self {
        self.test = test;
        self
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn with_warn_duplicates(mut self, warn_duplicates: bool) -> Self {
        self.warn_duplicates = warn_duplicates;
        self
    }

    pub fn with_skip_confirm(mut self, skip_confirm: bool) -> Self {
        self.skip_confirm = skip_confirm;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_test(&mut self, test: bool) {
        self.test = test;
    }

    pub fn mappings(&self) -> &[BackupMapping] {
        &self.mappings
    }

    /// Reset run state on every active mapping.
    pub fn clean(&mut self) {
        for mapping in self.mappings.iter_mut().filter(|m| m.will_run) {
            mapping.clean();
        }
    }

    /// Run every mapping flagged `will_run`.
    ///
    /// Prints the plan and asks for confirmation (twice, unless
    /// `skip_confirm`); a declined confirmation is a no-op. Per-mapping
    /// setup errors are recorded and the remaining mappings still run; a
    /// run only aborts on cancellation. Failure reports are emitted for
    /// every mapping at the end.
    pub fn run_backup(
        &mut self,
        confirmer: &mut dyn Confirmer,
        cancel: &CancellationToken,
    ) -> Result<Vec<RunReport>, BackupError> {
        info!(
            "{}: {}",
            self.name,
            if self.test { "testing backups" } else { "running backups" }
        );
        println!("The following backups will be run:");
        for mapping in self.mappings.iter().filter(|m| m.will_run) {
            println!("{}", mapping);
        }

        if !self.skip_confirm {
            if !confirmer.confirm("CONFIRM BACKUP (y/n): ") {
                info!("no change made");
                return Ok(Vec::new());
            }
            if !confirmer.confirm("CONFIRM BACKUP AGAIN (y/n): ") {
                info!("no change made");
                return Ok(Vec::new());
            }
        }

        let mut reports = Vec::new();
        for mapping in self.mappings.iter_mut().filter(|m| m.will_run) {
            if cancel.is_cancelled() {
                return Err(BackupError::Cancelled);
            }
            if let Err(e) = mapping.setup(self.overwrite, self.warn_duplicates) {
                warn!("setup failed for mapping {}: {}", mapping.name(), e);
                mapping.failures.push(super::error::Failure::new(
                    super::error::FailureKind::BackupOperation,
                    e.to_string(),
                    mapping.target_dir(),
                    mapping.source_dir(),
                ));
                continue;
            }
            let mut auto = AutoConfirm;
            let gate: &mut dyn Confirmer = if self.skip_confirm {
                &mut auto
            } else {
                &mut *confirmer
            };
            match mapping.backup(self.test, gate, cancel) {
                Ok(report) => reports.push(report),
                Err(BackupError::Cancelled) => return Err(BackupError::Cancelled),
                Err(e) => {
                    warn!("backup failed for mapping {}: {}", mapping.name(), e);
                    mapping.failures.push(super::error::Failure::new(
                        super::error::FailureKind::BackupOperation,
                        e.to_string(),
                        mapping.target_dir(),
                        mapping.source_dir(),
                    ));
                }
            }
        }

        for mapping in self.mappings.iter().filter(|m| m.will_run) {
            mapping.report_failures();
        }
        Ok(reports)
    }
}
