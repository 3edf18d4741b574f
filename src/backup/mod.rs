// Backup engine
// Mapping-driven diff and transfer with a transactional file layer

pub mod error;
pub mod exclude;
pub mod file_ops;
pub mod identity;
pub mod manager;
pub mod mapping;
pub mod modes;
pub mod paths;
pub mod state;
pub mod transaction;

// Re-export commonly used types for convenience
pub use error::{BackupError, Failure, FailureKind};
pub use exclude::{ExcludeRules, FileTypeFilter};
pub use file_ops::SafeFileOps;
pub use identity::IdentityCache;
pub use manager::{AutoConfirm, BackupManager, Confirmer};
pub use mapping::{BackupMapping, PlannedOp, RunReport};
pub use modes::{BackupMode, FileMode, HashMode};
pub use state::BackupState;
pub use transaction::BackupTransaction;
