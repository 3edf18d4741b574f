// Backup mode enums
// Closed sets matched exhaustively at every decision point

use std::fmt;

/// How files are carried from source to target, and what happens to the
/// leftovers on either side afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackupMode {
    /// Copy files to target and remove them from source once verified.
    PushAndRemove,
    /// Copy files to target, leave source untouched.
    #[default]
    Push,
    /// Copy files to target, collapsing content-identical source files
    /// to a single target file.
    PushDuplicates,
    /// Make target identical to source, removing stale target content.
    Mirror,
    /// Mirror, tolerant of duplicate content on the source side.
    MirrorDuplicates,
}

impl BackupMode {
    /// True for the one-way copy modes (no stale-target removal phase).
    pub fn is_push(self) -> bool {
        matches!(
            self,
            BackupMode::Push | BackupMode::PushDuplicates | BackupMode::PushAndRemove
        )
    }

    /// True for the modes that delete target-only content after copying.
    pub fn is_mirror(self) -> bool {
        matches!(self, BackupMode::Mirror | BackupMode::MirrorDuplicates)
    }

    /// True when the source file is removed after a verified transfer.
    pub fn is_move(self) -> bool {
        matches!(self, BackupMode::PushAndRemove)
    }

    /// True for the duplicate-tolerant variants: a multi-path content
    /// bucket is collapsed to one physical target file.
    pub fn allows_duplicates(self) -> bool {
        matches!(self, BackupMode::PushDuplicates | BackupMode::MirrorDuplicates)
    }
}

impl fmt::Display for BackupMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackupMode::PushAndRemove => "push-and-remove",
            BackupMode::Push => "push",
            BackupMode::PushDuplicates => "push-duplicates",
            BackupMode::Mirror => "mirror",
            BackupMode::MirrorDuplicates => "mirror-duplicates",
        };
        write!(f, "{}", name)
    }
}

/// Strategy for deriving a file's comparison identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashMode {
    /// Base name only.
    FileName,
    /// Parent directory name joined with the base name. Disambiguates
    /// same-named files in different folders without reading content.
    FileNameAndParent,
    /// SHA-256 digest of the file content, streamed in fixed chunks.
    #[default]
    Sha256,
}

impl fmt::Display for HashMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HashMode::FileName => "file-name",
            HashMode::FileNameAndParent => "file-name-and-parent",
            HashMode::Sha256 => "sha256",
        };
        write!(f, "{}", name)
    }
}

/// What a mapping operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileMode {
    /// Transfer files and replicate the directory skeleton.
    #[default]
    FilesAndDirs,
    /// Replicate the directory skeleton only.
    DirsOnly,
}
