use crate::date::DateSource;
use crate::utils::{format_mode, readable_display};
use log::debug;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

/// Operation classes, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    PreCleanup,
    Duplicate,
    Orphan,
    Reorganize,
    Permissions,
    Ownership,
    PostCleanup,
}

impl OpKind {
    pub fn is_destructive(self) -> bool {
        matches!(
            self,
            OpKind::PreCleanup | OpKind::Duplicate | OpKind::Orphan | OpKind::PostCleanup
        )
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OpKind::PreCleanup => "pre-cleanup",
            OpKind::Duplicate => "duplicates",
            OpKind::Orphan => "orphans",
            OpKind::Reorganize => "reorganize",
            OpKind::Permissions => "permissions",
            OpKind::Ownership => "ownership",
            OpKind::PostCleanup => "post-cleanup",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupReason {
    Empty,
    BelowThreshold,
    OnlyIgnored,
    MarkedForDelete,
}

impl fmt::Display for CleanupReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CleanupReason::Empty => "is empty",
            CleanupReason::BelowThreshold => "size below threshold",
            CleanupReason::OnlyIgnored => {
                "considered empty but contains only ignored/zero-byte items"
            }
            CleanupReason::MarkedForDelete => "marked for deletion",
        };
        f.write_str(s)
    }
}

/// A companion file that travels with its duplicate master.
#[derive(Debug, Clone)]
pub struct Sidecar {
    pub path: PathBuf,
    pub move_to: PathBuf,
    /// The matching member of the original fileset, when one hashed equal.
    pub original: Option<PathBuf>,
}

/// One staged correction. Each variant carries exactly the fields its kind
/// needs; the executor routes by exhaustive match.
#[derive(Debug, Clone)]
pub enum Operation {
    Cleanup {
        path: PathBuf,
        move_to: PathBuf,
        size: u64,
        reason: CleanupReason,
        is_dir: bool,
    },
    Duplicate {
        path: PathBuf,
        move_to: PathBuf,
        original: PathBuf,
        size: u64,
        sidecars: Vec<Sidecar>,
    },
    Orphan {
        path: PathBuf,
        move_to: PathBuf,
        size: u64,
    },
    Reorganize {
        path: PathBuf,
        move_to: PathBuf,
        source: DateSource,
    },
    Permissions {
        path: PathBuf,
        is_dir: bool,
        current_mode: u32,
        desired_mode: u32,
    },
    Ownership {
        path: PathBuf,
        current_uid: u32,
        current_gid: u32,
        new_uid: u32,
        new_gid: u32,
        user: String,
        group: String,
    },
}

impl Operation {
    pub fn path(&self) -> &Path {
        match self {
            Operation::Cleanup { path, .. }
            | Operation::Duplicate { path, .. }
            | Operation::Orphan { path, .. }
            | Operation::Reorganize { path, .. }
            | Operation::Permissions { path, .. }
            | Operation::Ownership { path, .. } => path,
        }
    }

    /// One line for the `show` answer and for dry runs.
    pub fn describe(&self) -> String {
        match self {
            Operation::Cleanup { path, move_to, reason, .. } => {
                format!("move {} -> {} ({})", readable_display(path), readable_display(move_to), reason)
            }
            Operation::Duplicate { path, move_to, original, sidecars, .. } => {
                let mut line = format!(
                    "move {} -> {} (duplicate of {})",
                    readable_display(path),
                    readable_display(move_to),
                    readable_display(original)
                );
                if !sidecars.is_empty() {
                    line.push_str(&format!(" +{} sidecar(s)", sidecars.len()));
                }
                line
            }
            Operation::Orphan { path, move_to, .. } => {
                format!("move {} -> {} (orphan)", readable_display(path), readable_display(move_to))
            }
            Operation::Reorganize { path, move_to, source } => {
                format!("move {} -> {} (date from {})", readable_display(path), readable_display(move_to), source)
            }
            Operation::Permissions { path, current_mode, desired_mode, .. } => {
                format!(
                    "chmod {} {} (was {})",
                    format_mode(*desired_mode),
                    readable_display(path),
                    format_mode(*current_mode)
                )
            }
            Operation::Ownership { path, current_uid, current_gid, new_uid, new_gid, user, group } => {
                format!(
                    "chown {}:{} ({}:{}) {} (was {}:{})",
                    user, group, new_uid, new_gid, readable_display(path), current_uid, current_gid
                )
            }
        }
    }
}

/// The arbitrated result of one analysis pass over a root.
#[derive(Debug, Default)]
pub struct Plan {
    pub pre_cleanup: Vec<Operation>,
    pub duplicates: Vec<Operation>,
    pub orphans: Vec<Operation>,
    pub reorganize: Vec<Operation>,
    pub permissions: Vec<Operation>,
    pub ownership: Vec<Operation>,
}

impl Plan {
    pub fn classes(&self) -> [(OpKind, &[Operation]); 6] {
        [
            (OpKind::PreCleanup, self.pre_cleanup.as_slice()),
            (OpKind::Duplicate, self.duplicates.as_slice()),
            (OpKind::Orphan, self.orphans.as_slice()),
            (OpKind::Reorganize, self.reorganize.as_slice()),
            (OpKind::Permissions, self.permissions.as_slice()),
            (OpKind::Ownership, self.ownership.as_slice()),
        ]
    }

    pub fn total_ops(&self) -> usize {
        self.classes().iter().map(|(_, ops)| ops.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_ops() == 0
    }
}

/// Destructive/non-destructive precedence: once a path is claimed by a
/// cleanup, duplicate or orphan move, no other analyzer may touch it — a
/// chmod on a file that is about to land in the recycle bin is nonsense.
#[derive(Debug, Default)]
pub struct Arbiter {
    destructive: HashSet<PathBuf>,
}

impl Arbiter {
    /// A path counts as claimed when it or any ancestor was claimed; a moved
    /// directory takes its whole subtree along.
    pub fn is_claimed(&self, path: &Path) -> bool {
        path.ancestors().any(|p| self.destructive.contains(p))
    }

    /// Filter a destructive analyzer's output against earlier claims and
    /// record what survives (sidecar paths included).
    pub fn claim_destructive(&mut self, ops: Vec<Operation>) -> Vec<Operation> {
        let mut accepted = Vec::with_capacity(ops.len());
        for op in ops {
            if self.is_claimed(op.path()) {
                debug!("arbiter: {} already claimed", op.path().display());
                continue;
            }
            self.destructive.insert(op.path().to_path_buf());
            if let Operation::Duplicate { sidecars, .. } = &op {
                for sidecar in sidecars {
                    self.destructive.insert(sidecar.path.clone());
                }
            }
            accepted.push(op);
        }
        accepted
    }

    /// Filter a non-destructive analyzer's output; claims nothing.
    pub fn retain_unclaimed(&self, ops: Vec<Operation>) -> Vec<Operation> {
        ops.into_iter().filter(|op| !self.is_claimed(op.path())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cleanup(path: &str) -> Operation {
        Operation::Cleanup {
            path: PathBuf::from(path),
            move_to: PathBuf::from("/r/#recycle"),
            size: 0,
            reason: CleanupReason::Empty,
            is_dir: true,
        }
    }

    fn duplicate(path: &str, sidecars: Vec<Sidecar>) -> Operation {
        Operation::Duplicate {
            path: PathBuf::from(path),
            move_to: PathBuf::from("/r/#recycle/dup.jpg"),
            original: PathBuf::from("/r/orig.jpg"),
            size: 1,
            sidecars,
        }
    }

    fn permissions(path: &str) -> Operation {
        Operation::Permissions {
            path: PathBuf::from(path),
            is_dir: false,
            current_mode: 0o600,
            desired_mode: 0o664,
        }
    }

    #[test]
    fn destructive_claim_excludes_nondestructive_ops() {
        let mut arbiter = Arbiter::default();
        let dups = arbiter.claim_destructive(vec![duplicate("/r/dup.jpg", vec![])]);
        assert_eq!(dups.len(), 1);

        let perms = arbiter.retain_unclaimed(vec![permissions("/r/dup.jpg"), permissions("/r/ok.jpg")]);
        assert_eq!(perms.len(), 1);
        assert_eq!(perms[0].path(), Path::new("/r/ok.jpg"));
    }

    #[test]
    fn later_destructive_analyzers_skip_claimed_paths() {
        let mut arbiter = Arbiter::default();
        arbiter.claim_destructive(vec![cleanup("/r/empty")]);
        let dups = arbiter.claim_destructive(vec![duplicate("/r/empty", vec![])]);
        assert!(dups.is_empty());
    }

    #[test]
    fn claims_cover_subtrees() {
        let mut arbiter = Arbiter::default();
        arbiter.claim_destructive(vec![cleanup("/r/empty")]);
        assert!(arbiter.is_claimed(Path::new("/r/empty/nested/file.jpg")));
        let perms = arbiter.retain_unclaimed(vec![permissions("/r/empty/nested/file.jpg")]);
        assert!(perms.is_empty());
    }

    #[test]
    fn sidecars_are_claimed_with_their_master() {
        let mut arbiter = Arbiter::default();
        let sidecar = Sidecar {
            path: PathBuf::from("/r/b/IMG.xmp"),
            move_to: PathBuf::from("/r/#recycle/b/IMG.xmp"),
            original: Some(PathBuf::from("/r/a/IMG.xmp")),
        };
        arbiter.claim_destructive(vec![duplicate("/r/b/IMG.jpg", vec![sidecar])]);
        assert!(arbiter.is_claimed(Path::new("/r/b/IMG.xmp")));
    }
}
