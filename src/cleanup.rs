use crate::config::RootConfig;
use crate::plan::{CleanupReason, Operation};
use crate::scan::ScanModel;
use crate::utils::rebase;
use std::collections::HashSet;
use std::path::PathBuf;

/// Candidates for the recycle bin, pre- or post-run: directories whose whole
/// subtree is empty enough, and files matching a remove pattern.
#[derive(Debug, Default)]
pub struct CleanupReport {
    pub directories: Vec<Operation>,
    pub files: Vec<Operation>,
    /// Total bytes the moves would reclaim.
    pub size: u64,
}

impl CleanupReport {
    pub fn operations(self) -> Vec<Operation> {
        let mut ops = self.directories;
        ops.extend(self.files);
        ops
    }

    pub fn is_empty(&self) -> bool {
        self.directories.is_empty() && self.files.is_empty()
    }
}

struct Candidate {
    path: PathBuf,
    parent: PathBuf,
    depth: usize,
    is_dir: bool,
    size: u64,
    reason: CleanupReason,
}

pub fn analyze(model: &ScanModel, cfg: &RootConfig) -> CleanupReport {
    let mut candidates: Vec<Candidate> = Vec::new();

    for dir in model.directories.values() {
        // the scan root is never a candidate
        if dir.depth == 0 {
            continue;
        }
        if dir.total_size <= cfg.empty_threshold {
            let reason = if dir.file_count == 0 && dir.dir_count == 0 {
                CleanupReason::Empty
            } else if dir.total_size == 0 {
                CleanupReason::OnlyIgnored
            } else {
                CleanupReason::BelowThreshold
            };
            candidates.push(Candidate {
                path: dir.path.clone(),
                parent: dir.dir.clone(),
                depth: dir.depth,
                is_dir: true,
                size: dir.total_size,
                reason,
            });
        }
    }
    for file in model.files.values() {
        if file.marked_for_delete {
            candidates.push(Candidate {
                path: file.path.clone(),
                parent: file.dir.clone(),
                depth: file.depth,
                is_dir: false,
                size: file.stat.size,
                reason: CleanupReason::MarkedForDelete,
            });
        }
    }

    // Shallowest first, so a parent is accepted before its children come up
    // and the children cascade away: the parent's move subsumes them.
    candidates.sort_by(|a, b| a.depth.cmp(&b.depth).then_with(|| a.path.cmp(&b.path)));

    let mut accepted: HashSet<PathBuf> = HashSet::new();
    let mut report = CleanupReport::default();
    for cand in candidates {
        let cascaded = cand.parent.ancestors().any(|anc| accepted.contains(anc));
        if cand.is_dir {
            // keeps recursion semantics: grandchildren cascade off this
            // directory even when it cascaded itself
            accepted.insert(cand.path.clone());
        }
        if cascaded {
            continue;
        }
        let op = Operation::Cleanup {
            move_to: rebase(&cfg.recycle_bin_path, &cand.path),
            path: cand.path,
            size: cand.size,
            reason: cand.reason,
            is_dir: cand.is_dir,
        };
        report.size += cand.size;
        if cand.is_dir {
            report.directories.push(op);
        } else {
            report.files.push(op);
        }
    }
    report
}
