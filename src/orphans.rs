use crate::config::RootConfig;
use crate::plan::Operation;
use crate::scan::ScanModel;
use crate::utils::rebase;
use std::path::Path;

/// Lone files: the only file in their directory, whatever the extension.
/// Typically a sidecar left behind after its master was moved or deleted by
/// hand. Files directly in the scan root are exempt.
pub fn analyze(model: &ScanModel, cfg: &RootConfig) -> Vec<Operation> {
    let mut ops = Vec::new();
    for file in model.files.values() {
        if file.ignored || file.marked_for_delete {
            continue;
        }
        if file.dir == cfg.scan_path {
            continue;
        }
        if !is_lone_file(model, &file.dir) {
            continue;
        }
        ops.push(Operation::Orphan {
            path: file.path.clone(),
            move_to: rebase(&cfg.recycle_bin_path, &file.path),
            size: file.stat.size,
        });
    }
    ops
}

fn is_lone_file(model: &ScanModel, dir: &Path) -> bool {
    model.directories.get(dir).map_or(false, |d| d.file_count == 1)
}
