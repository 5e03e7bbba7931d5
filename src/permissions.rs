use crate::config::RootConfig;
use crate::plan::Operation;
use crate::scan::ScanModel;

/// Flag every entry whose mode differs from the configured `dir_perm` /
/// `file_perm`. Ignored files are left as they are.
pub fn analyze(model: &ScanModel, cfg: &RootConfig) -> Vec<Operation> {
    let mut ops = Vec::new();
    for dir in model.directories.values() {
        push_mismatch(&mut ops, dir.path.clone(), true, dir.stat.mode, cfg.dir_perm);
    }
    for file in model.files.values() {
        if file.ignored {
            continue;
        }
        push_mismatch(&mut ops, file.path.clone(), false, file.stat.mode, cfg.file_perm);
    }
    ops
}

fn push_mismatch(
    ops: &mut Vec<Operation>,
    path: std::path::PathBuf,
    is_dir: bool,
    mode: u32,
    desired_mode: u32,
) {
    let current_mode = mode & 0o777;
    if current_mode != desired_mode {
        ops.push(Operation::Permissions { path, is_dir, current_mode, desired_mode });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::scan;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use tempfile::TempDir;

    fn config_for(root: &Path) -> RootConfig {
        RootConfig::with_defaults(root.to_path_buf(), root.join("#recycle"))
    }

    fn chmod(path: &Path, mode: u32) {
        fs::set_permissions(path, fs::Permissions::from_mode(mode)).unwrap();
    }

    #[test]
    fn mismatched_modes_are_flagged() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("d")).unwrap();
        fs::write(root.join("d/locked.txt"), b"x").unwrap();
        fs::write(root.join("d/fine.txt"), b"x").unwrap();
        chmod(root, 0o775);
        chmod(&root.join("d"), 0o775);
        chmod(&root.join("d/locked.txt"), 0o600);
        chmod(&root.join("d/fine.txt"), 0o664);

        let cfg = config_for(root);
        let model = scan(&cfg).unwrap();
        let ops = analyze(&model, &cfg);

        assert_eq!(ops.len(), 1);
        match &ops[0] {
            Operation::Permissions { path, is_dir, current_mode, desired_mode } => {
                assert_eq!(*path, root.join("d/locked.txt"));
                assert!(!is_dir);
                assert_eq!(*current_mode, 0o600);
                assert_eq!(*desired_mode, 0o664);
            }
            other => panic!("unexpected op {other:?}"),
        }
    }

    #[test]
    fn directories_check_against_dir_perm() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("d")).unwrap();
        chmod(root, 0o775);
        chmod(&root.join("d"), 0o700);

        let cfg = config_for(root);
        let model = scan(&cfg).unwrap();
        let ops = analyze(&model, &cfg);

        assert_eq!(ops.len(), 1);
        match &ops[0] {
            Operation::Permissions { path, is_dir, desired_mode, .. } => {
                assert_eq!(*path, root.join("d"));
                assert!(is_dir);
                assert_eq!(*desired_mode, 0o775);
            }
            other => panic!("unexpected op {other:?}"),
        }
    }

    #[test]
    fn ignored_files_are_not_touched() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::write(root.join("desktop.ini"), b"x").unwrap();
        chmod(root, 0o775);
        chmod(&root.join("desktop.ini"), 0o600);

        let cfg = config_for(root);
        let model = scan(&cfg).unwrap();
        assert!(analyze(&model, &cfg).is_empty());
    }
}
