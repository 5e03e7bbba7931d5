use crate::config::RootConfig;
use anyhow::{Context as _, Result};
use indexmap::IndexMap;
use log::{debug, warn};
use std::collections::{HashMap, VecDeque};
use std::fs::{self, Metadata};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// The stat fields the analyzers care about, captured once at scan time.
#[derive(Debug, Clone, Copy)]
pub struct StatSnapshot {
    pub size: u64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u64,
    pub mtime_ms: i64,
    pub ctime_ms: i64,
    /// Not every filesystem reports a birth time.
    pub birthtime_ms: Option<i64>,
}

impl StatSnapshot {
    pub fn from_metadata(md: &Metadata) -> Self {
        let birthtime_ms = md
            .created()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64);
        Self {
            size: md.len(),
            mode: md.mode(),
            uid: md.uid(),
            gid: md.gid(),
            nlink: md.nlink(),
            mtime_ms: md.mtime() * 1000 + md.mtime_nsec() / 1_000_000,
            ctime_ms: md.ctime() * 1000 + md.ctime_nsec() / 1_000_000,
            birthtime_ms,
        }
    }

    /// Oldest known timestamp; used to pick the original among duplicates.
    pub fn age_ms(&self) -> i64 {
        match self.birthtime_ms {
            Some(birth) => self.ctime_ms.min(birth),
            None => self.ctime_ms,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileEntry {
    pub path: PathBuf,
    /// Containing directory.
    pub dir: PathBuf,
    pub name: String,
    /// File name without the extension.
    pub base: String,
    /// Extension, lower-cased, without the dot. Empty when there is none.
    pub ext: String,
    /// Depth below the scan root; a file directly in the root has depth 1.
    pub depth: usize,
    pub stat: StatSnapshot,
    pub ignored: bool,
    pub marked_for_delete: bool,
}

#[derive(Debug, Clone)]
pub struct DirEntry {
    pub path: PathBuf,
    pub dir: PathBuf,
    pub depth: usize,
    pub stat: StatSnapshot,
    /// Bytes of non-ignored files directly in this directory.
    pub intrinsic_size: u64,
    /// `intrinsic_size` plus the `total_size` of every subdirectory.
    pub total_size: u64,
    /// Files directly in this directory, ignored ones included.
    pub file_count: usize,
    /// Immediate subdirectories.
    pub dir_count: usize,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ScanCounters {
    pub files: usize,
    pub ignored: usize,
    pub directories: usize,
    pub bytes: u64,
}

/// Everything the analyzers consume. Entries are read-only after the scan;
/// both maps preserve discovery (breadth-first) order.
#[derive(Debug, Default)]
pub struct ScanModel {
    pub files: IndexMap<PathBuf, FileEntry>,
    pub directories: IndexMap<PathBuf, DirEntry>,
    pub counters: ScanCounters,
}

/// Breadth-first scan of `cfg.scan_path` with an explicit work queue.
///
/// Ignored directories and the recycle bin are not descended into; symlinks
/// are never followed; the walk stays on the root's filesystem device. Stat
/// errors on individual entries are logged and skipped.
pub fn scan(cfg: &RootConfig) -> Result<ScanModel> {
    let root = &cfg.scan_path;
    let root_md = fs::symlink_metadata(root)
        .with_context(|| format!("stat scan root {}", root.display()))?;
    anyhow::ensure!(root_md.is_dir(), "scan root {} is not a directory", root.display());
    let root_dev = root_md.dev();

    let mut model = ScanModel::default();
    model.directories.insert(
        root.clone(),
        DirEntry {
            path: root.clone(),
            dir: root.parent().map(Path::to_path_buf).unwrap_or_else(|| root.clone()),
            depth: 0,
            stat: StatSnapshot::from_metadata(&root_md),
            intrinsic_size: 0,
            total_size: 0,
            file_count: 0,
            dir_count: 0,
        },
    );

    let mut queue: VecDeque<(PathBuf, usize)> = VecDeque::new();
    queue.push_back((root.clone(), 0));

    while let Some((dir, depth)) = queue.pop_front() {
        let entries = match fs::read_dir(&dir) {
            Ok(rd) => rd,
            Err(err) => {
                warn!("cannot read {}: {err}", dir.display());
                continue;
            }
        };
        for dent in entries {
            let dent = match dent {
                Ok(d) => d,
                Err(err) => {
                    warn!("skipping entry in {}: {err}", dir.display());
                    continue;
                }
            };
            let path = dent.path();
            let name = dent.file_name().to_string_lossy().into_owned();
            let md = match fs::symlink_metadata(&path) {
                Ok(md) => md,
                Err(err) => {
                    warn!("cannot stat {}: {err}", path.display());
                    continue;
                }
            };
            if md.file_type().is_symlink() {
                debug!("not following symlink {}", path.display());
                continue;
            }
            if md.is_dir() {
                if cfg.ignore_directories.is_match(&name) {
                    debug!("ignoring directory {}", path.display());
                    continue;
                }
                if path.starts_with(&cfg.recycle_bin_path) {
                    continue;
                }
                if md.dev() != root_dev {
                    debug!("not crossing device boundary into {}", path.display());
                    continue;
                }
                if let Some(parent) = model.directories.get_mut(&dir) {
                    parent.dir_count += 1;
                }
                model.directories.insert(
                    path.clone(),
                    DirEntry {
                        path: path.clone(),
                        dir: dir.clone(),
                        depth: depth + 1,
                        stat: StatSnapshot::from_metadata(&md),
                        intrinsic_size: 0,
                        total_size: 0,
                        file_count: 0,
                        dir_count: 0,
                    },
                );
                model.counters.directories += 1;
                queue.push_back((path, depth + 1));
            } else if md.is_file() {
                let marked_for_delete = cfg.remove_files.is_match(&name);
                // remove_files is the stronger classification
                let ignored = !marked_for_delete && cfg.ignore_files.is_match(&name);
                let stat = StatSnapshot::from_metadata(&md);
                let base = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| name.clone());
                let ext = path
                    .extension()
                    .map(|s| s.to_string_lossy().to_lowercase())
                    .unwrap_or_default();
                if let Some(parent) = model.directories.get_mut(&dir) {
                    parent.file_count += 1;
                    if !ignored {
                        parent.intrinsic_size += stat.size;
                    }
                }
                model.counters.files += 1;
                if ignored {
                    model.counters.ignored += 1;
                } else {
                    model.counters.bytes += stat.size;
                }
                model.files.insert(
                    path.clone(),
                    FileEntry {
                        path,
                        dir: dir.clone(),
                        name,
                        base,
                        ext,
                        depth: depth + 1,
                        stat,
                        ignored,
                        marked_for_delete,
                    },
                );
            }
            // sockets, fifos and devices are left alone
        }
    }

    finalize_totals(&mut model);
    Ok(model)
}

/// Single post-pass, deepest first: each directory's subtree total lands in
/// its parent's accumulator before the parent itself is finalized.
fn finalize_totals(model: &mut ScanModel) {
    let mut order: Vec<(PathBuf, usize)> = model
        .directories
        .values()
        .map(|d| (d.path.clone(), d.depth))
        .collect();
    order.sort_by(|a, b| b.1.cmp(&a.1));

    let mut subtotals: HashMap<PathBuf, u64> = HashMap::new();
    for (path, depth) in order {
        let (total, parent) = {
            let d = &model.directories[&path];
            (d.intrinsic_size + subtotals.get(&path).copied().unwrap_or(0), d.dir.clone())
        };
        if let Some(d) = model.directories.get_mut(&path) {
            d.total_size = total;
        }
        if depth > 0 {
            *subtotals.entry(parent).or_insert(0) += total;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write as _;
    use tempfile::TempDir;

    fn write_file(path: &Path, bytes: &[u8]) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        let mut f = File::create(path).unwrap();
        f.write_all(bytes).unwrap();
    }

    fn config_for(root: &Path) -> RootConfig {
        RootConfig::with_defaults(root.to_path_buf(), root.join("#recycle"))
    }

    #[test]
    fn aggregates_follow_the_tree() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write_file(&root.join("a/one.txt"), b"12345");
        write_file(&root.join("a/two.txt"), b"123");
        write_file(&root.join("a/b/three.txt"), b"1234567");
        write_file(&root.join("top.txt"), b"12");

        let model = scan(&config_for(root)).unwrap();

        let a = &model.directories[&root.join("a")];
        assert_eq!(a.intrinsic_size, 8);
        assert_eq!(a.total_size, 15);
        assert_eq!(a.file_count, 2);
        assert_eq!(a.dir_count, 1);

        let b = &model.directories[&root.join("a/b")];
        assert_eq!(b.intrinsic_size, 7);
        assert_eq!(b.total_size, 7);

        let top = &model.directories[&root.to_path_buf()];
        assert_eq!(top.intrinsic_size, 2);
        assert_eq!(top.total_size, 17);
        assert_eq!(top.dir_count, 1);

        assert_eq!(model.counters.files, 4);
        assert_eq!(model.counters.bytes, 17);
    }

    #[test]
    fn every_file_has_its_directory_recorded() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write_file(&root.join("x/y/z/deep.txt"), b"abc");

        let model = scan(&config_for(root)).unwrap();
        for file in model.files.values() {
            let mut dir = file.dir.clone();
            loop {
                assert!(model.directories.contains_key(&dir), "missing {}", dir.display());
                if dir == *root {
                    break;
                }
                dir = dir.parent().unwrap().to_path_buf();
            }
        }
        assert_eq!(model.files[&root.join("x/y/z/deep.txt")].depth, 4);
    }

    #[test]
    fn ignored_files_do_not_count_toward_sizes() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write_file(&root.join("a/photo.jpg"), b"123456");
        write_file(&root.join("a/desktop.ini"), b"junkjunk");

        let model = scan(&config_for(root)).unwrap();
        let a = &model.directories[&root.join("a")];
        assert_eq!(a.intrinsic_size, 6);
        assert_eq!(a.file_count, 2);
        let ini = &model.files[&root.join("a/desktop.ini")];
        assert!(ini.ignored);
        assert!(!ini.marked_for_delete);
        assert_eq!(model.counters.ignored, 1);
    }

    #[test]
    fn remove_patterns_override_ignore_patterns() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write_file(&root.join("a/.picasa.ini"), b"x");

        let model = scan(&config_for(root)).unwrap();
        let entry = &model.files[&root.join("a/.picasa.ini")];
        assert!(entry.marked_for_delete);
        assert!(!entry.ignored);
    }

    #[test]
    fn ignored_and_recycle_directories_are_not_descended() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write_file(&root.join("@eaDir/thumb.jpg"), b"x");
        write_file(&root.join("#recycle/old.jpg"), b"x");
        write_file(&root.join("keep/k.jpg"), b"x");

        let model = scan(&config_for(root)).unwrap();
        assert!(model.files.contains_key(&root.join("keep/k.jpg")));
        assert!(!model.files.contains_key(&root.join("@eaDir/thumb.jpg")));
        assert!(!model.files.contains_key(&root.join("#recycle/old.jpg")));
        assert!(!model.directories.contains_key(&root.join("@eaDir")));
        assert!(!model.directories.contains_key(&root.join("#recycle")));
    }

    #[test]
    fn name_parts_are_split_and_lowercased() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write_file(&root.join("IMG_001.JPG"), b"x");

        let model = scan(&config_for(root)).unwrap();
        let entry = &model.files[&root.join("IMG_001.JPG")];
        assert_eq!(entry.base, "IMG_001");
        assert_eq!(entry.ext, "jpg");
        assert_eq!(entry.name, "IMG_001.JPG");
    }
}
