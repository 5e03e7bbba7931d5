use crate::plan::{OpKind, Operation, Plan};
use anyhow::{Context as _, Result};
use log::{error, warn};
use nix::unistd::{chown, Gid, Uid};
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

/// The operator's answer at a class or item prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    Yes,
    All,
    No,
    Cancel,
    Show,
}

/// Confirmation source. The interactive one asks on the terminal; tests and
/// `--yes` runs plug in [`AssumeYes`].
pub trait Confirm {
    /// Asked once per operation class.
    fn class_prompt(&mut self, kind: OpKind, count: usize) -> Choice;
    /// Asked per item after a `Yes` class answer.
    fn item_prompt(&mut self, op: &Operation) -> Choice;
}

/// Answers yes-to-all everywhere; used by `--yes` and in tests.
pub struct AssumeYes;

impl Confirm for AssumeYes {
    fn class_prompt(&mut self, _kind: OpKind, _count: usize) -> Choice {
        Choice::All
    }
    fn item_prompt(&mut self, _op: &Operation) -> Choice {
        Choice::Yes
    }
}

/// Terminal prompts via dialoguer.
pub struct Interactive;

const CHOICES: [&str; 5] = ["yes", "yes to all", "no", "cancel", "show"];

fn select(prompt: &str) -> Choice {
    match dialoguer::Select::new()
        .with_prompt(prompt)
        .items(&CHOICES)
        .default(0)
        .interact()
    {
        Ok(0) => Choice::Yes,
        Ok(1) => Choice::All,
        Ok(2) => Choice::No,
        Ok(3) => Choice::Cancel,
        Ok(4) => Choice::Show,
        // a closed terminal means stop asking
        _ => Choice::Cancel,
    }
}

impl Confirm for Interactive {
    fn class_prompt(&mut self, kind: OpKind, count: usize) -> Choice {
        select(&format!("{kind}: apply {count} operation(s)?"))
    }
    fn item_prompt(&mut self, op: &Operation) -> Choice {
        select(&op.describe())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ExecStats {
    pub applied: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Bytes moved out of the tree by destructive operations; failed moves
    /// are not counted.
    pub bytes_reclaimed: u64,
}

/// Runs confirmed operations class by class. `cancel` at any prompt skips
/// everything after it in the same plan.
pub struct Executor<'a> {
    confirm: &'a mut dyn Confirm,
    cancelled: bool,
    pub stats: ExecStats,
}

impl<'a> Executor<'a> {
    pub fn new(confirm: &'a mut dyn Confirm) -> Self {
        Self { confirm, cancelled: false, stats: ExecStats::default() }
    }

    pub fn run_plan(&mut self, plan: &Plan) {
        for (kind, ops) in plan.classes() {
            self.run_class(kind, ops);
        }
    }

    pub fn run_class(&mut self, kind: OpKind, ops: &[Operation]) {
        if ops.is_empty() {
            return;
        }
        if self.cancelled {
            self.stats.skipped += ops.len();
            return;
        }
        let ordered = order_for_execution(kind, ops);

        let class_choice = loop {
            match self.confirm.class_prompt(kind, ordered.len()) {
                Choice::Show => {
                    for op in &ordered {
                        println!("  {}", op.describe());
                    }
                }
                choice => break choice,
            }
        };
        match class_choice {
            Choice::No => {
                self.stats.skipped += ordered.len();
                return;
            }
            Choice::Cancel => {
                self.cancelled = true;
                self.stats.skipped += ordered.len();
                return;
            }
            Choice::Yes | Choice::All => {}
            Choice::Show => unreachable!("show loops back to the prompt"),
        }

        let mut all = class_choice == Choice::All;
        for (i, op) in ordered.iter().enumerate() {
            if !all {
                let choice = loop {
                    match self.confirm.item_prompt(op) {
                        Choice::Show => println!("  {}", op.describe()),
                        choice => break choice,
                    }
                };
                match choice {
                    Choice::No => {
                        self.stats.skipped += 1;
                        continue;
                    }
                    Choice::Cancel => {
                        self.cancelled = true;
                        self.stats.skipped += ordered.len() - i;
                        return;
                    }
                    Choice::All => all = true,
                    Choice::Yes => {}
                    Choice::Show => unreachable!("show loops back to the prompt"),
                }
            }
            match apply(op) {
                Ok(bytes) => {
                    self.stats.applied += 1;
                    self.stats.bytes_reclaimed += bytes;
                }
                Err(err) => {
                    error!("{}: {err:#}", op.path().display());
                    self.stats.failed += 1;
                }
            }
        }
    }
}

/// Cleanup moves run deepest first so children are gone before their parent
/// moves; other classes keep analyzer order.
fn order_for_execution(kind: OpKind, ops: &[Operation]) -> Vec<Operation> {
    let mut ordered: Vec<Operation> = ops.to_vec();
    if matches!(kind, OpKind::PreCleanup | OpKind::PostCleanup) {
        ordered.sort_by(|a, b| {
            let da = a.path().components().count();
            let db = b.path().components().count();
            db.cmp(&da).then_with(|| a.path().cmp(b.path()))
        });
    }
    ordered
}

fn apply(op: &Operation) -> Result<u64> {
    match op {
        Operation::Cleanup { path, move_to, size, .. } => {
            move_entry(path, move_to)?;
            Ok(*size)
        }
        Operation::Duplicate { path, move_to, size, sidecars, .. } => {
            move_entry(path, move_to)?;
            for sidecar in sidecars {
                if let Err(err) = move_entry(&sidecar.path, &sidecar.move_to) {
                    warn!("sidecar {}: {err:#}", sidecar.path.display());
                }
            }
            Ok(*size)
        }
        Operation::Orphan { path, move_to, size } => {
            move_entry(path, move_to)?;
            Ok(*size)
        }
        Operation::Reorganize { path, move_to, .. } => {
            move_entry(path, move_to)?;
            Ok(0)
        }
        Operation::Permissions { path, desired_mode, .. } => {
            fs::set_permissions(path, fs::Permissions::from_mode(*desired_mode))
                .with_context(|| format!("chmod {}", path.display()))?;
            Ok(0)
        }
        Operation::Ownership { path, new_uid, new_gid, .. } => {
            chown(path.as_path(), Some(Uid::from_raw(*new_uid)), Some(Gid::from_raw(*new_gid)))
                .with_context(|| format!("chown {}", path.display()))?;
            Ok(0)
        }
    }
}

/// Rename with fallbacks: copy+unlink across devices, recursive merge when a
/// directory target already exists. Parent directories are created lazily.
pub fn move_entry(src: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    match fs::rename(src, dest) {
        Ok(()) => Ok(()),
        Err(err) if is_cross_device(&err) => {
            copy_then_remove(src, dest)
        }
        Err(err) => {
            let src_is_dir = fs::symlink_metadata(src).map(|m| m.is_dir()).unwrap_or(false);
            if src_is_dir && dest.exists() {
                // a previous run left a directory at the destination; merge
                copy_then_remove(src, dest)
            } else {
                Err(err).with_context(|| {
                    format!("move {} -> {}", src.display(), dest.display())
                })
            }
        }
    }
}

fn copy_then_remove(src: &Path, dest: &Path) -> Result<()> {
    let md = fs::symlink_metadata(src).with_context(|| format!("stat {}", src.display()))?;
    if md.is_dir() {
        copy_dir_recursive(src, dest)?;
        fs::remove_dir_all(src).with_context(|| format!("remove {}", src.display()))?;
    } else {
        fs::copy(src, dest).with_context(|| format!("copy {}", src.display()))?;
        fs::remove_file(src).with_context(|| format!("remove {}", src.display()))?;
    }
    Ok(())
}

fn is_cross_device(err: &io::Error) -> bool {
    // EXDEV is 18 on every unix we care about
    err.raw_os_error() == Some(18) || err.to_string().contains("EXDEV")
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst)?;
    for entry in walkdir::WalkDir::new(src).min_depth(1) {
        let entry = entry?;
        let rel = entry.path().strip_prefix(src).expect("walk stays under src");
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        } else if entry.file_type().is_symlink() {
            if let Ok(link_target) = fs::read_link(entry.path()) {
                std::os::unix::fs::symlink(&link_target, &target).ok();
            }
        }
    }
    Ok(())
}
