use crate::cleanup;
use crate::config::{ActionKind, RootConfig};
use crate::context::Context;
use crate::duplicates;
use crate::executor::{Confirm, ExecStats, Executor};
use crate::orphans;
use crate::ownership;
use crate::permissions;
use crate::plan::{Arbiter, OpKind, Plan};
use crate::reorganize;
use crate::scan;
use crate::utils::readable_display;
use anyhow::Result;
use log::info;

#[derive(Debug, Default)]
pub struct RootSummary {
    pub planned: usize,
    pub stats: ExecStats,
    pub post_planned: usize,
    pub post_stats: ExecStats,
}

/// The full pass over one root: scan, analyze in fixed order with the
/// arbiter deciding ownership of contested paths, confirm and execute, then
/// rescan for the post-cleanup of whatever the moves emptied out.
pub fn run_root(cfg: &RootConfig, confirm: &mut dyn Confirm, dry_run: bool) -> Result<RootSummary> {
    // resolve account names up front; a bad name fails the root before
    // anything is scanned
    let owner = if cfg.action_enabled(ActionKind::Ownership) {
        Some(ownership::resolve_owner(cfg)?)
    } else {
        None
    };
    let ctx = Context::new(cfg.clone())?;

    info!("scanning {}", readable_display(&cfg.scan_path));
    let model = scan::scan(cfg)?;
    info!(
        "scanned {} files ({} ignored) in {} directories, {} bytes",
        model.counters.files,
        model.counters.ignored,
        model.counters.directories,
        model.counters.bytes
    );

    let mut arbiter = Arbiter::default();
    let mut plan = Plan::default();
    if cfg.action_enabled(ActionKind::PreCleanup) {
        let report = cleanup::analyze(&model, cfg);
        info!("pre-cleanup: {} bytes reclaimable", report.size);
        plan.pre_cleanup = arbiter.claim_destructive(report.operations());
    }
    if cfg.action_enabled(ActionKind::Duplicates) {
        plan.duplicates = arbiter.claim_destructive(duplicates::analyze(&model, &ctx));
    }
    if cfg.action_enabled(ActionKind::Orphans) {
        plan.orphans = arbiter.claim_destructive(orphans::analyze(&model, cfg));
    }
    if cfg.action_enabled(ActionKind::Reorganize) {
        plan.reorganize = arbiter.retain_unclaimed(reorganize::analyze(&model, &ctx));
    }
    if cfg.action_enabled(ActionKind::Permissions) {
        plan.permissions = arbiter.retain_unclaimed(permissions::analyze(&model, cfg));
    }
    if let Some(owner) = &owner {
        plan.ownership = arbiter.retain_unclaimed(ownership::analyze(&model, owner));
    }

    let mut summary = RootSummary { planned: plan.total_ops(), ..RootSummary::default() };

    if dry_run {
        print_plan(&plan);
        println!("# DRY-RUN: nothing changed; post-cleanup needs an executed plan");
        return Ok(summary);
    }

    let mut executor = Executor::new(confirm);
    executor.run_plan(&plan);
    summary.stats = executor.stats;

    if cfg.action_enabled(ActionKind::PostCleanup) {
        // the tree changed under the executed plan; only a fresh scan tells
        // which directories are empty now
        let model = scan::scan(cfg)?;
        let report = cleanup::analyze(&model, cfg);
        info!("post-cleanup: {} bytes reclaimable", report.size);
        let ops = Arbiter::default().claim_destructive(report.operations());
        summary.post_planned = ops.len();
        let mut post_executor = Executor::new(confirm);
        post_executor.run_class(OpKind::PostCleanup, &ops);
        summary.post_stats = post_executor.stats;
    }

    Ok(summary)
}

fn print_plan(plan: &Plan) {
    for (kind, ops) in plan.classes() {
        if ops.is_empty() {
            continue;
        }
        println!("# {kind}: {} operation(s)", ops.len());
        for op in ops {
            println!("  {}", op.describe());
        }
    }
    if plan.is_empty() {
        println!("# nothing to do");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::AssumeYes;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn config_for(root: &Path, actions: Vec<ActionKind>) -> RootConfig {
        let mut cfg = RootConfig::with_defaults(root.to_path_buf(), root.join("#recycle"));
        cfg.actions = actions;
        cfg
    }

    #[test]
    fn destructive_claim_beats_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("x")).unwrap();
        fs::write(root.join("x/dup.jpg"), b"same bytes").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(25));
        fs::write(root.join("dup.jpg"), b"same bytes").unwrap();
        fs::set_permissions(root.join("dup.jpg"), fs::Permissions::from_mode(0o600)).unwrap();

        let cfg = config_for(
            root,
            vec![ActionKind::Duplicates, ActionKind::Permissions],
        );
        let mut confirm = AssumeYes;
        let summary = run_root(&cfg, &mut confirm, true).unwrap();
        // the duplicate claim must swallow the permissions op for dup.jpg:
        // one duplicate move, plus permission fixes for everything else the
        // umask got wrong - but never for dup.jpg itself
        assert!(summary.planned >= 1);

        // non-dry run actually moves the duplicate and leaves its mode alone
        let summary = run_root(&cfg, &mut confirm, false).unwrap();
        assert!(summary.stats.applied >= 1);
        assert!(root.join("#recycle/dup.jpg").exists());
        let mode = fs::metadata(root.join("#recycle/dup.jpg")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600, "claimed path must not be chmodded");
    }

    #[test]
    fn disabled_actions_do_not_run() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("empty")).unwrap();
        fs::write(root.join("keep.txt"), b"payload").unwrap();

        let cfg = config_for(root, vec![ActionKind::Orphans]);
        let mut confirm = AssumeYes;
        let summary = run_root(&cfg, &mut confirm, false).unwrap();
        assert_eq!(summary.planned, 0);
        assert!(root.join("empty").exists(), "pre-cleanup was disabled");
    }
}
