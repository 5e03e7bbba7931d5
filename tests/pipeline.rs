//! End-to-end runs over real temp trees: analyze, execute, rescan.

use custodian::config::{ActionKind, RootConfig};
use custodian::executor::AssumeYes;
use custodian::pipeline::run_root;
use std::fs;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;
use tempfile::TempDir;

fn write(root: &Path, rel: &str, bytes: &[u8]) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, bytes).unwrap();
}

fn config_for(root: &Path, actions: Vec<ActionKind>) -> RootConfig {
    let mut cfg = RootConfig::with_defaults(root.to_path_buf(), root.join("#recycle"));
    cfg.actions = actions;
    cfg
}

#[test]
fn destructive_pass_recycles_cruft_and_duplicates() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();

    fs::create_dir_all(root.join("empty")).unwrap();
    write(root, "x/A.jpg", b"identical jpeg payload");
    write(root, "x/other.txt", b"company for A so it is not an orphan");
    sleep(Duration::from_millis(25));
    write(root, "A.jpg", b"identical jpeg payload");
    write(root, "only/solo.xml", b"<x/>");
    write(root, "a/Thumbs.db", b"cache");
    write(root, "a/photo.txt", b"keeper");

    let cfg = config_for(
        root,
        vec![
            ActionKind::PreCleanup,
            ActionKind::Duplicates,
            ActionKind::Orphans,
            ActionKind::PostCleanup,
        ],
    );
    let mut confirm = AssumeYes;
    let summary = run_root(&cfg, &mut confirm, false).unwrap();

    // pre-cleanup: empty dir and the marked Thumbs.db
    assert!(!root.join("empty").exists());
    assert!(root.join("#recycle/empty").is_dir());
    assert!(!root.join("a/Thumbs.db").exists());
    assert!(root.join("#recycle/a/Thumbs.db").exists());

    // duplicates: the newer copy went, the older stayed
    assert!(!root.join("A.jpg").exists());
    assert_eq!(
        fs::read(root.join("#recycle/A.jpg")).unwrap(),
        b"identical jpeg payload"
    );
    assert!(root.join("x/A.jpg").exists());

    // orphan: the lone sidecar left its folder
    assert!(root.join("#recycle/only/solo.xml").exists());

    // post-cleanup: the emptied folder followed it into the recycle bin
    assert!(!root.join("only").exists());

    // the keepers survived
    assert!(root.join("a/photo.txt").exists());
    assert!(root.join("x/other.txt").exists());

    assert_eq!(summary.stats.failed, 0);
    assert_eq!(summary.post_stats.failed, 0);
    assert!(summary.stats.applied >= 4);
    assert!(summary.post_planned >= 1);
}

#[test]
fn reorganize_applies_once_and_then_settles() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    write(root, "rome/pic-2019-07-04.jpg", b"vacation shot");

    let cfg = config_for(root, vec![ActionKind::Reorganize]);
    let mut confirm = AssumeYes;

    let first = run_root(&cfg, &mut confirm, false).unwrap();
    assert_eq!(first.planned, 1);
    assert_eq!(first.stats.applied, 1);
    assert_eq!(
        fs::read(root.join("2019/07/pic-2019-07-04.jpg")).unwrap(),
        b"vacation shot"
    );
    assert!(!root.join("rome/pic-2019-07-04.jpg").exists());

    let second = run_root(&cfg, &mut confirm, false).unwrap();
    assert_eq!(second.planned, 0, "a reorganized tree must be a fixed point");
}

#[test]
fn dry_run_changes_nothing() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    fs::create_dir_all(root.join("empty")).unwrap();
    write(root, "keep.txt", b"payload");

    let cfg = config_for(root, vec![ActionKind::PreCleanup]);
    let mut confirm = AssumeYes;
    let summary = run_root(&cfg, &mut confirm, true).unwrap();

    assert_eq!(summary.planned, 1);
    assert!(root.join("empty").exists());
    assert!(!root.join("#recycle").exists());
}

#[test]
fn fileset_duplicates_travel_with_their_sidecars() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    let jpg = vec![0x5A; 2048];
    write(root, "a/IMG.jpg", &jpg);
    write(root, "a/IMG.xmp", b"<edit/>");
    write(root, "a/decoy.txt", b"keeps the folders from being orphans");
    sleep(Duration::from_millis(25));
    write(root, "b/IMG.jpg", &jpg);
    write(root, "b/IMG.xmp", b"<edit/>");
    write(root, "b/decoy2.txt", b"keeps the folders from being orphans!");

    let cfg = config_for(root, vec![ActionKind::Duplicates]);
    let mut confirm = AssumeYes;
    let summary = run_root(&cfg, &mut confirm, false).unwrap();

    assert_eq!(summary.stats.failed, 0);
    assert!(!root.join("b/IMG.jpg").exists());
    assert!(!root.join("b/IMG.xmp").exists());
    assert!(root.join("#recycle/b/IMG.jpg").exists());
    assert!(root.join("#recycle/b/IMG.xmp").exists());
    assert!(root.join("a/IMG.jpg").exists());
    assert!(root.join("a/IMG.xmp").exists());
}
