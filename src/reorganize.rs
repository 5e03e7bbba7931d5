use crate::context::Context;
use crate::date::{extract_date, FoundDate};
use crate::plan::Operation;
use crate::scan::{FileEntry, ScanModel};
use crate::utils::normalize;
use log::warn;
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::PathBuf;
use time::Date;

/// Propose moves into the dated layout, e.g. `/2019/07/pic.jpg` for a photo
/// taken 2019-07-04 under the default `/{year}/{month}/` template.
///
/// Emitting only when the target directory differs from the current one makes
/// the analyzer idempotent: a second run over a reorganized tree is empty.
pub fn analyze(model: &ScanModel, ctx: &Context) -> Vec<Operation> {
    let cfg = &ctx.cfg;
    let files: Vec<&FileEntry> = model
        .files
        .values()
        .filter(|f| !f.ignored && !f.marked_for_delete)
        .collect();

    // EXIF reads dominate, so date extraction runs on the bounded pool
    let dates: Vec<Option<FoundDate>> = ctx.pool.install(|| {
        files
            .par_iter()
            .map(|f| extract_date(f, cfg.date_threshold))
            .collect()
    });

    // targets already taken, by files on disk or by earlier planned moves
    let mut used: HashSet<PathBuf> = model.files.keys().cloned().collect();
    let mut ops = Vec::new();
    for (file, found) in files.iter().zip(dates) {
        let Some(found) = found else { continue };
        let target_dir = normalize(
            &cfg.relative_path
                .join(render_template(&cfg.reorganize_template, found.date)),
        );
        if target_dir == file.dir {
            continue;
        }
        let mut target = target_dir.join(&file.name);
        if used.contains(&target) {
            // same name from two source folders: tag the name with the
            // source folder's leaf unless it is already part of the name
            let leaf = file
                .dir
                .file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            if !leaf.is_empty() && !file.name.to_lowercase().contains(&leaf.to_lowercase()) {
                target = target_dir.join(tagged_name(file, &leaf));
            }
            if used.contains(&target) {
                warn!(
                    "reorganize: target {} already taken, leaving {} in place",
                    target.display(),
                    file.path.display()
                );
                continue;
            }
        }
        used.insert(target.clone());
        ops.push(Operation::Reorganize {
            path: file.path.clone(),
            move_to: target,
            source: found.source,
        });
    }
    ops
}

fn render_template(template: &str, date: Date) -> String {
    let rendered = template
        .replace("{year}", &format!("{:04}", date.year()))
        .replace("{month}", &format!("{:02}", u8::from(date.month())))
        .replace("{day}", &format!("{:02}", date.day()));
    // the template is absolute-looking; make it joinable
    rendered.trim_matches('/').to_string()
}

fn tagged_name(file: &FileEntry, leaf: &str) -> String {
    if file.ext.is_empty() {
        format!("{}_{leaf}", file.name)
    } else {
        format!("{}_{leaf}.{}", file.base, file.ext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RootConfig;
    use crate::scan::scan;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;
    use time::macros::date;

    fn context_for(root: &Path) -> Context {
        let cfg = RootConfig::with_defaults(root.to_path_buf(), root.join("#recycle"));
        Context::new(cfg).unwrap()
    }

    fn write(root: &Path, rel: &str, bytes: &[u8]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, bytes).unwrap();
    }

    #[test]
    fn renders_the_default_template() {
        assert_eq!(render_template("/{year}/{month}/", date!(2019 - 07 - 04)), "2019/07");
        assert_eq!(
            render_template("/{year}/{month}/{day}", date!(2019 - 07 - 04)),
            "2019/07/04"
        );
    }

    #[test]
    fn dated_file_moves_under_the_template() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write(root, "in/pic-2019-07-04.jpg", b"not a real jpeg");

        let ctx = context_for(root);
        let model = scan(&ctx.cfg).unwrap();
        let ops = analyze(&model, &ctx);

        assert_eq!(ops.len(), 1);
        match &ops[0] {
            Operation::Reorganize { path, move_to, .. } => {
                assert_eq!(*path, root.join("in/pic-2019-07-04.jpg"));
                assert_eq!(*move_to, root.join("2019/07/pic-2019-07-04.jpg"));
            }
            other => panic!("unexpected op {other:?}"),
        }
    }

    #[test]
    fn already_placed_file_is_left_alone() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write(root, "2019/07/pic-2019-07-04.jpg", b"payload");

        let ctx = context_for(root);
        let model = scan(&ctx.cfg).unwrap();
        let ops = analyze(&model, &ctx);
        assert!(ops.is_empty(), "reorganize must be idempotent: {ops:?}");
    }

    #[test]
    fn colliding_names_get_the_source_leaf_appended() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write(root, "rome/pic-2019-07-04.jpg", b"from rome");
        write(root, "oslo/pic-2019-07-04.jpg", b"from oslo");

        let ctx = context_for(root);
        let model = scan(&ctx.cfg).unwrap();
        let ops = analyze(&model, &ctx);

        assert_eq!(ops.len(), 2);
        let targets: Vec<&Path> = ops
            .iter()
            .map(|op| match op {
                Operation::Reorganize { move_to, .. } => move_to.as_path(),
                other => panic!("unexpected op {other:?}"),
            })
            .collect();
        assert!(targets.contains(&root.join("2019/07/pic-2019-07-04.jpg").as_path()));
        let tagged: Vec<_> = targets
            .iter()
            .filter(|t| {
                let name = t.file_name().unwrap().to_string_lossy();
                name == "pic-2019-07-04_rome.jpg" || name == "pic-2019-07-04_oslo.jpg"
            })
            .collect();
        assert_eq!(tagged.len(), 1, "exactly one side gets the folder tag: {targets:?}");
    }

    #[test]
    fn undatable_files_are_skipped() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write(root, "in/notes.txt", b"no dates anywhere");
        // force the mtime fallback below the threshold
        let mut cfg = RootConfig::with_defaults(root.to_path_buf(), root.join("#recycle"));
        cfg.date_threshold = date!(2999 - 01 - 01);
        let ctx = Context::new(cfg).unwrap();

        let model = scan(&ctx.cfg).unwrap();
        assert!(analyze(&model, &ctx).is_empty());
    }

    #[test]
    fn relative_path_overrides_the_target_base() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write(root, "in/pic-2019-07-04.jpg", b"payload");
        fs::create_dir_all(root.join("sorted")).unwrap();

        let mut cfg = RootConfig::with_defaults(root.to_path_buf(), root.join("#recycle"));
        cfg.relative_path = root.join("sorted");
        let ctx = Context::new(cfg).unwrap();

        let model = scan(&ctx.cfg).unwrap();
        let ops = analyze(&model, &ctx);
        match &ops[0] {
            Operation::Reorganize { move_to, .. } => {
                assert_eq!(*move_to, root.join("sorted/2019/07/pic-2019-07-04.jpg"));
            }
            other => panic!("unexpected op {other:?}"),
        }
    }
}
