use crate::context::Context;
use crate::plan::{Operation, Sidecar};
use crate::scan::{DirEntry, FileEntry, ScanModel};
use crate::utils::rebase;
use log::{debug, warn};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

type Digest = [u8; 32];

/// Two-stage duplicate search: cheap grouping first (directory shape keys,
/// file sizes), content hashing only within surviving groups.
pub fn analyze(model: &ScanModel, ctx: &Context) -> Vec<Operation> {
    let index = TreeIndex::build(model);
    let mut hashes = ChunkHashes::default();
    let mut ops = Vec::new();

    let dup_dirs = directory_stage(model, ctx, &index, &mut hashes, &mut ops);
    file_stage(model, ctx, &index, &mut hashes, &dup_dirs, &mut ops);
    ops
}

/// Anything minimizing the age/name/path key is the copy we keep.
pub trait OriginalCandidate {
    fn age_ms(&self) -> i64;
    fn entry_name(&self) -> &str;
    fn entry_path(&self) -> &Path;
}

impl OriginalCandidate for FileEntry {
    fn age_ms(&self) -> i64 {
        self.stat.age_ms()
    }
    fn entry_name(&self) -> &str {
        &self.name
    }
    fn entry_path(&self) -> &Path {
        &self.path
    }
}

impl OriginalCandidate for DirEntry {
    fn age_ms(&self) -> i64 {
        self.stat.age_ms()
    }
    fn entry_name(&self) -> &str {
        self.path.file_name().and_then(|n| n.to_str()).unwrap_or("")
    }
    fn entry_path(&self) -> &Path {
        &self.path
    }
}

/// Oldest wins; ties go to the shortest name, then the lexicographically
/// smallest path. Stable under permutation of the input.
pub fn determine_original<'a, T: OriginalCandidate>(items: &[&'a T]) -> Option<&'a T> {
    items.iter().copied().min_by(|a, b| {
        a.age_ms()
            .cmp(&b.age_ms())
            .then_with(|| a.entry_name().len().cmp(&b.entry_name().len()))
            .then_with(|| a.entry_path().cmp(b.entry_path()))
    })
}

/// Per-directory child listings, sorted by name for stable hashing.
struct TreeIndex<'a> {
    files_by_dir: HashMap<&'a Path, Vec<&'a FileEntry>>,
    dirs_by_dir: HashMap<&'a Path, Vec<&'a DirEntry>>,
}

impl<'a> TreeIndex<'a> {
    fn build(model: &'a ScanModel) -> Self {
        let mut files_by_dir: HashMap<&Path, Vec<&FileEntry>> = HashMap::new();
        for file in model.files.values() {
            files_by_dir.entry(file.dir.as_path()).or_default().push(file);
        }
        for children in files_by_dir.values_mut() {
            children.sort_by(|a, b| a.name.cmp(&b.name));
        }
        let mut dirs_by_dir: HashMap<&Path, Vec<&DirEntry>> = HashMap::new();
        for dir in model.directories.values() {
            if dir.depth == 0 {
                continue;
            }
            dirs_by_dir.entry(dir.dir.as_path()).or_default().push(dir);
        }
        for children in dirs_by_dir.values_mut() {
            children.sort_by(|a, b| a.path.cmp(&b.path));
        }
        Self { files_by_dir, dirs_by_dir }
    }

    fn files_under(&self, dir: &Path, out: &mut Vec<&'a FileEntry>) {
        if let Some(files) = self.files_by_dir.get(dir) {
            out.extend(files.iter().copied());
        }
        if let Some(subs) = self.dirs_by_dir.get(dir) {
            for sub in subs {
                self.files_under(&sub.path, out);
            }
        }
    }
}

/// Chunk hashes (first `hash_byte_limit` bytes), computed once per path.
/// `None` marks a file that could not be read; it never matches anything.
#[derive(Default)]
struct ChunkHashes {
    map: HashMap<PathBuf, Option<Digest>>,
}

impl ChunkHashes {
    fn compute_all(&mut self, ctx: &Context, files: &[&FileEntry]) {
        let todo: Vec<&FileEntry> = files
            .iter()
            .copied()
            .filter(|f| !self.map.contains_key(&f.path))
            .collect();
        if todo.is_empty() {
            return;
        }
        let limit = ctx.cfg.hash_byte_limit;
        let hashed_bytes = AtomicU64::new(0);
        let results: Vec<(PathBuf, Option<Digest>)> = ctx.pool.install(|| {
            todo.par_iter()
                .map(|f| {
                    let digest = chunk_hash(&f.path, limit);
                    if digest.is_none() {
                        warn!("cannot hash {}, excluded from duplicate search", f.path.display());
                    } else {
                        hashed_bytes.fetch_add(f.stat.size.min(limit), Ordering::Relaxed);
                    }
                    (f.path.clone(), digest)
                })
                .collect()
        });
        debug!("hashed {} files, {} bytes", todo.len(), hashed_bytes.load(Ordering::Relaxed));
        self.map.extend(results);
    }

    fn get(&self, path: &Path) -> Option<Digest> {
        self.map.get(path).copied().flatten()
    }
}

fn chunk_hash(path: &Path, limit: u64) -> Option<Digest> {
    let file = File::open(path).ok()?;
    let mut hasher = blake3::Hasher::new();
    let mut reader = file.take(limit);
    let mut buf = [0u8; 16384];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                hasher.update(&buf[..n]);
            }
            Err(_) => return None,
        }
    }
    Some(*hasher.finalize().as_bytes())
}

fn under_any(path: &Path, set: &HashSet<PathBuf>) -> bool {
    path.ancestors().any(|p| set.contains(p))
}

type ShapeKey = (u64, u64, usize, u64, u64);

fn shape_key(dir: &DirEntry) -> ShapeKey {
    (dir.intrinsic_size, dir.total_size, dir.file_count, dir.stat.nlink, dir.stat.size)
}

/// Group directories by shape, hash the survivors recursively, and emit a
/// move for every member of a matching set except the original.
fn directory_stage(
    model: &ScanModel,
    ctx: &Context,
    index: &TreeIndex<'_>,
    hashes: &mut ChunkHashes,
    ops: &mut Vec<Operation>,
) -> HashSet<PathBuf> {
    let mut groups: HashMap<ShapeKey, Vec<&DirEntry>> = HashMap::new();
    for dir in model.directories.values() {
        if dir.depth == 0 {
            continue;
        }
        groups.entry(shape_key(dir)).or_default().push(dir);
    }
    let mut group_list: Vec<Vec<&DirEntry>> =
        groups.into_values().filter(|g| g.len() > 1).collect();
    // shallow groups first, so a duplicated parent claims before its children
    group_list.sort_by_key(|g| {
        (g.iter().map(|d| d.depth).min().unwrap_or(0), g[0].path.clone())
    });

    // every file below a surviving group member feeds its directory hash
    let mut wanted: Vec<&FileEntry> = Vec::new();
    for group in &group_list {
        for dir in group {
            index.files_under(&dir.path, &mut wanted);
        }
    }
    hashes.compute_all(ctx, &wanted);

    let mut dir_hash_cache: HashMap<PathBuf, Option<Digest>> = HashMap::new();
    let mut dup_dirs: HashSet<PathBuf> = HashSet::new();
    for group in group_list {
        let mut buckets: HashMap<Digest, Vec<&DirEntry>> = HashMap::new();
        for dir in group {
            if let Some(digest) = dir_hash(&dir.path, index, hashes, &mut dir_hash_cache) {
                buckets.entry(digest).or_default().push(dir);
            }
        }
        let mut bucket_list: Vec<Vec<&DirEntry>> =
            buckets.into_values().filter(|b| b.len() > 1).collect();
        bucket_list.sort_by(|a, b| a[0].path.cmp(&b[0].path));

        for bucket in bucket_list {
            let bucket: Vec<&DirEntry> = bucket
                .into_iter()
                .filter(|d| !under_any(&d.path, &dup_dirs))
                .collect();
            if bucket.len() < 2 {
                continue;
            }
            let Some(original) = determine_original(&bucket) else { continue };
            for dir in &bucket {
                if dir.path == original.path {
                    continue;
                }
                debug!("duplicate directory {} of {}", dir.path.display(), original.path.display());
                dup_dirs.insert(dir.path.clone());
                ops.push(Operation::Duplicate {
                    path: dir.path.clone(),
                    move_to: rebase(&ctx.cfg.recycle_bin_path, &dir.path),
                    original: original.path.clone(),
                    size: dir.total_size,
                    sidecars: Vec::new(),
                });
            }
        }
    }
    dup_dirs
}

/// Running digest over the chunk hash of each direct child file (sorted by
/// name), then each subdirectory's hash. An unreadable file anywhere below
/// makes the whole directory unhashable.
fn dir_hash(
    dir: &Path,
    index: &TreeIndex<'_>,
    chunk: &ChunkHashes,
    cache: &mut HashMap<PathBuf, Option<Digest>>,
) -> Option<Digest> {
    if let Some(cached) = cache.get(dir) {
        return *cached;
    }
    let mut hasher = blake3::Hasher::new();
    let mut ok = true;
    if let Some(files) = index.files_by_dir.get(dir) {
        for file in files {
            match chunk.get(&file.path) {
                Some(digest) => {
                    hasher.update(&digest);
                }
                None => {
                    ok = false;
                    break;
                }
            }
        }
    }
    if ok {
        if let Some(subs) = index.dirs_by_dir.get(dir) {
            for sub in subs {
                match dir_hash(&sub.path, index, chunk, cache) {
                    Some(digest) => {
                        hasher.update(&digest);
                    }
                    None => {
                        ok = false;
                        break;
                    }
                }
            }
        }
    }
    let result = ok.then(|| *hasher.finalize().as_bytes());
    cache.insert(dir.to_path_buf(), result);
    result
}

/// A master file and the similarly-named companions that travel with it.
#[derive(Debug)]
struct Fileset {
    master: PathBuf,
    /// Sorted by lower-cased name for a stable member order.
    sidecars: Vec<PathBuf>,
}

impl Fileset {
    fn members(&self) -> impl Iterator<Item = &PathBuf> {
        std::iter::once(&self.master).chain(self.sidecars.iter())
    }
}

struct FilesetIndex {
    by_master: HashMap<PathBuf, Fileset>,
}

impl FilesetIndex {
    /// Sidecar rule: same directory, base name starts with the master's base
    /// followed by a non-alphanumeric character or nothing, case-insensitive.
    /// The longest matching master base wins. Master-to-master matches need
    /// the non-alphanumeric boundary, so `IMG_1.jpg`/`IMG_1.mp4` stay apart
    /// while `IMG_1-thumb.jpg` still joins `IMG_1.jpg`.
    fn build(index: &TreeIndex<'_>, master_exts: &[String]) -> Self {
        let mut by_master: HashMap<PathBuf, Fileset> = HashMap::new();
        for files in index.files_by_dir.values() {
            let masters: Vec<&&FileEntry> = files
                .iter()
                .filter(|f| !f.ignored && master_exts.contains(&f.ext))
                .collect();
            if masters.is_empty() {
                continue;
            }
            for file in files.iter() {
                if file.ignored {
                    continue;
                }
                let file_is_master = master_exts.contains(&file.ext);
                let best = masters
                    .iter()
                    .filter(|m| m.path != file.path)
                    .filter(|m| sidecar_of(file, m, file_is_master))
                    .max_by_key(|m| (m.base.len(), std::cmp::Reverse(m.name.clone())));
                if let Some(master) = best {
                    by_master
                        .entry(master.path.clone())
                        .or_insert_with(|| Fileset {
                            master: master.path.clone(),
                            sidecars: Vec::new(),
                        })
                        .sidecars
                        .push(file.path.clone());
                }
            }
        }
        for set in by_master.values_mut() {
            set.sidecars.sort_by_key(|p| {
                p.file_name().map(|n| n.to_string_lossy().to_lowercase()).unwrap_or_default()
            });
        }
        Self { by_master }
    }

    fn set_for_master(&self, path: &Path) -> Option<&Fileset> {
        self.by_master.get(path)
    }
}

fn sidecar_of(file: &FileEntry, master: &FileEntry, file_is_master: bool) -> bool {
    let file_base = file.base.to_lowercase();
    let master_base = master.base.to_lowercase();
    let Some(rest) = file_base.strip_prefix(&master_base) else {
        return false;
    };
    match rest.chars().next() {
        // exact base match, e.g. IMG_001.xmp next to IMG_001.jpg; two
        // masters with the same base are not each other's sidecars
        None => !file_is_master,
        Some(c) => !c.is_alphanumeric(),
    }
}

/// Size groups -> chunk-hash buckets -> operations, fileset-aware.
fn file_stage(
    model: &ScanModel,
    ctx: &Context,
    index: &TreeIndex<'_>,
    hashes: &mut ChunkHashes,
    dup_dirs: &HashSet<PathBuf>,
    ops: &mut Vec<Operation>,
) {
    let filesets = FilesetIndex::build(index, &ctx.cfg.dupe_set_extensions);

    let mut groups: HashMap<u64, Vec<&FileEntry>> = HashMap::new();
    for file in model.files.values() {
        if file.ignored || file.marked_for_delete {
            continue;
        }
        // files inside a duplicated directory travel with it
        if under_any(&file.path, dup_dirs) {
            continue;
        }
        groups.entry(file.stat.size).or_default().push(file);
    }
    let mut group_list: Vec<(u64, Vec<&FileEntry>)> =
        groups.into_iter().filter(|(_, g)| g.len() > 1).collect();
    // largest first: masters claim their smaller sidecars before the
    // sidecars' own size groups come up
    group_list.sort_by(|a, b| b.0.cmp(&a.0));

    // hash group members plus every fileset member they drag along
    let mut wanted: Vec<&FileEntry> = Vec::new();
    for (_, group) in &group_list {
        for file in group {
            wanted.push(*file);
            if let Some(set) = filesets.set_for_master(&file.path) {
                for member in set.members() {
                    if let Some(entry) = model.files.get(member) {
                        wanted.push(entry);
                    }
                }
            }
        }
    }
    hashes.compute_all(ctx, &wanted);

    let mut claimed_sidecars: HashSet<PathBuf> = HashSet::new();
    for (_, group) in group_list {
        let mut buckets: HashMap<Digest, Vec<&FileEntry>> = HashMap::new();
        for file in &group {
            if let Some(digest) = hashes.get(&file.path) {
                buckets.entry(digest).or_default().push(*file);
            }
        }
        let mut bucket_list: Vec<Vec<&FileEntry>> =
            buckets.into_values().filter(|b| b.len() > 1).collect();
        bucket_list.sort_by(|a, b| a[0].path.cmp(&b[0].path));

        for bucket in bucket_list {
            let bucket: Vec<&FileEntry> = bucket
                .into_iter()
                .filter(|f| !claimed_sidecars.contains(&f.path))
                .collect();
            if bucket.len() < 2 {
                continue;
            }
            let Some(mut original) = determine_original(&bucket) else { continue };
            // a lone file must not beat a fileset: the reference copy should
            // keep its sidecars
            if filesets.set_for_master(&original.path).is_none() {
                let masters: Vec<&FileEntry> = bucket
                    .iter()
                    .copied()
                    .filter(|f| filesets.set_for_master(&f.path).is_some())
                    .collect();
                if let Some(promoted) = determine_original(&masters) {
                    original = promoted;
                }
            }
            let original_set = filesets.set_for_master(&original.path);

            for file in &bucket {
                if file.path == original.path || claimed_sidecars.contains(&file.path) {
                    continue;
                }
                let mut sidecars = Vec::new();
                let mut size = file.stat.size;
                if let (Some(dup_set), Some(orig_set)) =
                    (filesets.set_for_master(&file.path), original_set)
                {
                    let matching = combined_hash(dup_set, hashes).is_some()
                        && combined_hash(dup_set, hashes) == combined_hash(orig_set, hashes);
                    if matching {
                        for member in &dup_set.sidecars {
                            let member_hash = hashes.get(member);
                            let mapped = orig_set
                                .members()
                                .find(|m| member_hash.is_some() && hashes.get(m) == member_hash)
                                .cloned();
                            if let Some(entry) = model.files.get(member) {
                                size += entry.stat.size;
                            }
                            sidecars.push(Sidecar {
                                path: member.clone(),
                                move_to: rebase(&ctx.cfg.recycle_bin_path, member),
                                original: mapped,
                            });
                            claimed_sidecars.insert(member.clone());
                        }
                    }
                }
                debug!("duplicate {} of {}", file.path.display(), original.path.display());
                ops.push(Operation::Duplicate {
                    path: file.path.clone(),
                    move_to: rebase(&ctx.cfg.recycle_bin_path, &file.path),
                    original: original.path.clone(),
                    size,
                    sidecars,
                });
            }
        }
    }
}

/// Digest over the members' chunk hashes in member order; `None` when any
/// member is unhashable.
fn combined_hash(set: &Fileset, hashes: &ChunkHashes) -> Option<Digest> {
    let mut hasher = blake3::Hasher::new();
    for member in set.members() {
        hasher.update(&hashes.get(member)?);
    }
    Some(*hasher.finalize().as_bytes())
}
