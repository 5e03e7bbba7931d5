use crate::config::RootConfig;
use anyhow::{Context as _, Result};

/// Everything an analyzer needs, threaded explicitly instead of living in
/// globals: the resolved per-root config and the bounded worker pool for
/// independent per-file I/O (hashing, EXIF reads).
pub struct Context {
    pub cfg: RootConfig,
    pub pool: rayon::ThreadPool,
}

impl Context {
    pub fn new(cfg: RootConfig) -> Result<Self> {
        let threads = cfg.concurrency.clamp(1, 10);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .context("build worker pool")?;
        Ok(Self { cfg, pool })
    }
}
