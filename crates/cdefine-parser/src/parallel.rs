//! Parallel database builds using rayon
//!
//! Builds the tables of several independent project roots at once, one
//! [`DefineDatabase`] per root, with progress reporting.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use cdefine_core::{Config, Result};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::database::DefineDatabase;

/// Progress callback type
pub type ProgressCallback = Box<dyn Fn(ProgressEvent) + Send + Sync>;

/// Progress event for tracking build progress
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub phase: ProgressPhase,
    pub current: usize,
    pub total: usize,
    pub message: String,
}

/// Build phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressPhase {
    Scanning,
    Building,
    Complete,
}

/// Builds many roots concurrently
#[derive(Default)]
pub struct ParallelBuilder {
    progress_callback: Option<Arc<ProgressCallback>>,
}

impl ParallelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set progress callback
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProgressEvent) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Arc::new(Box::new(callback)));
        self
    }

    /// Build one database per configuration; results keep input order
    pub fn build_all(&self, configs: Vec<Config>) -> Vec<(PathBuf, Result<DefineDatabase>)> {
        let total = configs.len();
        let built = AtomicUsize::new(0);

        self.emit_progress(
            ProgressPhase::Scanning,
            0,
            total,
            format!("Building {} projects...", total),
        );

        let results: Vec<_> = configs
            .into_par_iter()
            .map(|config| {
                let root = config.project_root.clone();
                debug!("Building {:?}", root);
                let result = build_one(config);

                let current = built.fetch_add(1, Ordering::SeqCst) + 1;
                self.emit_progress(
                    ProgressPhase::Building,
                    current,
                    total,
                    format!("Built {}/{} projects", current, total),
                );

                (root, result)
            })
            .collect();

        info!("Built {} projects", total);
        self.emit_progress(ProgressPhase::Complete, total, total, "Build complete");
        results
    }

    /// Build the databases of `roots`, each with its discovered config
    pub fn build_roots(&self, roots: &[PathBuf]) -> Vec<(PathBuf, Result<DefineDatabase>)> {
        let mut configs = Vec::with_capacity(roots.len());
        let mut failed = Vec::new();
        for root in roots {
            match Config::discover(root) {
                Ok(config) => configs.push(config),
                Err(err) => failed.push((root.clone(), Err(err))),
            }
        }

        let mut results = self.build_all(configs);
        results.extend(failed);
        results
    }

    fn emit_progress<S: Into<String>>(
        &self,
        phase: ProgressPhase,
        current: usize,
        total: usize,
        message: S,
    ) {
        if let Some(ref callback) = self.progress_callback {
            callback(ProgressEvent {
                phase,
                current,
                total,
                message: message.into(),
            });
        }
    }
}

fn build_one(config: Config) -> Result<DefineDatabase> {
    let mut db = DefineDatabase::new(config);
    db.load_predefines()?;
    db.build()?;
    Ok(db)
}
