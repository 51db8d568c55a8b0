//! Header Graph Resolver
//!
//! Enumerates the header set of a project and reads it into a
//! [`DefinitionTable`], following `#include` depth-first so that a header's
//! dependencies are defined before its own conditionals are evaluated.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::process::Command;

use cdefine_core::config::ScanConfig;
use cdefine_core::Location;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::directive::Directive;
use super::lines::{LineKind, LineOptions, LineProcessor, LogicalLine};
use super::table::DefinitionTable;

/// Header walk errors
#[derive(Debug, Error)]
pub enum HeaderError {
    #[error("ambiguous include \"{include}\" from {from}: {}", .candidates.join(", "))]
    AmbiguousInclude {
        include: String,
        from: String,
        candidates: Vec<String>,
    },

    #[error("Invalid exclude pattern: {0}")]
    InvalidGlob(#[from] globset::Error),

    #[error("Failed to read {path}: {source}")]
    Read { path: String, source: io::Error },
}

impl From<HeaderError> for cdefine_core::Error {
    fn from(err: HeaderError) -> Self {
        match err {
            HeaderError::AmbiguousInclude {
                include,
                from,
                candidates,
            } => cdefine_core::Error::AmbiguousInclude {
                include,
                from,
                candidates,
            },
            HeaderError::InvalidGlob(e) => cdefine_core::Error::Config(e.to_string()),
            HeaderError::Read { path, source } => cdefine_core::Error::Io(io::Error::new(
                source.kind(),
                format!("{}: {}", path, source),
            )),
        }
    }
}

/// Summary of one build
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildStats {
    /// Headers known to the graph
    pub headers: usize,
    /// Headers actually read
    pub visited: usize,
    /// Unreadable or non-UTF-8 headers
    pub skipped: usize,
    pub defines: usize,
    pub undefs: usize,
    /// `#include` lines that matched no known header
    pub unresolved_includes: usize,
    /// The table came from the cache instead of a walk
    pub cached: bool,
}

/// Sorted header set with a visited set for one walk
#[derive(Debug, Clone)]
pub struct HeaderGraph {
    root: PathBuf,
    headers: Vec<PathBuf>,
    visited: HashSet<usize>,
    options: LineOptions,
}

impl HeaderGraph {
    /// Create a graph over `headers`; the list is sorted and deduplicated
    pub fn new(root: impl Into<PathBuf>, mut headers: Vec<PathBuf>) -> Self {
        headers.sort();
        headers.dedup();
        Self {
            root: root.into(),
            headers,
            visited: HashSet::new(),
            options: LineOptions::default(),
        }
    }

    /// Enumerate the headers below `root`.
    ///
    /// Repositories (`.git` or `.gitlab` present) are listed with
    /// `git ls-files`; otherwise, or if git fails, the tree is walked.
    pub fn discover(root: &Path, scan: &ScanConfig) -> Result<Self, HeaderError> {
        let excludes = build_globset(&scan.exclude_globs)?;

        let files = if scan.use_git && is_repository(root) {
            match git_ls_files(root) {
                Ok(files) => files,
                Err(err) => {
                    warn!("git ls-files failed in {:?}, walking instead: {}", root, err);
                    walk_files(root, scan)
                }
            }
        } else {
            walk_files(root, scan)
        };

        let headers: Vec<PathBuf> = files
            .into_iter()
            .filter(|path| scan.matches_extension(path))
            .filter(|path| {
                let relative = path.strip_prefix(root).unwrap_or(path);
                !excludes.is_match(relative) && !in_excluded_dir(relative, scan)
            })
            .collect();

        debug!("Discovered {} headers under {:?}", headers.len(), root);
        Ok(Self::new(root, headers))
    }

    /// Line options used while reading headers
    pub fn with_options(mut self, options: LineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn headers(&self) -> &[PathBuf] {
        &self.headers
    }

    /// Resolve `#include "include"` written in `from`.
    ///
    /// Candidates are the known headers whose trailing path components
    /// equal the include text. Several candidates are narrowed to those
    /// whose directory prefix contains `from`; if more than one remains
    /// the include is ambiguous.
    pub fn resolve_include(
        &self,
        include: &str,
        from: &Path,
    ) -> Result<Option<&Path>, HeaderError> {
        Ok(self
            .resolve_index(include, from)?
            .map(|idx| self.headers[idx].as_path()))
    }

    fn resolve_index(&self, include: &str, from: &Path) -> Result<Option<usize>, HeaderError> {
        let wanted: PathBuf = Path::new(include)
            .components()
            .filter(|c| matches!(c, Component::Normal(_)))
            .collect();
        let depth = wanted.components().count();
        if depth == 0 {
            return Ok(None);
        }

        let mut candidates: Vec<usize> = (0..self.headers.len())
            .filter(|&idx| self.headers[idx].ends_with(&wanted))
            .collect();

        if candidates.len() > 1 {
            candidates.retain(|&idx| {
                self.headers[idx]
                    .ancestors()
                    .nth(depth)
                    .map_or(false, |prefix| from.starts_with(prefix))
            });
        }

        match candidates.as_slice() {
            [] => Ok(None),
            [idx] => Ok(Some(*idx)),
            _ => Err(HeaderError::AmbiguousInclude {
                include: include.to_string(),
                from: from.display().to_string(),
                candidates: candidates
                    .iter()
                    .map(|&idx| self.headers[idx].display().to_string())
                    .collect(),
            }),
        }
    }

    /// Read every header into `table`.
    ///
    /// Names already in the table when the walk starts are never replaced
    /// or removed. On an ambiguous include the walk stops and the table
    /// keeps what was read so far.
    pub fn build(&mut self, table: &mut DefinitionTable) -> Result<BuildStats, HeaderError> {
        let protected: HashSet<String> = table.names().map(String::from).collect();
        let mut stats = BuildStats {
            headers: self.headers.len(),
            ..BuildStats::default()
        };

        self.visited.clear();
        for idx in 0..self.headers.len() {
            self.visit(idx, table, &protected, &mut stats)?;
        }

        info!(
            "Read {} of {} headers: {} defines in table",
            stats.visited,
            stats.headers,
            table.len()
        );
        Ok(stats)
    }

    fn visit(
        &mut self,
        idx: usize,
        table: &mut DefinitionTable,
        protected: &HashSet<String>,
        stats: &mut BuildStats,
    ) -> Result<(), HeaderError> {
        // Marked before reading so include cycles terminate
        if !self.visited.insert(idx) {
            return Ok(());
        }

        let path = self.headers[idx].clone();
        let content = match read_source(&path) {
            Ok(content) => content,
            Err(err) => {
                warn!("Skipping {:?}: {}", path, err);
                stats.skipped += 1;
                return Ok(());
            }
        };
        stats.visited += 1;

        let mut processor = LineProcessor::new(self.options);
        let mut line_no = 0;
        for raw in content.lines() {
            line_no += 1;
            if let Some(line) = processor.feed(raw, line_no, &*table) {
                self.apply(&line, &path, table, protected, stats)?;
            }
        }
        if let Some(line) = processor.finish(line_no, &*table) {
            self.apply(&line, &path, table, protected, stats)?;
        }
        Ok(())
    }

    fn apply(
        &mut self,
        line: &LogicalLine,
        path: &Path,
        table: &mut DefinitionTable,
        protected: &HashSet<String>,
        stats: &mut BuildStats,
    ) -> Result<(), HeaderError> {
        if !line.active || line.kind != LineKind::Text {
            return Ok(());
        }

        match Directive::parse(&line.text) {
            Some(Directive::Include(include)) => match self.resolve_index(&include, path)? {
                Some(target) => self.visit(target, table, protected, stats)?,
                None => {
                    debug!("Unresolved include {:?} in {:?}", include, path);
                    stats.unresolved_includes += 1;
                }
            },
            Some(Directive::Define(def)) if !protected.contains(&def.name) => {
                let location = Location::spanning(
                    path.display().to_string(),
                    line.start_line as u32,
                    line.line_no as u32,
                );
                table.insert_definition(def.at(location));
                stats.defines += 1;
            }
            Some(Directive::Undef(name)) if !protected.contains(&name) => {
                if table.remove(&name).is_ok() {
                    stats.undefs += 1;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Read the `#define`/`#undef` lines of one file into `table`, without
/// following includes. Returns the number of definitions read.
pub fn read_header(path: &Path, table: &mut DefinitionTable) -> Result<usize, HeaderError> {
    let content = read_source(path).map_err(|source| HeaderError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let options = LineOptions::default().header_guarded(is_header(path));

    let mut processor = LineProcessor::new(options);
    let mut count = 0;
    let mut line_no = 0;
    let mut apply = |line: LogicalLine, table: &mut DefinitionTable| {
        if !line.active || line.kind != LineKind::Text {
            return;
        }
        match Directive::parse(&line.text) {
            Some(Directive::Define(def)) => {
                let location = Location::spanning(
                    path.display().to_string(),
                    line.start_line as u32,
                    line.line_no as u32,
                );
                table.insert_definition(def.at(location));
                count += 1;
            }
            Some(Directive::Undef(name)) => {
                let _ = table.remove(&name);
            }
            _ => {}
        }
    };

    for raw in content.lines() {
        line_no += 1;
        if let Some(line) = processor.feed(raw, line_no, &*table) {
            apply(line, table);
        }
    }
    if let Some(line) = processor.finish(line_no, &*table) {
        apply(line, table);
    }
    Ok(count)
}

/// Read a source file as UTF-8
pub fn read_source(path: &Path) -> io::Result<String> {
    let bytes = fs::read(path)?;
    String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Whether `path` names a header (`.h`)
pub fn is_header(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext == "h")
}

fn is_repository(root: &Path) -> bool {
    root.join(".git").exists() || root.join(".gitlab").exists()
}

fn git_ls_files(root: &Path) -> io::Result<Vec<PathBuf>> {
    let output = Command::new("git").arg("ls-files").current_dir(root).output()?;
    if !output.status.success() {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter(|line| !line.is_empty())
        .map(|line| root.join(line))
        .collect())
}

fn walk_files(root: &Path, scan: &ScanConfig) -> Vec<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || !e.file_type().is_dir()
                || !scan.exclude_dirs.iter().any(|d| e.file_name() == d.as_str())
        })
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().to_path_buf())
        .collect()
}

fn in_excluded_dir(relative: &Path, scan: &ScanConfig) -> bool {
    relative.parent().map_or(false, |dir| {
        dir.components()
            .any(|c| scan.exclude_dirs.iter().any(|d| c.as_os_str() == d.as_str()))
    })
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, HeaderError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdefine_core::Definition;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) -> PathBuf {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    fn graph(root: &Path) -> HeaderGraph {
        HeaderGraph::discover(root, &ScanConfig::default()).unwrap()
    }

    #[test]
    fn test_includes_are_read_first() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write(
            root,
            "a.h",
            "#include \"b.h\"\n#if B == 2\n#define C 1\n#else\n#define C 0\n#endif\n\
             #define A B+1\n",
        );
        write(root, "b.h", "#ifndef B_H\n#define B_H\n#define B 2\n#endif\n");

        let mut table = DefinitionTable::new();
        let stats = graph(root).build(&mut table).unwrap();

        assert_eq!(table.get("C").unwrap().token, "1");
        assert_eq!(table.names().collect::<Vec<_>>(), vec!["B_H", "B", "C", "A"]);
        assert_eq!(stats.visited, 2);
        assert_eq!(stats.defines, 4);

        let location = table.get("A").unwrap().location.clone().unwrap();
        assert!(location.file.ends_with("a.h"));
        assert_eq!(location.line, 7);
    }

    #[test]
    fn test_resolve_by_includer_directory() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write(root, "x/cfg.h", "#define CFG 1\n");
        write(root, "y/cfg.h", "#define CFG 2\n");
        let from = write(root, "x/main.h", "#include \"cfg.h\"\n");

        let graph = graph(root);
        let resolved = graph.resolve_include("cfg.h", &from).unwrap().unwrap();
        assert!(resolved.ends_with("x/cfg.h"));
        assert!(graph.resolve_include("y/cfg.h", &from).unwrap().unwrap().ends_with("y/cfg.h"));
        assert_eq!(graph.resolve_include("missing.h", &from).unwrap(), None);
    }

    #[test]
    fn test_ambiguous_include() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write(root, "cfg.h", "#define CFG 1\n");
        write(root, "sub/cfg.h", "#define CFG 2\n");
        write(root, "sub/main.h", "#define BEFORE 1\n#include \"cfg.h\"\n#define AFTER 1\n");

        let mut table = DefinitionTable::new();
        let err = graph(root).build(&mut table).unwrap_err();
        match err {
            HeaderError::AmbiguousInclude {
                include,
                candidates,
                ..
            } => {
                assert_eq!(include, "cfg.h");
                assert_eq!(candidates.len(), 2);
                assert!(candidates[0].ends_with("cfg.h"));
                assert!(candidates[1].ends_with("sub/cfg.h"));
            }
            other => panic!("unexpected error: {}", other),
        }
        assert!(table.contains("BEFORE"));
        assert!(!table.contains("AFTER"));
    }

    #[test]
    fn test_predefines_are_protected() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write(root, "a.h", "#define MODE 1\n#undef LEVEL\n#ifdef DEBUG\n#define TRACE 1\n#endif\n");

        let mut table: DefinitionTable = vec![
            Definition::object("MODE", "9"),
            Definition::object("LEVEL", "3"),
            Definition::object("DEBUG", "1"),
        ]
        .into();
        graph(root).build(&mut table).unwrap();

        assert_eq!(table.get("MODE").unwrap().token, "9");
        assert_eq!(table.get("LEVEL").unwrap().token, "3");
        assert!(table.contains("TRACE"));
    }

    #[test]
    fn test_circular_includes_terminate() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write(root, "a.h", "#include \"b.h\"\n#define A 1\n");
        write(root, "b.h", "#include \"a.h\"\n#define B 1\n");

        let mut table = DefinitionTable::new();
        let stats = graph(root).build(&mut table).unwrap();
        assert_eq!(stats.visited, 2);
        assert_eq!(table.names().collect::<Vec<_>>(), vec!["B", "A"]);
    }

    #[test]
    fn test_discover_filters_and_sorts() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write(root, "z.h", "");
        write(root, "a/b.h", "");
        write(root, "main.c", "");
        write(root, "build/gen.h", "");
        write(root, "third_party/x.h", "");

        let scan = ScanConfig {
            exclude_globs: vec!["third_party/**".into()],
            ..ScanConfig::default()
        };
        let graph = HeaderGraph::discover(root, &scan).unwrap();
        let names: Vec<_> = graph
            .headers()
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
            .collect();
        assert_eq!(names, vec!["a/b.h", "z.h"]);
    }

    #[test]
    fn test_bad_files_are_skipped() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::write(root.join("bad.h"), [0xff, 0xfe, 0x00]).unwrap();
        write(root, "good.h", "#define OK 1\n");

        let mut table = DefinitionTable::new();
        let stats = graph(root).build(&mut table).unwrap();
        assert_eq!(stats.skipped, 1);
        assert!(table.contains("OK"));
    }

    #[test]
    fn test_read_header_single_file() {
        let temp = TempDir::new().unwrap();
        let path = write(
            temp.path(),
            "one.h",
            "#ifndef ONE_H\n#define ONE_H\n#include \"other.h\"\n\
             #define X 1\n#undef X\n#define Y 2\n#endif\n",
        );

        let mut table: DefinitionTable = vec![Definition::object("ONE_H", "1")].into();
        assert_eq!(read_header(&path, &mut table).unwrap(), 3);
        assert!(!table.contains("X"));
        assert_eq!(table.get("Y").unwrap().token, "2");
    }

    #[test]
    fn test_invalid_glob() {
        let temp = TempDir::new().unwrap();
        let scan = ScanConfig {
            exclude_globs: vec!["[".into()],
            ..ScanConfig::default()
        };
        assert!(matches!(
            HeaderGraph::discover(temp.path(), &scan),
            Err(HeaderError::InvalidGlob(_))
        ));
    }
}
