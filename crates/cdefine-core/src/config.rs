//! Configuration types

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name looked up by [`Config::discover`]
pub const CONFIG_FILE_NAME: &str = "cdefine.yaml";

/// Directory holding compiler flag files, relative to the project root
pub const DEFAULT_PREDEFINE_DIR: &str = ".define_parser_predefine";

/// cdefine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Project root path
    pub project_root: PathBuf,

    /// Header enumeration
    pub scan: ScanConfig,

    /// Line preprocessing
    pub preprocess: PreprocessConfig,

    /// Directory with compiler flag files (relative to the project root)
    pub predefine_dir: PathBuf,

    /// Selected flag file inside `predefine_dir`
    pub flags_file: Option<String>,

    /// Extra predefines as `NAME` or `NAME=VALUE`
    pub defines: Vec<String>,

    /// Where built tables are cached
    pub cache_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("."),
            scan: ScanConfig::default(),
            preprocess: PreprocessConfig::default(),
            predefine_dir: PathBuf::from(DEFAULT_PREDEFINE_DIR),
            flags_file: None,
            defines: vec![],
            cache_dir: None,
        }
    }
}

impl Config {
    /// Create a default configuration for a project root
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: root.into(),
            ..Self::default()
        }
    }

    /// Load a configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `<root>/cdefine.yaml` if present, defaults otherwise.
    ///
    /// The root always wins over a `project_root` written in the file.
    pub fn discover(root: &Path) -> Result<Self> {
        let path = root.join(CONFIG_FILE_NAME);
        let mut config = if path.is_file() {
            Self::load(&path)?
        } else {
            Self::default()
        };
        config.project_root = root.to_path_buf();
        Ok(config)
    }

    /// Absolute path of the predefine directory
    pub fn predefine_path(&self) -> PathBuf {
        self.project_root.join(&self.predefine_dir)
    }

    /// Absolute path of the selected flag file, if any
    pub fn flags_path(&self) -> Option<PathBuf> {
        self.flags_file
            .as_ref()
            .map(|name| self.predefine_path().join(name))
    }

    fn validate(&self) -> Result<()> {
        if self.scan.extensions.is_empty() {
            return Err(Error::Config("scan.extensions must not be empty".into()));
        }
        if let Some(bad) = self.defines.iter().find(|d| d.trim().is_empty()) {
            return Err(Error::Config(format!("invalid define {:?}", bad)));
        }
        Ok(())
    }
}

/// Header enumeration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Extensions of the files that make up the header set
    pub extensions: Vec<String>,

    /// Directory names never descended into
    pub exclude_dirs: Vec<String>,

    /// Glob patterns (relative to the root) to skip
    pub exclude_globs: Vec<String>,

    /// Prefer `git ls-files` when the root is a repository
    pub use_git: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            extensions: vec!["h".into()],
            exclude_dirs: vec![".git".into(), "build".into(), "node_modules".into()],
            exclude_globs: vec![],
            use_git: true,
        }
    }
}

impl ScanConfig {
    /// Check a file name against the configured extensions
    pub fn matches_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.extensions.iter().any(|e| e.trim_start_matches('.') == ext))
            .unwrap_or(false)
    }
}

/// Line preprocessing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Track `#if` nesting; when off every line is active
    pub evaluate_conditionals: bool,

    /// Extensions for which inactive-line reports are produced
    pub highlight_extensions: Vec<String>,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            evaluate_conditionals: true,
            highlight_extensions: vec!["c".into(), "h".into(), "cpp".into()],
        }
    }
}

impl PreprocessConfig {
    /// Whether inactive-line reports apply to this file
    pub fn highlights(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                self.highlight_extensions
                    .iter()
                    .any(|e| e.trim_start_matches('.') == ext)
            })
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.scan.extensions, vec!["h".to_string()]);
        assert!(config.preprocess.evaluate_conditionals);
        assert!(config.scan.matches_extension(Path::new("inc/a.h")));
        assert!(!config.scan.matches_extension(Path::new("src/a.c")));
        assert!(config.preprocess.highlights(Path::new("src/a.c")));
    }

    #[test]
    fn test_load_yaml() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &path,
            "scan:\n  extensions: [h, hpp]\n  use_git: false\n\
             defines:\n  - FEATURE=1\nflags_file: board.txt\n",
        )
        .unwrap();

        let config = Config::discover(temp.path()).unwrap();
        assert_eq!(config.project_root, temp.path());
        assert_eq!(config.scan.extensions, vec!["h".to_string(), "hpp".to_string()]);
        assert!(!config.scan.use_git);
        assert_eq!(config.defines, vec!["FEATURE=1".to_string()]);
        assert_eq!(
            config.flags_path(),
            Some(temp.path().join(DEFAULT_PREDEFINE_DIR).join("board.txt"))
        );
    }

    #[test]
    fn test_invalid_yaml_config() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "scan:\n  extensions: []\n").unwrap();
        assert!(matches!(Config::load(&path), Err(Error::Config(_))));
    }
}
