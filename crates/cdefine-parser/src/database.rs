//! Define Database
//!
//! Owns the macro table of one project root and answers every query a
//! host asks of it: expansion, evaluation, per-file line activity and
//! per-file define listings.

use std::path::Path;

use cdefine_core::{Config, Definition, Location, Result};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tracing::{debug, info};

use crate::preprocessor::cache::{fingerprint, TableCache};
use crate::preprocessor::eval::try_eval;
use crate::preprocessor::flags::{self, MacroDefinition};
use crate::preprocessor::headers::{is_header, read_source};
use crate::preprocessor::{
    classify_lines, read_lines, BuildStats, DefinitionTable, Directive, Expander, HeaderGraph,
    LineActivity, LineKind, LineOptions, ScopedDefines, UndefinedPolicy,
};

static DECIMAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([0-9]+)\b").expect("valid decimal regex"));

/// Macro database of one project root
#[derive(Debug, Clone)]
pub struct DefineDatabase {
    config: Config,
    /// Names inserted before the build; the header walk never touches them
    predefines: DefinitionTable,
    table: DefinitionTable,
}

impl DefineDatabase {
    /// Create an empty database
    pub fn new(config: Config) -> Self {
        Self {
            config,
            predefines: DefinitionTable::new(),
            table: DefinitionTable::new(),
        }
    }

    /// Create a database for `root`, reading `cdefine.yaml` if present
    pub fn open(root: &Path) -> Result<Self> {
        Ok(Self::new(Config::discover(root)?))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn table(&self) -> &DefinitionTable {
        &self.table
    }

    /// Add a predefine; it survives rebuilds and wins over headers
    pub fn insert_define(&mut self, name: &str, params: Option<Vec<String>>, token: &str) {
        self.predefines.insert(name, params.clone(), token);
        self.table.insert(name, params, token);
    }

    pub fn predefine(&mut self, def: MacroDefinition) {
        let def = Definition::from(def);
        self.predefines.insert_definition(def.clone());
        self.table.insert_definition(def);
    }

    /// Insert the configured `defines` and the selected flags file.
    ///
    /// Returns the number of predefines added.
    pub fn load_predefines(&mut self) -> Result<usize> {
        let mut defines = self
            .config
            .defines
            .iter()
            .map(|spec| MacroDefinition::parse(spec))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        if let Some(path) = self.config.flags_path() {
            defines.extend(flags::from_file(&path)?);
        }

        let count = defines.len();
        for def in defines {
            debug!("Predefine {}", def.to_flag());
            self.predefine(def);
        }
        Ok(count)
    }

    /// Flag files available in the predefine directory
    pub fn flag_files(&self) -> Result<Vec<String>> {
        Ok(flags::list_flag_files(&self.config.predefine_path())?)
    }

    /// Rebuild the table from the project's headers.
    ///
    /// The table is seeded with the predefines. With a `cache_dir`
    /// configured an unchanged project is loaded from the cache. On error
    /// the table keeps what was read before the failure.
    pub fn build(&mut self) -> Result<BuildStats> {
        let options = self.line_options(false, false);
        let mut graph = HeaderGraph::discover(&self.config.project_root, &self.config.scan)?
            .with_options(options);

        let mut cache = match &self.config.cache_dir {
            Some(dir) => TableCache::new(dir.clone())?,
            None => TableCache::disabled(),
        };
        let key = fingerprint(&self.predefines, graph.headers(), &options);

        if let Some(table) = cache.get(graph.root(), key) {
            info!("Loaded {} defines for {:?} from cache", table.len(), graph.root());
            self.table = table;
            return Ok(BuildStats {
                headers: graph.headers().len(),
                cached: true,
                ..BuildStats::default()
            });
        }

        let mut table = self.predefines.clone();
        let result = graph.build(&mut table);
        self.table = table;
        let stats = result?;

        cache.put(graph.root(), key, &self.table)?;
        Ok(stats)
    }

    /// Fully expand `text`
    pub fn expand(&self, text: &str, policy: UndefinedPolicy) -> Result<String> {
        Ok(Expander::new(&self.table, policy).expand(text)?)
    }

    /// Expand `text`, keeping undefined names, and evaluate the result
    pub fn evaluate(&self, text: &str) -> Option<i128> {
        Expander::new(&self.table, UndefinedPolicy::Keep).evaluate(text)
    }

    /// The macro `name` with its token fully expanded
    pub fn expand_define(&self, name: &str) -> Result<Option<Definition>> {
        expand_define(&self.table, name)
    }

    /// Every active `#define` of `path` in order of appearance, tokens
    /// expanded. Macros already in the table whose expansion is an integer
    /// get that integer written back as their token.
    pub fn expand_defines_in_file(&mut self, path: &Path) -> Result<Vec<Definition>> {
        let content = read_source(path)?;
        let options = self.line_options(true, false);

        let found: Vec<Definition> = read_lines(&content, options, &self.table)
            .filter(|line| line.active && line.kind == LineKind::Text)
            .filter_map(|line| match Directive::parse(&line.text) {
                Some(Directive::Define(def)) => {
                    let file = path.display().to_string();
                    let location =
                        Location::spanning(file, line.start_line as u32, line.line_no as u32);
                    Some(def.at(location))
                }
                _ => None,
            })
            .collect();

        let mut defines = Vec::with_capacity(found.len());
        for mut def in found {
            match Expander::new(&self.table, UndefinedPolicy::Keep).expand(&def.token) {
                Ok(expanded) => def.token = expanded,
                Err(err) => debug!("{} left unexpanded: {}", def.name, err),
            }

            if let Some(value) = try_eval(&def.token) {
                if let Some(existing) = self.table.get(&def.name).cloned() {
                    self.table.insert_definition(Definition {
                        token: value.to_string(),
                        ..existing
                    });
                }
            }
            defines.push(def);
        }
        Ok(defines)
    }

    /// Active lines of `path` with indentation kept
    pub fn preprocess_source(&self, path: &Path) -> Result<Vec<String>> {
        let content = read_source(path)?;
        let options = self.line_options(is_header(path), true);
        Ok(read_lines(&content, options, &self.table)
            .filter(|line| line.active || line.kind == LineKind::Directive)
            .map(|line| line.text)
            .collect())
    }

    /// Active and inactive line numbers of `path`
    pub fn classify_file(&self, path: &Path) -> Result<LineActivity> {
        let content = read_source(path)?;
        Ok(self.classify_text(&content))
    }

    /// Active and inactive line numbers of an in-memory buffer
    pub fn classify_text(&self, text: &str) -> LineActivity {
        classify_lines(text, self.line_options(true, true), &self.table)
    }

    /// Layer the `#define`s of a source file over the table until the
    /// returned guard is dropped
    pub fn file_scope(&mut self, path: &Path) -> Result<ScopedDefines<'_>> {
        let content = read_source(path)?;
        let options = self.line_options(is_header(path), false);

        let defs: Vec<Definition> = read_lines(&content, options, &self.table)
            .filter(|line| line.active && line.kind == LineKind::Text)
            .filter_map(|line| match Directive::parse(&line.text) {
                Some(Directive::Define(def)) => Some(def),
                _ => None,
            })
            .collect();

        debug!("{} temporary defines from {:?}", defs.len(), path);
        Ok(self.table.scoped(defs))
    }

    /// Value report for `name`, see [`format_value`]
    pub fn format_value(&self, name: &str) -> Result<String> {
        format_value(&self.table, name)
    }

    /// One `#define NAME (VALUE)` line per macro, in table order
    pub fn listing(&self) -> Vec<String> {
        self.table
            .iter()
            .map(|def| {
                let value = if def.is_function_like() {
                    None
                } else {
                    self.evaluate(&def.token)
                };
                match value {
                    Some(v) => format!("#define {:<30} ({})", def.signature(), hex(v)),
                    None => format!("#define {:<30} ({})", def.signature(), def.token),
                }
            })
            .collect()
    }

    fn line_options(&self, ignore_header_guard: bool, keep_whitespace: bool) -> LineOptions {
        LineOptions {
            evaluate_conditionals: self.config.preprocess.evaluate_conditionals,
            ignore_header_guard,
            keep_whitespace,
            include_block_comments: false,
        }
    }
}

/// The macro `name` of `table` with its token fully expanded, undefined
/// names kept
pub fn expand_define(table: &DefinitionTable, name: &str) -> Result<Option<Definition>> {
    let Some(def) = table.get(name) else {
        return Ok(None);
    };
    let token = Expander::new(table, UndefinedPolicy::Keep).expand(&def.token)?;
    Ok(Some(Definition {
        token,
        ..def.clone()
    }))
}

/// Describe what `name` stands for.
///
/// A macro that evaluates gives `"N (0xN)"`; otherwise its expanded token
/// with decimal numbers shown in hex. A name that is no macro is expanded
/// as an expression.
pub fn format_value(table: &DefinitionTable, name: &str) -> Result<String> {
    match expand_define(table, name)? {
        Some(def) => Ok(match try_eval(&def.token) {
            Some(value) => format!("{} ({})", value, hex(value)),
            None => decimals_to_hex(&def.token, 0),
        }),
        None => {
            let expanded = Expander::new(table, UndefinedPolicy::Keep).expand(name)?;
            Ok(decimals_to_hex(&expanded, 2))
        }
    }
}

/// Rewrite every standalone decimal number in `text` as `0x..` hex,
/// zero-padded to `width` digits
pub fn decimals_to_hex(text: &str, width: usize) -> String {
    DECIMAL
        .replace_all(text, |caps: &Captures| match caps[1].parse::<u128>() {
            Ok(n) => format!("0x{:0width$X}", n, width = width),
            Err(_) => caps[1].to_string(),
        })
        .into_owned()
}

fn hex(value: i128) -> String {
    if value < 0 {
        format!("-0x{:x}", value.unsigned_abs())
    } else {
        format!("0x{:x}", value)
    }
}
