//! cdefine CLI
//!
//! Command-line interface for building and querying a project's
//! `#define` database.

use anyhow::{Context, Result};
use cdefine_core::Config;
use cdefine_parser::preprocessor::{Expander, TableCache, UndefinedPolicy};
use cdefine_parser::DefineDatabase;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cdefine")]
#[command(author, version, about = "C #define database and macro expander", long_about = None)]
struct Cli {
    /// Project root
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Predefine a macro
    #[arg(short = 'D', value_name = "NAME[=VALUE]", global = true)]
    defines: Vec<String>,

    /// Flags file inside the predefine directory
    #[arg(long, value_name = "FILE", global = true)]
    flags: Option<String>,

    /// Configuration file (default: <root>/cdefine.yaml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Cache built tables in this directory
    #[arg(long, value_name = "DIR", global = true)]
    cache_dir: Option<PathBuf>,

    /// Treat every line as active
    #[arg(long, global = true)]
    no_conditionals: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the database and list every define
    Build {
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Expand macros in an expression
    Expand {
        #[arg(value_name = "TEXT")]
        text: String,

        /// Fail on undefined identifiers
        #[arg(long)]
        strict: bool,

        /// Also use the defines of this source file
        #[arg(long, value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Evaluate an expression
    Eval {
        #[arg(value_name = "TEXT")]
        text: String,
    },

    /// Show the value of a macro
    Value {
        #[arg(value_name = "NAME")]
        name: String,
    },

    /// List the inactive lines of a file
    Inactive {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Print the active source lines of a file
    Source {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// List the expanded defines of a file
    Defines {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// List the flag files of the project
    Configs,

    /// Show or clear the table cache
    Cache {
        /// Remove every cached table
        #[arg(long)]
        clear: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = load_config(&cli)?;

    match cli.command {
        Commands::Configs => cmd_configs(&config)?,
        Commands::Cache { clear } => cmd_cache(&config, clear)?,
        Commands::Build { output, format } => {
            cmd_build(&open_database(config)?, output.as_deref(), &format)?
        }
        Commands::Expand { text, strict, file } => {
            cmd_expand(open_database(config)?, &text, strict, file.as_deref())?
        }
        Commands::Eval { text } => {
            let db = open_database(config)?;
            match db.evaluate(&text) {
                Some(value) => println!("{}", value),
                None => println!("unresolved"),
            }
        }
        Commands::Value { name } => println!("{}", open_database(config)?.format_value(&name)?),
        Commands::Inactive { file } => {
            if !config.preprocess.highlights(&file) {
                warn!("{:?} is not a highlighted file type", file);
                return Ok(());
            }
            let activity = open_database(config)?.classify_file(&file)?;
            for line in activity.inactive {
                println!("{}", line);
            }
        }
        Commands::Source { file } => {
            for line in open_database(config)?.preprocess_source(&file)? {
                println!("{}", line);
            }
        }
        Commands::Defines { file } => {
            let mut db = open_database(config)?;
            for def in db.expand_defines_in_file(&file)? {
                println!("#define {} {}", def.signature(), def.token);
            }
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Configuration file plus command-line overrides; `--root` always wins
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => {
            Config::load(path).with_context(|| format!("loading {}", path.display()))?
        }
        None => Config::discover(&cli.root)?,
    };

    config.project_root = cli.root.clone();
    config.defines.extend(cli.defines.iter().cloned());
    if cli.flags.is_some() {
        config.flags_file = cli.flags.clone();
    }
    if cli.cache_dir.is_some() {
        config.cache_dir = cli.cache_dir.clone();
    }
    if cli.no_conditionals {
        config.preprocess.evaluate_conditionals = false;
    }
    Ok(config)
}

fn open_database(config: Config) -> Result<DefineDatabase> {
    let root = config.project_root.clone();
    let mut db = DefineDatabase::new(config);

    let predefines = db.load_predefines()?;
    let stats = db
        .build()
        .with_context(|| format!("building define database for {}", root.display()))?;

    info!(
        "{} predefines, {} headers, {} defines{}",
        predefines,
        stats.headers,
        db.table().len(),
        if stats.cached { " (cached)" } else { "" }
    );
    Ok(db)
}

fn cmd_build(db: &DefineDatabase, output: Option<&Path>, format: &str) -> Result<()> {
    let rendered = match format {
        "json" => serde_json::to_string_pretty(db.table())?,
        "text" => db.listing().join("\n"),
        _ => anyhow::bail!("Unknown format: {}", format),
    };

    match output {
        Some(path) => {
            std::fs::write(path, rendered + "\n")?;
            eprintln!("Wrote {} defines to {:?}", db.table().len(), path);
        }
        None => println!("{}", rendered),
    }
    Ok(())
}

fn cmd_expand(mut db: DefineDatabase, text: &str, strict: bool, file: Option<&Path>) -> Result<()> {
    let policy = if strict {
        UndefinedPolicy::Raise
    } else {
        UndefinedPolicy::Keep
    };

    let expanded = match file {
        Some(file) => {
            let scope = db.file_scope(file)?;
            Expander::new(&scope, policy).expand(text)?
        }
        None => db.expand(text, policy)?,
    };
    println!("{}", expanded);
    Ok(())
}

fn cmd_configs(config: &Config) -> Result<()> {
    let db = DefineDatabase::new(config.clone());
    let files = db.flag_files()?;
    if files.is_empty() {
        println!("No flag files in {}", config.predefine_path().display());
        return Ok(());
    }

    for name in files {
        let marker = if config.flags_file.as_deref() == Some(name.as_str()) {
            "*"
        } else {
            " "
        };
        println!("{} {}", marker, name);
    }
    Ok(())
}

fn cmd_cache(config: &Config, clear: bool) -> Result<()> {
    let Some(dir) = &config.cache_dir else {
        anyhow::bail!("No cache directory configured (use --cache-dir)");
    };
    let mut cache = TableCache::new(dir.clone())?;

    if clear {
        cache.clear()?;
        println!("Cleared {}", dir.display());
        return Ok(());
    }

    let stats = cache.stats();
    println!("{} cached tables, {}", stats.total_entries, stats.size_human());
    Ok(())
}
