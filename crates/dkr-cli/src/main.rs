use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use serde_json::json;
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use dkr_core::config::CONFIG_FILE;
use dkr_core::engine::IntentExplanation;
use dkr_core::verifier::Severity;
use dkr_core::{validate, DkrConfig, Engine, Error, FsSource, RuleSet, RuleStore};

/// DKR — Domain Knowledge Rules CLI
///
/// Validate, inspect and try out `.rules` files.
#[derive(Parser)]
#[command(name = "dkr", version, about, long_about = None)]
struct Cli {
    /// Only print results; no logs or decorations
    #[arg(long, global = true)]
    quiet: bool,

    /// Debug logging
    #[arg(long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to ./dkr.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a rule file and run structural validation
    Validate {
        /// Path to .rules file
        file: PathBuf,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Summarize a rule file
    Info {
        /// Path to .rules file
        file: PathBuf,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the content hash (SHA-256) of a rule file
    Hash {
        /// Path to .rules file
        file: PathBuf,
    },

    /// Run a question/answer pair through the engine
    Test {
        /// Path to .rules file
        file: PathBuf,
        /// Question text
        #[arg(short, long)]
        question: String,
        /// Candidate answer text
        #[arg(short, long)]
        answer: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show how each intent scores against a question
    Explain {
        /// Path to .rules file
        file: PathBuf,
        /// Question text
        #[arg(short, long)]
        question: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the expanded search query for a question
    Expand {
        /// Path to .rules file
        file: PathBuf,
        /// Question text
        #[arg(short, long)]
        question: String,
    },

    /// List rule files in the rules directory
    List {
        /// Directory to scan (defaults to store.rules_dir)
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Show version information
    Version,
}

struct Context {
    config: DkrConfig,
    store: RuleStore<FsSource>,
    quiet: bool,
}

impl Context {
    fn new(config: DkrConfig, quiet: bool) -> Self {
        let source = FsSource::new().with_extension(config.store.extension.clone());
        let store = RuleStore::from_config(source, &config.store);
        Context {
            config,
            store,
            quiet,
        }
    }

    /// Load a rule file, reporting failures on stderr
    fn load(&self, file: &Path) -> Option<Arc<RuleSet>> {
        match self.store.load(&file.to_string_lossy()) {
            Ok(rules) => Some(rules),
            Err(e) => {
                report_load_error(file, &e);
                None
            }
        }
    }

    fn engine(&self) -> Engine {
        Engine::from_config(&self.config.engine)
    }
}

fn main() {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.quiet);

    let exit_code = match load_config(cli.config.as_deref()) {
        Ok(config) => run(cli.command, Context::new(config, cli.quiet)),
        Err(e) => {
            print_error(&e.to_string());
            2
        }
    };

    process::exit(exit_code);
}

fn init_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("off")
    } else if verbose {
        EnvFilter::new("dkr=debug,dkr_core=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dkr=info,dkr_core=warn"))
    };

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .without_time()
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}

fn load_config(path: Option<&Path>) -> dkr_core::Result<DkrConfig> {
    let config = match path {
        Some(path) if !path.exists() => {
            return Err(Error::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        Some(path) => DkrConfig::load(path)?,
        None => DkrConfig::load(Path::new(CONFIG_FILE))?,
    };
    debug!(rules_dir = %config.store.rules_dir.display(), "configuration loaded");
    Ok(config)
}

fn run(command: Commands, ctx: Context) -> i32 {
    match command {
        Commands::Validate { file, json } => cmd_validate(&ctx, &file, json),
        Commands::Info { file, json } => cmd_info(&ctx, &file, json),
        Commands::Hash { file } => cmd_hash(&ctx, &file),
        Commands::Test {
            file,
            question,
            answer,
            json,
        } => cmd_test(&ctx, &file, &question, &answer, json),
        Commands::Explain {
            file,
            question,
            json,
        } => cmd_explain(&ctx, &file, &question, json),
        Commands::Expand { file, question } => cmd_expand(&ctx, &file, &question),
        Commands::List { dir } => cmd_list(&ctx, dir),
        Commands::Version => {
            println!(
                "dkr {} (dkr-core {})",
                env!("CARGO_PKG_VERSION"),
                dkr_core::VERSION
            );
            0
        }
    }
}

// ── Commands ──────────────────────────────────────────────

fn cmd_validate(ctx: &Context, file: &Path, json: bool) -> i32 {
    let rules = match ctx.store.load(&file.to_string_lossy()) {
        Ok(rules) => rules,
        Err(Error::Parse(e)) => {
            if json {
                let value = json!({
                    "file": file.display().to_string(),
                    "valid": false,
                    "errors": 1,
                    "warnings": 0,
                    "parse_error": { "line": e.line, "message": e.message },
                });
                emit_json(serde_json::to_string_pretty(&value));
            } else {
                report_load_error(file, &Error::Parse(e));
            }
            return 1;
        }
        Err(e) => {
            report_load_error(file, &e);
            return 2;
        }
    };

    let report = validate(&rules);

    if json {
        let value = json!({
            "file": file.display().to_string(),
            "valid": report.is_valid(),
            "errors": report.errors.len(),
            "warnings": report.warnings.len(),
            "report": report,
        });
        if emit_json(serde_json::to_string_pretty(&value)) != 0 {
            return 2;
        }
    } else {
        for diagnostic in &report.diagnostics {
            let line = diagnostic.to_string();
            match diagnostic.severity {
                Severity::Error => eprintln!("{}", line.red()),
                Severity::Warning if !ctx.quiet => eprintln!("{}", line.yellow()),
                Severity::Warning => {}
            }
        }
        if report.is_valid() {
            if !ctx.quiet {
                println!(
                    "{} {} is valid ({} facts, {} intents, {} rules, {} normalizations, {} synonyms)",
                    "✓".green().bold(),
                    file.display(),
                    report.fact_count,
                    report.intent_count,
                    report.rule_count,
                    report.normalization_count,
                    report.synonym_count
                );
            }
        } else {
            eprintln!(
                "{} {} has {} error(s)",
                "✗".red().bold(),
                file.display(),
                report.errors.len()
            );
        }
    }

    if report.is_valid() {
        0
    } else {
        1
    }
}

fn cmd_info(ctx: &Context, file: &Path, json: bool) -> i32 {
    let rules = match ctx.load(file) {
        Some(rules) => rules,
        None => return 2,
    };
    let summary = rules.summary();

    if json {
        return emit_json(serde_json::to_string_pretty(&summary));
    }

    println!("{} {}", "Domain:".bold(), summary.domain);
    println!("{} {}", "Source:".bold(), summary.source_id);
    println!("{} {}", "Hash:".bold(), summary.content_hash);
    let by_level: Vec<String> = summary
        .facts_by_criticality
        .iter()
        .map(|(level, count)| format!("{} {}", count, level))
        .collect();
    if by_level.is_empty() {
        println!("{} {}", "Facts:".bold(), summary.total_facts);
    } else {
        println!(
            "{} {} ({})",
            "Facts:".bold(),
            summary.total_facts,
            by_level.join(", ")
        );
    }
    if summary.intents.is_empty() {
        println!("{} 0", "Intents:".bold());
    } else {
        println!(
            "{} {} ({})",
            "Intents:".bold(),
            summary.intents.len(),
            summary.intents.join(", ")
        );
    }
    println!("{} {}", "Rules:".bold(), summary.rules);
    println!("{} {}", "Normalizations:".bold(), summary.normalizations);
    println!("{} {}", "Synonyms:".bold(), summary.synonyms);
    0
}

fn cmd_hash(ctx: &Context, file: &Path) -> i32 {
    match ctx.load(file) {
        Some(rules) => {
            println!("{}", rules.content_hash());
            0
        }
        None => 2,
    }
}

fn cmd_test(ctx: &Context, file: &Path, question: &str, answer: &str, json: bool) -> i32 {
    let rules = match ctx.load(file) {
        Some(rules) => rules,
        None => return 2,
    };
    let result = ctx.engine().process(&rules, question, answer);

    if json {
        return emit_json(serde_json::to_string_pretty(&result));
    }
    if ctx.quiet {
        println!("{}", result.final_answer);
    } else {
        println!("{}", result);
    }
    0
}

fn cmd_explain(ctx: &Context, file: &Path, question: &str, json: bool) -> i32 {
    let rules = match ctx.load(file) {
        Some(rules) => rules,
        None => return 2,
    };
    let explanation = ctx.engine().explain(&rules, question);

    if json {
        return emit_json(serde_json::to_string_pretty(&explanation));
    }
    print_explanation(&explanation);
    0
}

fn cmd_expand(ctx: &Context, file: &Path, question: &str) -> i32 {
    match ctx.load(file) {
        Some(rules) => {
            println!("{}", ctx.engine().expand_query(&rules, question));
            0
        }
        None => 2,
    }
}

fn cmd_list(ctx: &Context, dir: Option<PathBuf>) -> i32 {
    let dir = dir.unwrap_or_else(|| ctx.config.store.rules_dir.clone());
    let source = FsSource::with_root(&dir).with_extension(ctx.config.store.extension.clone());

    let ids = match source.list() {
        Ok(ids) => ids,
        Err(e) => {
            print_error(&e.to_string());
            return 2;
        }
    };
    if ids.is_empty() {
        if !ctx.quiet {
            println!("no rule files in {}", dir.display());
        }
        return 0;
    }

    let store = RuleStore::from_config(source, &ctx.config.store);
    for id in ids {
        match store.load(&id) {
            Ok(rules) => println!(
                "{:<24} {} ({} facts, {} intents, {} rules)",
                id,
                rules.domain_name(),
                rules.facts().len(),
                rules.intents().len(),
                rules.rules().len()
            ),
            Err(e) => println!("{:<24} {}", id, format!("error: {}", e).red()),
        }
    }
    0
}

// ── Output helpers ────────────────────────────────────────

fn print_explanation(explanation: &IntentExplanation) {
    println!("{} {}", "Question:".bold(), explanation.question);
    for score in &explanation.scores {
        let ratio = format!("{}/{}", score.matched_triggers.len(), score.total_triggers);
        let matched: Vec<String> = score
            .matched_triggers
            .iter()
            .map(|t| format!("\"{}\"", t))
            .collect();
        let line = format!(
            "  {:<24} {:>5} {:>5.0}%  {}",
            score.name,
            ratio,
            score.confidence * 100.0,
            matched.join(", ")
        );
        if score.matched_triggers.is_empty() {
            println!("{}", line.dimmed());
        } else {
            println!("{}", line);
        }
    }
    match &explanation.detected {
        Some(intent) => println!(
            "{} {} ({:.0}%)",
            "Intent:".bold(),
            intent.name.green(),
            intent.confidence * 100.0
        ),
        None => println!("{} -", "Intent:".bold()),
    }
    println!("{} {}", "Expanded query:".bold(), explanation.expanded_query);
}

fn report_load_error(file: &Path, err: &Error) {
    match err {
        Error::Parse(e) => eprintln!(
            "{} {}:{}: {}",
            "error:".red().bold(),
            file.display(),
            e.line,
            e.message
        ),
        other => print_error(&other.to_string()),
    }
}

fn print_error(message: &str) {
    eprintln!("{} {}", "error:".red().bold(), message);
}

fn emit_json(rendered: serde_json::Result<String>) -> i32 {
    match rendered {
        Ok(text) => {
            println!("{}", text);
            0
        }
        Err(e) => {
            print_error(&format!("failed to render JSON: {}", e));
            2
        }
    }
}
