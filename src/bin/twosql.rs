//! twosql: render and check two-way SQL templates
//!
//! # Usage
//!
//! ```bash
//! # Render with parameters
//! twosql render query.sql -p id=5 -p name=alice
//!
//! # Parameters from JSON, PostgreSQL placeholders, JSON output
//! twosql render query.sql --params params.json --numbered --format json
//!
//! # Syntax check (non-zero exit on failure)
//! twosql check sql/*.sql
//!
//! # Branch coverage over several parameter sets
//! twosql coverage query.sql --params a.json --params b.json
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use tracing_subscriber::EnvFilter;
use twosql::prelude::*;

#[derive(Parser)]
#[command(name = "twosql")]
#[command(version)]
#[command(about = "Two-way SQL template renderer", long_about = None)]
#[command(after_help = "EXAMPLES:
    twosql render find_users.sql -p name=alice -p 'ids=[1,2,3]'
    twosql render find_users.sql --params params.json --numbered
    twosql check sql/*.sql
    twosql explain find_users.sql")]
struct Cli {
    /// Configuration file (defaults to ./twosql.toml, then the user config dir)
    #[arg(short, long, global = true, env = "TWOSQL_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a template to SQL and bind values
    Render {
        file: PathBuf,

        /// Parameter as name=value (repeatable)
        #[arg(short = 'p', long = "param")]
        params: Vec<String>,

        /// JSON object file with parameters
        #[arg(long = "params")]
        params_file: Option<PathBuf>,

        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Use $1, $2, ... placeholders
        #[arg(long)]
        numbered: bool,
    },
    /// Parse templates and report syntax errors
    Check {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Show the parsed structure of a template
    Explain { file: PathBuf },
    /// Render once per parameter file and report branch coverage
    Coverage {
        file: PathBuf,

        /// JSON object file with parameters (repeatable)
        #[arg(long = "params", required = true)]
        params_files: Vec<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(&cli) {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "twosql=debug" } else { "twosql=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: &Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    match &cli.command {
        Commands::Render {
            file,
            params,
            params_file,
            format,
            numbered,
        } => render(config, file, params, params_file.as_deref(), format, *numbered),
        Commands::Check { files } => check(files),
        Commands::Explain { file } => explain(file),
        Commands::Coverage { file, params_files } => coverage(config, file, params_files),
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => Config::discover()?,
    };
    Ok(config)
}

fn read_template(file: &Path) -> Result<String> {
    std::fs::read_to_string(file).with_context(|| format!("failed to read {}", file.display()))
}

fn read_params(file: &Path) -> Result<Params> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let json: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("{} is not valid JSON", file.display()))?;
    Ok(Params::from_json(json)?)
}

fn render(
    mut config: Config,
    file: &Path,
    assignments: &[String],
    params_file: Option<&Path>,
    format: &OutputFormat,
    numbered: bool,
) -> Result<()> {
    if numbered {
        config.transform.placeholder = PlaceholderStyle::Numbered;
    }
    let template = read_template(file)?;

    let mut params = match params_file {
        Some(path) => read_params(path)?,
        None => Params::new(),
    };
    for assignment in assignments {
        let (name, value) = Params::parse_assignment(assignment)?;
        params.insert(name, value);
    }

    let tree = twosql::parse(&template)?;
    let out = Transformer::new(config.transform).transform(&tree, &params)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&out)?),
        OutputFormat::Text => {
            println!("{}", out.sql.white());
            if !out.bind_values.is_empty() {
                println!();
                println!("{}", "Bindings:".cyan());
                for (i, (name, bind)) in out.bind_names.iter().zip(&out.bind_values).enumerate() {
                    println!(
                        "  {:>3}  {} = {}",
                        i + 1,
                        name.dimmed(),
                        bind.value.to_string().yellow()
                    );
                }
            }
        }
    }
    Ok(())
}

fn check(files: &[PathBuf]) -> Result<()> {
    let mut failed = 0;
    for file in files {
        let result = read_template(file).and_then(|t| Ok(twosql::parse(&t)?));
        match result {
            Ok(tree) => println!(
                "{} {} ({} node(s))",
                "✓".green(),
                file.display(),
                tree.node_count()
            ),
            Err(e) => {
                failed += 1;
                println!("{} {}: {:#}", "✗".red(), file.display(), e);
            }
        }
    }
    if failed > 0 {
        anyhow::bail!("{} of {} template(s) failed", failed, files.len());
    }
    Ok(())
}

fn explain(file: &Path) -> Result<()> {
    let template = read_template(file)?;
    let tree = twosql::parse(&template)?;

    println!("{} {}", "Template:".dimmed(), file.display().to_string().yellow());
    println!();
    println!("{}", "Structure:".green().bold());
    print!("{}", tree.outline());

    let points = tree.coverage_points();
    if !points.is_empty() {
        println!();
        println!("{}", "Coverage points:".green().bold());
        for point in points {
            println!("  {:>5}  {}", point.position, point.kind.to_string().cyan());
        }
    }
    Ok(())
}

fn coverage(config: Config, file: &Path, params_files: &[PathBuf]) -> Result<()> {
    let template = read_template(file)?;
    let collector = Arc::new(CoverageCollector::new());
    let engine = SqlEngine::with_config(config).with_coverage_collector(Arc::clone(&collector));
    let name = file.display().to_string();
    engine.register(name.clone(), &template)?;

    for params_file in params_files {
        let params = read_params(params_file)?;
        engine
            .render(&name, &params)
            .with_context(|| format!("render failed with {}", params_file.display()))?;
    }

    match collector.summary(&name) {
        Some(summary) => print!("{}", summary),
        None => println!("{}", "(no executions)".dimmed()),
    }
    Ok(())
}
