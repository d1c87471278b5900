#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process;
use std::time::Instant;

use prognos::config::{ConfigError, OutcomeSpec, StudyConfig};
use prognos::data::CohortTable;
use prognos::holdout;
use prognos::models::ModelFamily;
use prognos::plot;
use prognos::report;
use prognos::search;

#[derive(Clone, Copy, ValueEnum)]
enum FamilyArg {
    Rsf,
    Gbsa,
    Coxnet,
}

impl From<FamilyArg> for ModelFamily {
    fn from(arg: FamilyArg) -> Self {
        match arg {
            FamilyArg::Rsf => ModelFamily::Rsf,
            FamilyArg::Gbsa => ModelFamily::Gbsa,
            FamilyArg::Coxnet => ModelFamily::Coxnet,
        }
    }
}

#[derive(Parser)]
#[command(
    name = "prognos",
    about = "Survival model selection over nested clinical feature sets",
    long_about = "Runs cross-validated grid searches for random survival forests, \
                 gradient-boosted Cox models, and elastic-net Cox regression over \
                 nested feature sets, and evaluates the selected settings on a \
                 held-out split with time-dependent AUC and Brier curves."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the cross-validated feature-set and hyperparameter search
    #[command(about = "Run the cross-validated grid search")]
    GridSearch {
        /// Path to the cohort CSV
        #[arg(value_name = "DATA_PATH")]
        data: PathBuf,

        /// Study definition TOML; the built-in liver study is used when omitted
        #[arg(long)]
        config: Option<PathBuf>,

        /// Directory for result tables
        #[arg(long, default_value = "results")]
        out: PathBuf,

        /// Field delimiter in the cohort CSV
        #[arg(long, default_value_t = ',')]
        delimiter: char,

        /// Model families to sweep; all three when omitted
        #[arg(long, value_enum, value_delimiter = ',')]
        families: Vec<FamilyArg>,

        /// Outcomes to sweep; every configured outcome when omitted
        #[arg(long, value_delimiter = ',')]
        outcomes: Vec<String>,
    },

    /// Evaluate the fixed models on a stratified held-out split
    #[command(about = "Evaluate fixed models on a held-out split")]
    Evaluate {
        /// Path to the cohort CSV
        #[arg(value_name = "DATA_PATH")]
        data: PathBuf,

        /// Study definition TOML; the built-in liver study is used when omitted
        #[arg(long)]
        config: Option<PathBuf>,

        /// Directory for metric tables and charts
        #[arg(long, default_value = "results")]
        out: PathBuf,

        /// Field delimiter in the cohort CSV
        #[arg(long, default_value_t = ',')]
        delimiter: char,

        /// Outcomes to evaluate; every configured outcome when omitted
        #[arg(long, value_delimiter = ',')]
        outcomes: Vec<String>,
    },

    /// Display version information
    #[command(about = "Print version information")]
    Version,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    let Cli { command } = cli;

    let result = match command {
        Some(Commands::GridSearch {
            data,
            config,
            out,
            delimiter,
            families,
            outcomes,
        }) => run_grid_search(data, config, out, delimiter, families, outcomes),
        Some(Commands::Evaluate {
            data,
            config,
            out,
            delimiter,
            outcomes,
        }) => run_evaluate(data, config, out, delimiter, outcomes),
        Some(Commands::Version) => {
            println!("prognos {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        None => {
            Cli::command().print_help().expect("print help");
            println!();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> Result<StudyConfig, ConfigError> {
    match path {
        Some(path) => {
            println!("Loading study definition from: {}", path.display());
            StudyConfig::load(path)
        }
        None => Ok(StudyConfig::default_liver_study()),
    }
}

fn ascii_delimiter(delimiter: char) -> Result<u8, String> {
    u8::try_from(delimiter)
        .map_err(|_| format!("delimiter must be a single ASCII character, got '{delimiter}'"))
}

fn resolve_outcomes(
    config: &StudyConfig,
    requested: &[String],
) -> Result<Vec<OutcomeSpec>, String> {
    if requested.is_empty() {
        return Ok(config.outcomes.clone());
    }
    requested
        .iter()
        .map(|name| {
            config
                .outcome(name)
                .cloned()
                .ok_or_else(|| format!("unknown outcome '{name}'"))
        })
        .collect()
}

fn resolve_families(requested: &[FamilyArg]) -> Vec<ModelFamily> {
    if requested.is_empty() {
        ModelFamily::ALL.to_vec()
    } else {
        requested.iter().map(|&arg| arg.into()).collect()
    }
}

fn load_table(
    data: &Path,
    delimiter: char,
    config: &StudyConfig,
) -> Result<CohortTable, Box<dyn std::error::Error>> {
    let separator = ascii_delimiter(delimiter)?;
    println!("Loading cohort data from: {}", data.display());
    let table = CohortTable::load_csv(data, separator, &config.required_columns())?;
    println!("Loaded {} rows", table.n_rows());
    Ok(table)
}

fn run_grid_search(
    data: PathBuf,
    config_path: Option<PathBuf>,
    out: PathBuf,
    delimiter: char,
    families: Vec<FamilyArg>,
    outcomes: Vec<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let start = Instant::now();
    let config = load_config(config_path.as_deref())?;
    let outcome_specs = resolve_outcomes(&config, &outcomes)?;
    let family_list = resolve_families(&families);
    let table = load_table(&data, delimiter, &config)?;

    for outcome in &outcome_specs {
        for &family in &family_list {
            let records = search::run_grid_search(&table, &config, family, outcome)?;
            report::write_gridsearch_csv(&out, family, &outcome.name, &records)?;
        }
    }

    println!("{}", report::runtime_summary(start.elapsed()));
    Ok(())
}

fn run_evaluate(
    data: PathBuf,
    config_path: Option<PathBuf>,
    out: PathBuf,
    delimiter: char,
    outcomes: Vec<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let start = Instant::now();
    let config = load_config(config_path.as_deref())?;
    let outcome_specs = resolve_outcomes(&config, &outcomes)?;
    let table = load_table(&data, delimiter, &config)?;

    for outcome in &outcome_specs {
        match holdout::evaluate_outcome(&table, &config, outcome) {
            Ok(curves) => {
                report::write_metrics_csv(&out, &curves)?;
                plot::render_auc_brier_chart(&out, &curves)?;
                println!("Completed: {}", outcome.name);
            }
            Err(e) => {
                println!("Skipping outcome '{}': {e}", outcome.name);
                log::warn!("held-out evaluation failed for '{}': {e}", outcome.name);
            }
        }
    }

    println!("{}", report::runtime_summary(start.elapsed()));
    Ok(())
}
