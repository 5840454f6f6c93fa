//! sqlworker CLI - run SQL against a worker-owned SQLite database
//!
//! Usage:
//!   sqlworker query "<sql>" [--param <value>]... [--method all|get|run|values]
//!   sqlworker batch <file.sql>
//!   sqlworker info
//!   sqlworker export <output>
//!   sqlworker import <input>
//!
//! Examples:
//!   sqlworker --database app/main.sqlite3 query "SELECT * FROM groceries WHERE name = ?" --param pasta
//!   sqlworker --database app/main.sqlite3 export backup.sqlite3

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use sqlworker::config::Settings;
use sqlworker::{logging, QueryMethod, SqlValue, Statement, WorkerClient};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "sqlworker")]
#[command(about = "sqlworker - run SQL against a SQLite database owned by a worker thread")]
#[command(version)]
struct Cli {
    /// Path to a sqlworker.toml config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database storage path (overrides the config file), or ":memory:"
    #[arg(short, long, global = true)]
    database: Option<String>,

    /// Storage root directory (overrides the config file)
    #[arg(long, global = true)]
    storage_root: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute one statement
    Query {
        /// SQL text
        sql: String,

        /// Positional parameter (repeatable)
        #[arg(short, long = "param")]
        params: Vec<String>,

        /// Result shape
        #[arg(short, long, default_value = "all")]
        method: MethodArg,
    },

    /// Execute a file of statements (one per line) in one transaction
    Batch {
        /// Path to the statements file
        file: PathBuf,
    },

    /// Print database metadata
    Info,

    /// Write the database image to a file
    Export {
        /// Output path
        output: PathBuf,
    },

    /// Replace the database with an image from a file
    Import {
        /// Input path
        input: PathBuf,
    },
}

#[derive(Clone, ValueEnum)]
enum MethodArg {
    All,
    Get,
    Run,
    Values,
}

impl From<MethodArg> for QueryMethod {
    fn from(arg: MethodArg) -> Self {
        match arg {
            MethodArg::All => QueryMethod::All,
            MethodArg::Get => QueryMethod::Get,
            MethodArg::Run => QueryMethod::Run,
            MethodArg::Values => QueryMethod::Values,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => Settings::from_file(path),
        None => Settings::load(),
    }
    .unwrap_or_else(|e| {
        eprintln!("Error loading config: {}", e);
        std::process::exit(1);
    });
    if let Some(database) = &cli.database {
        settings.database.path = database.clone();
    }
    if let Some(root) = &cli.storage_root {
        settings.database.storage_root = Some(root.clone());
    }

    logging::init_logging(&settings.logging);

    match run(cli.command, &settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands, settings: &Settings) -> Result<(), Box<dyn std::error::Error>> {
    let client = WorkerClient::open(settings).await?;

    let outcome = execute(&client, command).await;
    client.destroy().await?;
    outcome
}

async fn execute(client: &WorkerClient, command: Commands) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Query {
            sql,
            params,
            method,
        } => {
            let statement = params
                .into_iter()
                .fold(Statement::new(sql), |stmt, param| stmt.bind(parse_param(&param)));
            let method = QueryMethod::from(method);
            let result = client.exec(statement, method).await?;
            match method {
                QueryMethod::Values => print_json(&result)?,
                _ => print_json(&result.records())?,
            }
        }
        Commands::Batch { file } => {
            let content = tokio::fs::read_to_string(&file).await?;
            let statements: Vec<Statement> = content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with("--"))
                .map(Statement::from)
                .collect();
            let results = client.batch(statements).await?;
            print_json(&results)?;
        }
        Commands::Info => {
            let info = client.get_database_info().await?;
            print_json(&info)?;
        }
        Commands::Export { output } => {
            let image = client.get_database_file().await?;
            tokio::fs::write(&output, &image).await?;
            eprintln!("Wrote {} bytes to {}", image.len(), output.display());
        }
        Commands::Import { input } => {
            client.overwrite_database_file(input).await?;
        }
    }
    Ok(())
}

/// Interpret a CLI parameter as an integer, real, NULL or text value.
fn parse_param(raw: &str) -> SqlValue {
    if raw.eq_ignore_ascii_case("null") {
        SqlValue::Null
    } else if let Ok(i) = raw.parse::<i64>() {
        SqlValue::Integer(i)
    } else if let Ok(f) = raw.parse::<f64>() {
        SqlValue::Real(f)
    } else {
        SqlValue::Text(raw.to_string())
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
