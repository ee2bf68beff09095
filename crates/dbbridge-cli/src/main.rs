//! dbbridge CLI - migrate data between SQLite and PostgreSQL backends.

use clap::{Parser, Subcommand};
use dbbridge::{
    driver, Config, DbError, Driver, JobStatus, MigrationJob, MigrationReport, MigrationRunner,
    TableStatus,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "dbbridge")]
#[command(about = "Migrate data between SQLite and PostgreSQL backends")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Path to state file for resume capability
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Clone)]
enum Commands {
    /// Start a new migration
    Run {
        /// Override tables to migrate (comma-separated, dependency order)
        #[arg(long, value_delimiter = ',')]
        tables: Option<Vec<String>>,

        /// Override rows per batch
        #[arg(long)]
        batch_size: Option<usize>,

        /// Override per-batch attempt timeout in seconds
        #[arg(long)]
        timeout_seconds: Option<u64>,

        /// Override attempts per batch
        #[arg(long)]
        retry_attempts: Option<u32>,

        /// Override number of concurrent batch writers
        #[arg(long)]
        writers: Option<usize>,

        #[command(flatten)]
        connection: ConnectionOverrides,
    },

    /// Resume a previously interrupted migration from its state file
    Resume {
        /// Override rows per batch
        #[arg(long)]
        batch_size: Option<usize>,

        /// Override per-batch attempt timeout in seconds
        #[arg(long)]
        timeout_seconds: Option<u64>,

        /// Override attempts per batch
        #[arg(long)]
        retry_attempts: Option<u32>,

        /// Override number of concurrent batch writers
        #[arg(long)]
        writers: Option<usize>,
    },

    /// Apply the schema to the target database (idempotent)
    InitSchema {
        /// Apply to the source database instead of the target
        #[arg(long)]
        source: bool,
    },

    /// Test both database connections
    HealthCheck,
}

/// Explicit connection parameter overrides, applied on top of the YAML
/// configuration.
#[derive(clap::Args, Clone)]
struct ConnectionOverrides {
    /// Override source database file path (sqlite source)
    #[arg(long)]
    source_path: Option<PathBuf>,

    /// Override target host (postgres target)
    #[arg(long)]
    target_host: Option<String>,

    /// Override target port (postgres target)
    #[arg(long)]
    target_port: Option<u16>,

    /// Override target user (postgres target)
    #[arg(long)]
    target_user: Option<String>,

    /// Override target password (postgres target)
    #[arg(long)]
    target_password: Option<String>,

    /// Override target database name (postgres target)
    #[arg(long)]
    target_database: Option<String>,

    /// Override target SSL mode (postgres target)
    #[arg(long)]
    target_ssl_mode: Option<String>,
}

impl ConnectionOverrides {
    fn apply(self, config: &mut Config) {
        if let Some(path) = self.source_path {
            config.source.path = path;
        }
        if let Some(host) = self.target_host {
            config.target.host = host;
        }
        if let Some(port) = self.target_port {
            config.target.port = port;
        }
        if let Some(user) = self.target_user {
            config.target.user = user;
        }
        if let Some(password) = self.target_password {
            config.target.password = password;
        }
        if let Some(database) = self.target_database {
            config.target.database = database;
        }
        if let Some(ssl_mode) = self.target_ssl_mode {
            config.target.ssl_mode = ssl_mode;
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), DbError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    let cancel_token = setup_signal_handler();

    match cli.command.clone() {
        Commands::Run {
            tables,
            batch_size,
            timeout_seconds,
            retry_attempts,
            writers,
            connection,
        } => {
            if let Some(tables) = tables {
                config.migration.tables = tables;
            }
            connection.apply(&mut config);
            apply_overrides(
                &mut config,
                batch_size,
                timeout_seconds,
                retry_attempts,
                writers,
            );
            config.validate()?;

            let job = config.migration.to_job();
            execute_migration(&config, job, &cli, &cancel_token).await?;
        }

        Commands::Resume {
            batch_size,
            timeout_seconds,
            retry_attempts,
            writers,
        } => {
            let state_file = cli.state_file.clone().ok_or_else(|| {
                DbError::Config("--state-file is required for resume".to_string())
            })?;
            let previous = MigrationReport::load(&state_file)?;

            apply_overrides(
                &mut config,
                batch_size,
                timeout_seconds,
                retry_attempts,
                writers,
            );
            config.validate()?;

            info!(run_id = %previous.run_id, "resuming from previous state");
            let job = config.migration.to_job().resume_from(&previous);
            execute_migration(&config, job, &cli, &cancel_token).await?;
        }

        Commands::InitSchema { source } => {
            config.validate()?;
            let db_config = if source { &config.source } else { &config.target };
            let drv = driver::connect(db_config).await?;
            drv.init_schema().await?;
            drv.close().await?;
            println!(
                "Schema applied to {} ({})",
                if source { "source" } else { "target" },
                db_config.backend
            );
        }

        Commands::HealthCheck => {
            config.validate()?;
            let source = check_connection("source", &config.source).await;
            let target = check_connection("target", &config.target).await;

            if cli.output_json {
                let result = serde_json::json!({
                    "source": health_json(&config.source.backend.to_string(), &source),
                    "target": health_json(&config.target.backend.to_string(), &target),
                    "healthy": source.is_ok() && target.is_ok(),
                });
                println!("{}", serde_json::to_string_pretty(&result)?);
            }

            if source.is_err() || target.is_err() {
                return Err(DbError::connection("health check failed"));
            }
            if !cli.output_json {
                println!("\n  Overall: HEALTHY");
            }
        }
    }

    Ok(())
}

fn apply_overrides(
    config: &mut Config,
    batch_size: Option<usize>,
    timeout_seconds: Option<u64>,
    retry_attempts: Option<u32>,
    writers: Option<usize>,
) {
    if let Some(b) = batch_size {
        config.migration.batch_size = b;
    }
    if let Some(t) = timeout_seconds {
        config.migration.timeout_seconds = t;
    }
    if let Some(r) = retry_attempts {
        config.migration.retry_attempts = r;
    }
    if let Some(w) = writers {
        config.migration.writers = w;
    }
}

/// Connect both ends, ensure the target schema, run the job, persist the
/// state file, and print a summary. Exits non-zero when the job did not
/// fully complete, after the state needed for resume is saved.
async fn execute_migration(
    config: &Config,
    job: MigrationJob,
    cli: &Cli,
    cancel_token: &CancellationToken,
) -> Result<(), DbError> {
    let table_order = job.tables.clone();

    let source = driver::connect(&config.source).await?;
    let target = driver::connect(&config.target).await?;
    target.init_schema().await?;

    let started = Instant::now();
    let mut runner = MigrationRunner::new(job);
    let result = runner.run(source.clone(), target.clone(), cancel_token).await;

    source.close().await?;
    target.close().await?;
    let report = result?;

    if let Some(ref path) = cli.state_file {
        report.save(path)?;
        info!(path = %path.display(), "state file saved");
    }

    if cli.output_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report, &table_order, started.elapsed().as_secs_f64());
    }

    match report.to_error() {
        None => Ok(()),
        Some(err) => Err(err),
    }
}

fn print_summary(report: &MigrationReport, table_order: &[String], duration: f64) {
    let headline = match report.status {
        JobStatus::Completed => "Migration completed!",
        JobStatus::PartiallyCompleted => "Migration partially completed.",
        _ => "Migration failed.",
    };
    println!("\n{}", headline);
    println!("  Run ID: {}", report.run_id);
    println!("  Duration: {:.2}s", duration);
    println!("  Rows: {}", report.total_rows());

    for table in table_order {
        let Some(t) = report.tables.get(table) else {
            continue;
        };
        let status = match t.status {
            TableStatus::Completed => "OK",
            TableStatus::Failed => "FAILED",
            TableStatus::Copying => "INTERRUPTED",
            TableStatus::Pending => "PENDING",
        };
        println!(
            "  {:12} {} (rows: {}, offset: {})",
            status, table, t.rows_copied, t.committed_offset
        );
        if let Some(ref err) = t.error {
            println!("    Error: {}", err);
        }
    }
}

async fn check_connection(which: &str, db: &dbbridge::DbConfig) -> Result<u128, DbError> {
    let start = Instant::now();
    let outcome = async {
        let drv: Arc<dyn Driver> = driver::connect(db).await?;
        drv.ping().await?;
        drv.close().await?;
        Ok::<_, DbError>(())
    }
    .await;
    let latency = start.elapsed().as_millis();

    match outcome {
        Ok(()) => {
            println!("  {} ({}): OK ({}ms)", which, db.backend, latency);
            Ok(latency)
        }
        Err(e) => {
            println!("  {} ({}): FAILED ({}ms)", which, db.backend, latency);
            println!("    Error: {}", e);
            Err(e)
        }
    }
}

fn health_json(backend: &str, result: &Result<u128, DbError>) -> serde_json::Value {
    match result {
        Ok(latency) => serde_json::json!({
            "backend": backend,
            "connected": true,
            "latency_ms": latency,
        }),
        Err(e) => serde_json::json!({
            "backend": backend,
            "connected": false,
            "error": e.to_string(),
        }),
    }
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// SIGINT and SIGTERM both cancel the returned token; the runner then
/// stops at the next batch boundary and the state file still gets saved.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    let token_int = cancel_token.clone();
    tokio::spawn(async move {
        if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
            sigint.recv().await;
            eprintln!("\nReceived SIGINT. Shutting down gracefully...");
            token_int.cancel();
        }
    });

    let token_term = cancel_token.clone();
    tokio::spawn(async move {
        if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
            sigterm.recv().await;
            eprintln!("\nReceived SIGTERM. Shutting down gracefully...");
            token_term.cancel();
        }
    });

    cancel_token
}

#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Shutting down gracefully...");
            token.cancel();
        }
    });

    cancel_token
}
