mod config;
mod serve_cmd;
mod status_cmd;
mod work_cmd;

use anyhow::Context;
use clap::{Parser, Subcommand};

use coursegen_db::pool;

use config::CoursegenConfig;

#[derive(Parser)]
#[command(name = "coursegen", about = "Education-content generation backend")]
struct Cli {
    /// Database URL (overrides COURSEGEN_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a coursegen config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = "postgresql://localhost:5432/coursegen")]
        db_url: String,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Initialize the coursegen database (create + migrate)
    DbInit,
    /// Run the HTTP API with the embedded worker loop
    Serve {
        /// Bind address
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        /// Port to listen on
        #[arg(long, default_value_t = 8080)]
        port: u16,
        /// Serve the API without the embedded worker
        #[arg(long)]
        no_worker: bool,
    },
    /// Run the queue worker
    Work {
        /// Consume at most one queue message, then exit
        #[arg(long)]
        once: bool,
    },
    /// Show job status (omit job_id to list recent jobs)
    Status {
        /// Job ID to show status for
        job_id: Option<String>,
    },
    /// Cancel a job
    Cancel {
        /// Job ID to cancel
        job_id: String,
    },
}

/// Execute the `coursegen init` command: write config file.
fn cmd_init(db_url: &str, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile {
        database: config::DatabaseSection {
            url: db_url.to_string(),
        },
        llm: config::LlmSection::default(),
        search: config::SearchSection::default(),
    };

    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  database.url = {db_url}");
    println!();
    println!("API keys are read from the environment:");
    println!("  ANTHROPIC_API_KEY, OPENAI_API_KEY, COURSEGEN_SEARCH_API_KEY");
    println!();
    println!("Next: run `coursegen db-init` to create and migrate the database.");

    Ok(())
}

/// Execute the `coursegen db-init` command: create database and run
/// migrations.
async fn cmd_db_init(cli_db_url: Option<&str>) -> anyhow::Result<()> {
    let resolved = CoursegenConfig::resolve(cli_db_url)?;

    println!("Initializing coursegen database...");

    // 1. Create the database if it does not exist.
    pool::ensure_database_exists(&resolved.db_config).await?;

    // 2. Connect to the target database.
    let db_pool = pool::create_pool(&resolved.db_config).await?;

    // 3. Run migrations.
    pool::run_migrations(&db_pool).await?;

    // 4. Print success with table counts.
    let counts = pool::table_counts(&db_pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in &counts {
        println!("  {table}: {count} rows");
    }

    // 5. Clean shutdown.
    db_pool.close().await;

    println!("coursegen db-init complete.");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { db_url, force } => {
            cmd_init(&db_url, force)?;
        }
        Commands::DbInit => {
            cmd_db_init(cli.database_url.as_deref()).await?;
        }
        Commands::Serve {
            bind,
            port,
            no_worker,
        } => {
            let resolved = CoursegenConfig::resolve(cli.database_url.as_deref())?;
            let registry = resolved.build_registry()?;
            let search = resolved.build_search();
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result =
                serve_cmd::run_serve(db_pool.clone(), registry, search, &bind, port, !no_worker)
                    .await;
            db_pool.close().await;
            result?;
        }
        Commands::Work { once } => {
            let resolved = CoursegenConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = work_cmd::run_work(&db_pool, &resolved, once).await;
            db_pool.close().await;
            result?;
        }
        Commands::Status { job_id } => {
            let resolved = CoursegenConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = status_cmd::run_status(&db_pool, job_id.as_deref()).await;
            db_pool.close().await;
            result?;
        }
        Commands::Cancel { job_id } => {
            let resolved = CoursegenConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let id = uuid::Uuid::parse_str(&job_id)
                .with_context(|| format!("invalid job ID: {job_id}"))?;
            let result = coursegen_core::service::cancel_generation(&db_pool, id).await;
            db_pool.close().await;
            result?;
            println!("Job {job_id} cancelled.");
        }
    }

    Ok(())
}
