//! `sdc-loader` entry point (spec.md §6): parses CLI flags, wires up the
//! Postgres pool and [`Orchestrator`], and drives tap lines from stdin to
//! completion, grounded on `examples/estuary-flow/crates/agent/src/main.rs`'s
//! runtime setup.

use anyhow::Context;
use clap::Parser;
use pg_sync::remote_schema::SchemaCache;
use sdc_loader::config::Config;
use sdc_loader::orchestrator::Orchestrator;
use sdc_loader::telemetry;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tap_protocol::MessageReader;

#[derive(Debug, Parser)]
#[clap(author, version, about = "Streams a tap's line protocol into PostgreSQL", long_about = None)]
struct Args {
    /// URL of the destination Postgres database.
    #[clap(long, env = "DATABASE_URL")]
    database_url: url::Url,
    /// Path to a JSON config file carrying the options in spec.md §6.
    #[clap(long, short = 'c')]
    config: Option<PathBuf>,
    /// Overrides the config file's `postgres_schema`.
    #[clap(long)]
    postgres_schema: Option<String>,
    /// Overrides the config file's `disable_collection`.
    #[clap(long)]
    disable_collection: bool,
    #[clap(long, default_value = "5")]
    max_connections: u32,
}

fn main() -> Result<(), anyhow::Error> {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting tracing default failed");

    let args = Args::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let task = runtime.spawn(async move { async_main(args).await });
    let result = runtime.block_on(task);
    runtime.shutdown_timeout(std::time::Duration::from_secs(5));
    result?
}

async fn async_main(args: Args) -> Result<(), anyhow::Error> {
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(postgres_schema) = args.postgres_schema {
        config.postgres_schema = postgres_schema;
    }
    if args.disable_collection {
        config.disable_collection = true;
    }

    if !config.disable_collection {
        telemetry::send_usage_stats_fire_and_forget(None);
    }

    let pool = pg_sync::pool::connect(&args.database_url, args.max_connections)
        .await
        .context("connecting to the destination database")?;
    let cache = Arc::new(SchemaCache::new(pool, config.postgres_schema.clone()));
    let mut orchestrator = Orchestrator::new(cache, config);

    let (tx, mut rx) = tokio::sync::mpsc::channel(64);
    let reader_task = tokio::task::spawn_blocking(move || -> Result<(), tap_protocol::LineError> {
        let stdin = std::io::stdin();
        let reader = MessageReader::new(stdin.lock());
        for line in reader {
            let line = line?;
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
        Ok(())
    });

    let stdout = std::io::stdout();
    let mut exit_code = 0;
    let mut line_error: Option<anyhow::Error> = None;

    while let Some(line) = rx.recv().await {
        match orchestrator.handle(line.message).await {
            Ok(states) => emit_states(&stdout, states)?,
            Err(error) => {
                tracing::error!(%error, line = line.number, "fatal error handling tap line");
                line_error = Some(error.into());
                exit_code = 1;
                break;
            }
        }
    }
    drop(rx);

    match reader_task.await {
        Ok(Ok(())) => {}
        Ok(Err(error)) if line_error.is_none() => {
            tracing::error!(%error, "fatal error reading tap input");
            line_error = Some(error.into());
            exit_code = 1;
        }
        Ok(Err(_)) => {}
        Err(join_error) => {
            tracing::error!(%join_error, "stdin reader task panicked");
            if line_error.is_none() {
                exit_code = 1;
            }
        }
    }

    let (states, failures) = orchestrator.shutdown().await;
    emit_states(&stdout, states)?;
    for (stream, error) in &failures {
        tracing::error!(stream, %error, "fatal error flushing stream at shutdown");
        exit_code = 1;
    }

    tracing::info!(streams = orchestrator.stream_count(), "loader finished");

    if let Some(error) = line_error {
        return Err(error);
    }
    if exit_code != 0 {
        anyhow::bail!("one or more streams failed to flush");
    }
    Ok(())
}

fn emit_states(stdout: &std::io::Stdout, states: Vec<serde_json::Value>) -> anyhow::Result<()> {
    let mut handle = stdout.lock();
    for state in states {
        let envelope = serde_json::json!({"type": "STATE", "value": state});
        writeln!(handle, "{}", envelope)?;
    }
    Ok(())
}
