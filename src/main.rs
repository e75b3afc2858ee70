use std::{collections::HashMap, path::Path, process, sync::Arc};

use nodecache::{
    cache::{CacheConfig, CacheEngine, KeyBuilder},
    config::{self, Command, KeyArgs, ReplayArgs},
    infra::{
        error::InfraError,
        scenario::{self, ReplaySummary},
        telemetry,
    },
};
use serde::Serialize;
use serde_json::Value;
use tracing::{Dispatch, Level, dispatcher, error};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &InfraError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(std::io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), InfraError> {
    let (cli_args, settings) = config::load_with_cli()?;

    telemetry::init(&settings.logging)?;
    let cache_config = CacheConfig::from(&settings.cache);

    match cli_args.command {
        Command::Key(args) => run_key(args).await,
        Command::Replay(args) => run_replay(&cache_config, args).await,
    }
}

async fn run_key(args: KeyArgs) -> Result<(), InfraError> {
    let builder = match args.documents.as_deref() {
        Some(path) => KeyBuilder::with_documents(Arc::new(load_documents(path).await?)),
        None => KeyBuilder::new(),
    };

    let variables = args
        .variables
        .as_deref()
        .map(serde_json::from_str::<Value>)
        .transpose()
        .map_err(|err| InfraError::input(format!("--variables is not valid JSON: {err}")))?;

    let key = builder.build_key(
        args.query_id.as_deref(),
        args.query.as_deref(),
        variables.as_ref(),
        args.operation_name.as_deref(),
    )?;
    println!("{key}");
    Ok(())
}

async fn load_documents(path: &Path) -> Result<HashMap<String, String>, InfraError> {
    let raw = tokio::fs::read_to_string(path).await?;
    serde_json::from_str(&raw)
        .map_err(|err| InfraError::input(format!("{}: {err}", path.display())))
}

#[derive(Serialize)]
struct SummaryLine<'a> {
    summary: &'a ReplaySummary,
}

async fn run_replay(config: &CacheConfig, args: ReplayArgs) -> Result<(), InfraError> {
    let scenario = scenario::load(&args.scenario).await?;
    let engine = CacheEngine::builder(config)
        .documents(Arc::new(scenario.documents.clone()))
        .build();

    let (reports, summary) = scenario::replay(&engine, &scenario);
    for report in &reports {
        println!("{}", serde_json::to_string(report)?);
    }
    println!("{}", serde_json::to_string(&SummaryLine { summary: &summary })?);
    Ok(())
}
