//! Runs the search engine for a fixed time on synthetic data, then prints the
//! final status as JSON.
//!
//! Environment:
//! - `SIFTER_LOCAL_DIR`: where the ledger is kept (default `./sifter-state`)
//! - `SIFTER_DEMO_SECS`: how long to search (default 10)
//! - `RUST_LOG`: log filter (default `info`)

mod synthetic;

use anyhow::Context;
use sf_engine::{Engine, EngineConfig, EngineEvent};
use sf_models::{metrics, KNearestNeighbors, LogisticRegression, SOLVERS};
use sf_search::{ParameterRules, SearchSpace};
use sf_types::ProblemType;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn logistic_space() -> SearchSpace {
    SearchSpace::new("Logistic Regression", Arc::new(LogisticRegression))
        .add_values("penalty", ["l1", "l2"])
        .add_float_steps("C", 0.1, 2.0, 0.1)
        .add_int_range("max_iter", 50, 300)
        .add_values("solver", SOLVERS)
        // these solvers only handle l2 penalties
        .with_rules(ParameterRules::new(["solver", "penalty"], |params| {
            if matches!(params.get_str("solver")?, "newton-cg" | "sag" | "lbfgs") {
                params.set("penalty", "l2")?;
            }
            Ok(())
        }))
}

fn knn_space() -> SearchSpace {
    SearchSpace::new("KNN", Arc::new(KNearestNeighbors::classifier()))
        .add_int_range("n_neighbors", 1, 30)
        .add_values("weights", ["uniform", "distance"])
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let local_dir = std::env::var("SIFTER_LOCAL_DIR").unwrap_or_else(|_| "./sifter-state".to_string());
    let secs = match std::env::var("SIFTER_DEMO_SECS") {
        Ok(value) => value
            .parse::<u64>()
            .with_context(|| format!("SIFTER_DEMO_SECS must be a whole number of seconds, got '{value}'"))?,
        Err(_) => 10,
    };

    let score = metrics::scorer("roc_auc").context("roc_auc scorer is missing")?;
    let (events_tx, events_rx) = crossbeam_channel::unbounded();
    let config = EngineConfig::new(&local_dir, ProblemType::Classification, score)
        .with_search_space(logistic_space())
        .with_search_space(knn_space())
        .with_persistence(true)
        .with_event_sender(events_tx);

    let engine = Arc::new(Engine::new(config)?);
    engine.load_data(synthetic::classification(600, 100, 7)?)?;
    if engine.restore_ledger()? {
        info!(local_dir = %local_dir, "resuming from saved ledger");
    }

    // the channel closes when the engine is dropped
    let event_log = tokio::task::spawn_blocking(move || {
        for event in events_rx {
            match event {
                EngineEvent::Improved { space_id, score, .. } => info!(space = %space_id, score, "improved"),
                EngineEvent::EnsembleUpdated { members, score } => {
                    info!(members = ?members, score, "ensemble updated")
                }
                EngineEvent::Fatal { error, .. } => warn!(%error, "search stopped on a fatal error"),
                _ => {}
            }
        }
    });

    engine.restart()?;
    info!(secs, "searching");

    let mut progress = tokio::time::interval(Duration::from_secs(2));
    let deadline = tokio::time::sleep(Duration::from_secs(secs));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                info!("ctrl-c received");
                break;
            }
            _ = progress.tick() => {
                let status = engine.request_status();
                info!(
                    rounds = status.total_rounds,
                    failed = status.failed_rounds,
                    best = ?status.best_id,
                    score = ?status.best_score,
                    "progress"
                );
            }
        }
    }

    engine.interrupt();
    let waiter = Arc::clone(&engine);
    let stopped = tokio::task::spawn_blocking(move || waiter.wait_until_stopped(Duration::from_secs(300))).await?;
    if !stopped {
        warn!("search did not stop in time");
    }

    let status = engine.request_status();
    println!("{}", serde_json::to_string_pretty(&status)?);
    if let Some(prediction) = engine.best_test_prediction() {
        info!(rows = prediction.len(), best = ?status.best_id, "test predictions ready");
    }

    drop(engine);
    event_log.await?;
    Ok(())
}
