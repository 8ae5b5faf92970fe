//! Full analysis against the configured classifier gateway.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, bail};
use cadence_core::{AnalysisOutcome, AnalysisReport, CognitivePipeline, GatewayClassifier};
use clap::Args;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ConfigLoader;
use crate::snapshot::Snapshot;

/// Analyze arguments.
#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    /// Snapshot JSON with attempts, sessions and history
    #[arg(short, long)]
    pub input: PathBuf,

    /// User to analyze (defaults to the snapshot's user)
    #[arg(long)]
    pub user: Option<String>,

    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: AnalyzeArgs) -> Result<()> {
    let config = ConfigLoader::load()?;
    if !config.classifier.enabled {
        bail!("Classifier is disabled; set classifier.enabled = true or use `cadence features`");
    }

    let snapshot = Snapshot::load(&args.input)?;
    let user = snapshot.resolve_user(args.user.as_deref())?;
    let store = Arc::new(snapshot.seed(&user).await?);
    let classifier = Arc::new(GatewayClassifier::from_env(config.classifier.clone()));
    let pipeline = CognitivePipeline::new(config, store.clone(), store, classifier)?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling analysis");
            ctrl_c.cancel();
        }
    });

    info!(user_id = %user, "Analyzing");
    match pipeline.analyze(&user, &cancel).await? {
        AnalysisOutcome::InsufficientData {
            available,
            required,
        } => {
            println!("Not enough data for {user}: {available} attempts, {required} required.");
        }
        AnalysisOutcome::Completed(report) if args.json => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        AnalysisOutcome::Completed(report) => print_report(&report),
    }
    Ok(())
}

fn print_report(report: &AnalysisReport) {
    let c = &report.classification;
    println!("{} ({:.0}% confidence)", c.cognitive_type, c.confidence_score * 100.0);
    println!("{}", c.reasoning);
    println!();

    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Field").fg(Color::Cyan),
        Cell::new("Value").fg(Color::Cyan),
    ]);

    let stability = &report.local.stability;
    table.add_row(vec![
        Cell::new("Stability"),
        Cell::new(format!("{:.1} ({})", stability.csi_display(), stability.label)),
    ]);
    table.add_row(vec![
        Cell::new("Predictability"),
        Cell::new(format!(
            "{:.0} ({})",
            c.cognitive_predictability_index, c.cpi_label
        )),
    ]);
    table.add_row(vec![
        Cell::new("Drift"),
        Cell::new(match (&c.drift_description, report.drift_detected()) {
            (Some(description), true) => description.clone(),
            (None, true) => "detected".to_string(),
            (_, false) => "none".to_string(),
        }),
    ]);
    table.add_row(vec![
        Cell::new("Fingerprint"),
        Cell::new(&report.fingerprint.fingerprint_id),
    ]);
    table.add_row(vec![
        Cell::new("Difficulty"),
        Cell::new(report.recommendation.recommended_difficulty),
    ]);
    table.add_row(vec![
        Cell::new("Practice"),
        Cell::new(format!(
            "{} ({})",
            report.recommendation.practice_type, report.recommendation.time_limit_mode
        )),
    ]);
    table.add_row(vec![
        Cell::new("Best hour"),
        Cell::new(format!(
            "{:02}:00",
            report.energy_profile.best_performance_hour
        )),
    ]);
    if let Some(minutes) = report.energy_profile.session_duration_recommendation_minutes {
        table.add_row(vec![
            Cell::new("Session length"),
            Cell::new(format!("{minutes} min")),
        ]);
    }
    println!("{table}");

    if !report.events.is_empty() {
        println!();
        println!("Events:");
        for event in &report.events {
            println!("  [{}] {}", event.event_type, event.description);
        }
    }
    println!();
    println!("Strategy: {}", c.learning_strategy_summary);
}
