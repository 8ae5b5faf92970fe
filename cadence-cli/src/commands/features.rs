//! Offline feature computation.
//!
//! Runs the deterministic analyzers over a snapshot file with no classifier
//! and no storage.

use std::path::PathBuf;

use anyhow::Result;
use cadence_core::{CadenceError, LocalAnalysis, LocalAnalyzer};
use clap::Args;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};

use crate::config::ConfigLoader;
use crate::snapshot::Snapshot;

/// Features arguments.
#[derive(Args, Debug)]
pub struct FeaturesArgs {
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

pub fn run(args: FeaturesArgs) -> Result<()> {
    let config = ConfigLoader::load()?;
    let snapshot = Snapshot::load(&args.input)?;
    let user = snapshot.resolve_user(args.user.as_deref())?;
    let window = snapshot.window_for(&user);

    let local = match LocalAnalyzer::new(&config).compute(&window) {
        Ok(local) => local,
        Err(CadenceError::InsufficientData {
            available,
            required,
        }) => {
            println!("Not enough data for {user}: {available} attempts, {required} required.");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&local.payload())?);
    } else {
        println!("{}", features_table(&local));
        println!();
        println!("{}", topics_table(&local));
    }
    Ok(())
}

/// Summary table of one local analysis.
pub fn features_table(local: &LocalAnalysis) -> Table {
    let f = &local.features;
    let energy = &local.energy;

    let rows: Vec<(&str, String)> = vec![
        ("Attempts", f.total_attempts.to_string()),
        ("Sessions", f.total_sessions.to_string()),
        ("Accuracy", percent(f.overall_accuracy)),
        ("Avg response", format!("{} ms", f.avg_response_time_ms)),
        ("Response variance", f.response_time_variance.to_string()),
        ("Retry ratio", format!("{:.3}", f.retry_ratio)),
        ("Hint usage", percent(f.hint_usage_rate)),
        ("Abandonment", percent(f.abandonment_rate)),
        ("Improvement", format!("{:+.3}", f.session_improvement_rate)),
        ("Consistency", format!("{:.3}", f.consistency_index)),
        ("Hesitation bursts", f.hesitation_burst_count.to_string()),
        (
            "CSI",
            format!(
                "{:.1} ({})",
                local.stability.csi_display(),
                local.stability.label
            ),
        ),
        (
            "Type changes",
            local.stability.drift.type_changes.to_string(),
        ),
        ("Best hour", format!("{:02}:00", energy.best_performance_hour)),
        (
            "Fatigue point",
            energy
                .avg_session_fatigue_point_minutes
                .map(|m| format!("{m} min"))
                .unwrap_or_else(|| "none".to_string()),
        ),
        ("Accuracy decay", format!("{:.3}", energy.accuracy_decay_rate)),
        (
            "At risk",
            if local.at_risk { "yes" } else { "no" }.to_string(),
        ),
    ];

    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Metric").fg(Color::Cyan),
        Cell::new("Value").fg(Color::Cyan),
    ]);
    for (metric, value) in rows {
        table.add_row(vec![Cell::new(metric), Cell::new(value)]);
    }
    table
}

fn topics_table(local: &LocalAnalysis) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Topic").fg(Color::Cyan),
        Cell::new("Correct").fg(Color::Cyan),
        Cell::new("Total").fg(Color::Cyan),
        Cell::new("Errors").fg(Color::Cyan),
    ]);

    for (topic, acc) in &local.features.topic_accuracy {
        let weak = local.features.weak_topics.contains(topic);
        let errors = local.signals.error_clustering.get(topic).copied().unwrap_or(0);
        let name = Cell::new(topic.as_str());
        table.add_row(vec![
            if weak { name.fg(Color::Red) } else { name },
            Cell::new(acc.correct),
            Cell::new(acc.total),
            Cell::new(errors),
        ]);
    }
    table
}

fn percent(ratio: f64) -> String {
    format!("{:.1}%", ratio * 100.0)
}
