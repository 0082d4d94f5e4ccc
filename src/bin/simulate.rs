use clap::Parser;
use flatland_sim::config::{init_tracing_as, LogFormat};
use flatland_sim::constants::{START_LEVEL, TICK_MS};
use flatland_sim::entity::EntityId;
use flatland_sim::level::{Level, StepContext};
use flatland_sim::registry::ClassRegistry;
use flatland_sim::world::World;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Steps one level headlessly with the server's engine and reports what happened.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[arg(long, default_value_t = 200)]
    steps: u64,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long, default_value = START_LEVEL)]
    level: String,
    /// JSON level definitions to use instead of the built-in world.
    #[arg(long)]
    levels: Option<PathBuf>,
    #[arg(long)]
    summary_out: Option<PathBuf>,
}

#[derive(Clone, Debug, Serialize)]
struct StepLine {
    step: u64,
    #[serde(rename = "nowMs")]
    now_ms: u64,
    entities: usize,
    moving: usize,
    speaking: usize,
    removed: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
struct AnomalyRecord {
    step: u64,
    message: String,
}

#[derive(Clone, Debug, Serialize)]
struct RunSummary {
    #[serde(rename = "runId")]
    run_id: String,
    seed: u64,
    level: String,
    steps: u64,
    #[serde(rename = "startedAtMs")]
    started_at_ms: u64,
    #[serde(rename = "finishedAtMs")]
    finished_at_ms: u64,
    #[serde(rename = "entitiesAtStart")]
    entities_at_start: usize,
    #[serde(rename = "entitiesAtEnd")]
    entities_at_end: usize,
    #[serde(rename = "classCounts")]
    class_counts: BTreeMap<String, usize>,
    deaths: usize,
    #[serde(rename = "cellsMoved")]
    cells_moved: usize,
    anomalies: Vec<String>,
}

fn main() {
    init_tracing_as(LogFormat::Json);
    let cli = Cli::parse();
    let seed = cli.seed.unwrap_or_else(now_ms);
    let started_at_ms = now_ms();
    let run_id = default_run_id(seed, started_at_ms);

    let registry = ClassRegistry::with_builtin_classes();
    let world = match cli.levels.as_deref() {
        Some(path) => World::load(path, &registry, seed),
        None => World::builtin(&registry, seed),
    };
    let mut world = match world {
        Ok(world) => world,
        Err(error) => {
            emit_log(
                "error",
                "world_build_failed",
                &run_id,
                None,
                json!({ "error": error.to_string() }),
            );
            std::process::exit(2);
        }
    };
    let Some(level) = world.level_mut(&cli.level) else {
        emit_log(
            "error",
            "unknown_level",
            &run_id,
            None,
            json!({ "level": cli.level }),
        );
        std::process::exit(2);
    };

    emit_log(
        "info",
        "run_started",
        &run_id,
        None,
        json!({ "seed": seed, "level": cli.level, "steps": cli.steps }),
    );

    let entities_at_start = level.len();
    let mut anomalies = Vec::new();
    let mut anomaly_records = Vec::new();
    let mut anomaly_seen = HashSet::new();
    let mut deaths = 0usize;
    let mut cells_moved = 0usize;

    for step in 1..=cli.steps {
        let now = step * TICK_MS;
        let removed = level.step(&StepContext {
            now_ms: now,
            registry: &registry,
        });
        deaths += removed.len();

        let line = step_line(level, step, now, &removed);
        cells_moved += line.moving;
        for message in collect_level_anomalies(level) {
            push_anomaly(
                &mut anomalies,
                &mut anomaly_records,
                &mut anomaly_seen,
                step,
                message,
            );
        }
        match serde_json::to_string(&line) {
            Ok(text) => println!("{text}"),
            Err(error) => {
                emit_log(
                    "error",
                    "step_encode_failed",
                    &run_id,
                    Some(step),
                    json!({ "error": error.to_string() }),
                );
            }
        }
    }

    for anomaly in &anomaly_records {
        emit_log(
            "warn",
            "anomaly_detected",
            &run_id,
            Some(anomaly.step),
            json!({ "message": anomaly.message }),
        );
    }

    let summary = RunSummary {
        run_id: run_id.clone(),
        seed,
        level: cli.level.clone(),
        steps: cli.steps,
        started_at_ms,
        finished_at_ms: now_ms(),
        entities_at_start,
        entities_at_end: level.len(),
        class_counts: class_counts(level),
        deaths,
        cells_moved,
        anomalies,
    };

    let mut summary_out_written: Option<String> = None;
    if let Some(path) = cli.summary_out.as_ref() {
        if let Err(error) = write_summary(path, &summary) {
            emit_log(
                "error",
                "summary_write_failed",
                &run_id,
                None,
                json!({
                    "path": path.to_string_lossy(),
                    "error": error.to_string(),
                }),
            );
            std::process::exit(2);
        }
        summary_out_written = Some(path.to_string_lossy().to_string());
    }

    emit_log(
        "info",
        "run_finished",
        &run_id,
        Some(cli.steps),
        json!({
            "entitiesAtEnd": summary.entities_at_end,
            "deaths": summary.deaths,
            "anomalyCount": anomaly_records.len(),
            "summaryOut": summary_out_written,
        }),
    );

    if !summary.anomalies.is_empty() {
        std::process::exit(1);
    }
}

fn step_line(level: &Level, step: u64, now_ms: u64, removed: &[EntityId]) -> StepLine {
    StepLine {
        step,
        now_ms,
        entities: level.len(),
        moving: level
            .iter()
            .filter(|entity| (entity.x, entity.y) != (entity.prev_x, entity.prev_y))
            .count(),
        speaking: level.iter().filter(|entity| entity.speech.is_some()).count(),
        removed: removed.iter().map(EntityId::to_string).collect(),
    }
}

fn collect_level_anomalies(level: &Level) -> Vec<String> {
    let mut anomalies = Vec::new();
    for entity in level.iter() {
        if entity.x < 0 || entity.y < 0 || entity.x >= level.width() || entity.y >= level.height() {
            anomalies.push(format!(
                "entity outside grid after wrap: {} ({}, {})",
                entity.name, entity.x, entity.y
            ));
        }
        if !entity.temperature.is_finite() || !entity.inertia.is_finite() {
            anomalies.push(format!("non-finite physics state: {}", entity.name));
        }
        if entity.inertia < 0.0 {
            anomalies.push(format!("negative inertia: {} {}", entity.name, entity.inertia));
        }
        for child in &entity.children {
            if level.get(*child).and_then(|c| c.parent) != Some(entity.id) {
                anomalies.push(format!("child link out of sync: {}", entity.name));
            }
        }
    }
    let mut ids = HashSet::new();
    if !level.iter().all(|entity| ids.insert(entity.id)) {
        anomalies.push("duplicate entity id".to_string());
    }
    anomalies
}

fn class_counts(level: &Level) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for entity in level.iter() {
        *counts.entry(entity.class_name.clone()).or_insert(0) += 1;
    }
    counts
}

fn push_anomaly(
    anomalies: &mut Vec<String>,
    anomaly_records: &mut Vec<AnomalyRecord>,
    anomaly_seen: &mut HashSet<String>,
    step: u64,
    message: String,
) {
    anomaly_records.push(AnomalyRecord {
        step,
        message: message.clone(),
    });
    if anomaly_seen.insert(message.clone()) {
        anomalies.push(message);
    }
}

fn default_run_id(seed: u64, timestamp_ms: u64) -> String {
    format!("sim-{seed}-{timestamp_ms}")
}

/// Structured run events go through the JSON tracing subscriber on stderr.
fn emit_log(level: &str, event: &str, run_id: &str, step: Option<u64>, details: Value) {
    let details = with_step(details, step);
    match level {
        "error" => tracing::error!(event, run_id, %details),
        "warn" => tracing::warn!(event, run_id, %details),
        _ => tracing::info!(event, run_id, %details),
    }
}

fn with_step(mut details: Value, step: Option<u64>) -> Value {
    if let (Some(step), Some(map)) = (step, details.as_object_mut()) {
        map.insert("step".to_string(), json!(step));
    }
    details
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn write_summary(path: &Path, summary: &RunSummary) -> io::Result<()> {
    let summary_text = serde_json::to_string_pretty(summary).map_err(io::Error::other)?;
    std::fs::write(path, summary_text)
}
