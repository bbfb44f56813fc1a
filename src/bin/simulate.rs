use clap::Parser;
use manhunt_server::app::now_ms;
use manhunt_server::constants::MIN_PLAYERS_TO_START;
use manhunt_server::cycle;
use manhunt_server::errors::ApiError;
use manhunt_server::game::{ActionOutcome, Game};
use manhunt_server::types::{GameState, NewGameInput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};

const STEP_MS: u64 = 60_000;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[arg(long)]
    single: bool,
    #[arg(long)]
    players: Option<usize>,
    #[arg(long)]
    churn: bool,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    match_id: Option<String>,
    #[arg(long)]
    summary_out: Option<PathBuf>,
}

#[derive(Clone, Debug, Serialize)]
struct Scenario {
    name: String,
    players: usize,
    churn: bool,
    seed: u64,
}

#[derive(Clone, Debug, Serialize)]
struct ScenarioResultLine {
    scenario: String,
    seed: u64,
    players: usize,
    churn: bool,
    steps: u64,
    kills: u32,
    #[serde(rename = "selfReports")]
    self_reports: u32,
    kicks: u32,
    shuffles: u32,
    #[serde(rename = "notificationsSent")]
    notifications_sent: usize,
    #[serde(rename = "durationMs")]
    duration_ms: u64,
    winner: Option<String>,
    ending: String,
    anomalies: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
struct AnomalyRecord {
    step: u64,
    message: String,
}

#[derive(Clone, Debug, Serialize)]
struct ScenarioRunResult {
    #[serde(flatten)]
    result: ScenarioResultLine,
    #[serde(rename = "anomalyRecords")]
    anomaly_records: Vec<AnomalyRecord>,
    finished_step: u64,
}

#[derive(Clone, Debug, Serialize)]
struct RunSummary {
    #[serde(rename = "matchId")]
    match_id: String,
    #[serde(rename = "startedAtMs")]
    started_at_ms: u64,
    #[serde(rename = "finishedAtMs")]
    finished_at_ms: u64,
    #[serde(rename = "scenarioCount")]
    scenario_count: usize,
    #[serde(rename = "anomalyCount")]
    anomaly_count: usize,
    #[serde(rename = "averageSteps")]
    average_steps: u64,
    #[serde(rename = "endingCounts")]
    ending_counts: BTreeMap<String, usize>,
    scenarios: Vec<ScenarioResultLine>,
}

#[derive(Clone, Debug, Serialize)]
struct StructuredLogLine {
    #[serde(rename = "timestampMs")]
    timestamp_ms: u64,
    level: String,
    event: String,
    #[serde(rename = "matchId")]
    match_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    scenario: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    step: Option<u64>,
    details: Value,
}

#[derive(Clone, Debug)]
enum StepAction {
    Shuffle,
    Kick(String),
    SelfReport(String),
    Kill(String),
}

fn main() {
    let cli = Cli::parse();
    let scenarios = resolve_scenarios(&cli);
    let run_started_at_ms = now_ms();
    let seed_hint = scenarios.first().map(|scenario| scenario.seed).unwrap_or(0);
    let match_id = cli
        .match_id
        .clone()
        .unwrap_or_else(|| default_match_id(seed_hint, run_started_at_ms));
    let mut has_anomaly = false;
    let mut scenario_results = Vec::new();
    let mut ending_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut total_steps = 0u64;
    let mut total_anomalies = 0usize;

    for scenario in scenarios {
        emit_log(
            "info",
            "scenario_started",
            &match_id,
            Some(&scenario.name),
            Some(scenario.seed),
            None,
            json!({
                "players": scenario.players,
                "churn": scenario.churn,
            }),
        );
        let scenario_run = run_scenario(&scenario);

        for anomaly in &scenario_run.anomaly_records {
            emit_log(
                "warn",
                "anomaly_detected",
                &match_id,
                Some(&scenario.name),
                Some(scenario.seed),
                Some(anomaly.step),
                json!({
                    "message": anomaly.message,
                }),
            );
        }

        if !scenario_run.result.anomalies.is_empty() {
            has_anomaly = true;
        }
        total_anomalies += scenario_run.anomaly_records.len();
        total_steps += scenario_run.result.steps;
        *ending_counts
            .entry(scenario_run.result.ending.clone())
            .or_insert(0) += 1;

        emit_log(
            "info",
            "scenario_finished",
            &match_id,
            Some(&scenario.name),
            Some(scenario.seed),
            Some(scenario_run.finished_step),
            json!({
                "ending": scenario_run.result.ending,
                "winner": scenario_run.result.winner,
                "steps": scenario_run.result.steps,
                "anomalyCount": scenario_run.anomaly_records.len(),
            }),
        );

        println!(
            "{}",
            serde_json::to_string(&scenario_run.result).expect("scenario result should serialize")
        );
        scenario_results.push(scenario_run.result);
    }

    let run_finished_at_ms = now_ms();
    let summary = build_run_summary(
        match_id.clone(),
        run_started_at_ms,
        run_finished_at_ms,
        scenario_results,
        ending_counts,
        total_anomalies,
        total_steps,
    );

    let mut summary_out_written: Option<String> = None;
    if let Some(path) = cli.summary_out.as_ref() {
        if let Err(error) = write_summary(path, &summary) {
            emit_log(
                "error",
                "summary_write_failed",
                &match_id,
                None,
                None,
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
        &match_id,
        None,
        None,
        None,
        json!({
            "scenarioCount": summary.scenario_count,
            "anomalyCount": summary.anomaly_count,
            "averageSteps": summary.average_steps,
            "endingCounts": summary.ending_counts,
            "summaryOut": summary_out_written,
        }),
    );

    if has_anomaly {
        std::process::exit(1);
    }
}

fn run_scenario(scenario: &Scenario) -> ScenarioRunResult {
    let mut rng = StdRng::seed_from_u64(scenario.seed);
    let input = NewGameInput {
        name: format!("stress ring {}", scenario.name),
        description: "synthetic elimination round".to_string(),
        password: String::new(),
        join_disabled: false,
    };
    let mut game = Game::new("sim-ring".to_string(), "overseer".to_string(), &input, 0)
        .expect("scenario game input is valid");
    for index in 0..scenario.players {
        game.join(&format!("runner{index:02}"), None, 0)
            .expect("a forming game accepts simulated players");
    }
    let start_outcome = game.start(&mut rng, 0).expect("a filled game starts");

    let mut notifications_sent = start_outcome.deliveries.len();
    let mut kills = 0u32;
    let mut self_reports = 0u32;
    let mut kicks = 0u32;
    let mut shuffles = 0u32;
    let mut anomalies = Vec::new();
    let mut anomaly_records = Vec::new();
    let mut anomaly_seen = HashSet::new();
    let mut step = 0u64;
    let safety_limit = (scenario.players as u64) * 8 + 64;

    while game.state() == GameState::Active {
        step += 1;
        if step > safety_limit {
            push_anomaly(
                &mut anomalies,
                &mut anomaly_records,
                &mut anomaly_seen,
                step,
                "step safety limit exceeded".to_string(),
            );
            break;
        }
        let now = step * STEP_MS;

        let action = pick_action(&game, scenario, &mut rng);
        match apply_action(&mut game, &action, &mut rng, now) {
            Ok(outcome) => {
                notifications_sent += outcome.deliveries.len();
                let expects_kill =
                    matches!(action, StepAction::Kill(_) | StepAction::SelfReport(_));
                if outcome.kill_recorded != expects_kill {
                    push_anomaly(
                        &mut anomalies,
                        &mut anomaly_records,
                        &mut anomaly_seen,
                        step,
                        format!("kill bookkeeping mismatch on {action:?}"),
                    );
                }
                match &action {
                    StepAction::Shuffle => shuffles += 1,
                    StepAction::Kick(_) => kicks += 1,
                    StepAction::SelfReport(_) => self_reports += 1,
                    StepAction::Kill(_) => kills += 1,
                }
            }
            Err(error) => {
                push_anomaly(
                    &mut anomalies,
                    &mut anomaly_records,
                    &mut anomaly_seen,
                    step,
                    format!("{action:?} rejected: {error}"),
                );
            }
        }

        for message in collect_game_anomalies(&game) {
            push_anomaly(
                &mut anomalies,
                &mut anomaly_records,
                &mut anomaly_seen,
                step,
                message,
            );
        }
    }

    if let Some(winner) = game.winner.as_deref() {
        let credited = game
            .players
            .get(winner)
            .map(|player| player.kills)
            .unwrap_or(0);
        if credited == 0 {
            push_anomaly(
                &mut anomalies,
                &mut anomaly_records,
                &mut anomaly_seen,
                step,
                format!("winner {winner} finished without a credited kill"),
            );
        }
    }

    let ending = if game.winner.is_some() {
        "win".to_string()
    } else {
        "stalled".to_string()
    };
    let duration_ms = match (game.started_at_ms, game.ended_at_ms) {
        (Some(started), Some(ended)) => ended.saturating_sub(started),
        _ => step * STEP_MS,
    };

    ScenarioRunResult {
        result: ScenarioResultLine {
            scenario: scenario.name.clone(),
            seed: scenario.seed,
            players: scenario.players,
            churn: scenario.churn,
            steps: step,
            kills,
            self_reports,
            kicks,
            shuffles,
            notifications_sent,
            duration_ms,
            winner: game.winner.clone(),
            ending,
            anomalies,
        },
        anomaly_records,
        finished_step: step,
    }
}

fn pick_action(game: &Game, scenario: &Scenario, rng: &mut StdRng) -> StepAction {
    let alive = cycle::alive_usernames(&game.players);
    let roll = rng.random_range(0..100u32);
    if scenario.churn && roll < 10 {
        return StepAction::Shuffle;
    }
    if scenario.churn && roll < 22 && alive.len() > 2 {
        let victim = alive[rng.random_range(0..alive.len())].clone();
        return StepAction::Kick(victim);
    }
    if roll < 35 {
        let victim = alive[rng.random_range(0..alive.len())].clone();
        return StepAction::SelfReport(victim);
    }
    let killer = alive[rng.random_range(0..alive.len())].clone();
    StepAction::Kill(killer)
}

// The kill branch walks the same path a real client would: ask for the
// killer's target, then submit the code the target would have revealed.
fn apply_action(
    game: &mut Game,
    action: &StepAction,
    rng: &mut StdRng,
    now_ms: u64,
) -> Result<ActionOutcome, ApiError> {
    match action {
        StepAction::Shuffle => game.shuffle(rng, now_ms),
        StepAction::Kick(victim) => {
            game.remove_player(victim, Some("removed by the stress run"), now_ms)
        }
        StepAction::SelfReport(victim) => game.report_own_death(victim, now_ms),
        StepAction::Kill(killer) => {
            let (victim, _) = game.status_of(killer)?;
            let (_, victim_code) = game.status_of(&victim)?;
            game.kill(killer, &victim_code, now_ms)
        }
    }
}

fn collect_game_anomalies(game: &Game) -> Vec<String> {
    let mut anomalies = match game.state() {
        GameState::Forming => Vec::new(),
        _ => cycle::cycle_anomalies(&game.players),
    };
    let alive = cycle::alive_usernames(&game.players).len();
    match game.state() {
        GameState::Forming => {}
        GameState::Active => {
            if alive != game.alive_count {
                anomalies.push(format!(
                    "alive counter reads {} but {alive} players stand",
                    game.alive_count
                ));
            }
            if alive < 2 {
                anomalies.push(format!("active game with {alive} players standing"));
            }
        }
        GameState::Ended => {
            if alive != 1 {
                anomalies.push(format!("ended game with {alive} players standing"));
            }
            match game.winner.as_deref() {
                None => anomalies.push("ended game without a winner".to_string()),
                Some(winner) => {
                    let standing = game
                        .players
                        .get(winner)
                        .map(|player| player.alive())
                        .unwrap_or(false);
                    if !standing {
                        anomalies.push(format!("winner {winner} is not standing"));
                    }
                }
            }
        }
    }
    anomalies
}

fn resolve_scenarios(cli: &Cli) -> Vec<Scenario> {
    let seed = cli.seed.unwrap_or_else(now_ms);

    if cli.single || cli.players.is_some() || cli.churn {
        let players = cli
            .players
            .unwrap_or(6)
            .clamp(MIN_PLAYERS_TO_START, 64);
        return vec![Scenario {
            name: format!("custom-p{players}"),
            players,
            churn: cli.churn,
            seed,
        }];
    }

    vec![
        Scenario {
            name: "quick-ring-p4".to_string(),
            players: 4,
            churn: false,
            seed,
        },
        Scenario {
            name: "churn-ring-p8".to_string(),
            players: 8,
            churn: true,
            seed: seed.wrapping_add(1),
        },
        Scenario {
            name: "big-ring-p12".to_string(),
            players: 12,
            churn: true,
            seed: seed.wrapping_add(2),
        },
    ]
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

fn default_match_id(seed: u64, timestamp_ms: u64) -> String {
    format!("sim-{seed}-{timestamp_ms}")
}

fn build_run_summary(
    match_id: String,
    started_at_ms: u64,
    finished_at_ms: u64,
    scenarios: Vec<ScenarioResultLine>,
    ending_counts: BTreeMap<String, usize>,
    anomaly_count: usize,
    total_steps: u64,
) -> RunSummary {
    let scenario_count = scenarios.len();
    let average_steps = if scenario_count == 0 {
        0
    } else {
        total_steps / scenario_count as u64
    };
    RunSummary {
        match_id,
        started_at_ms,
        finished_at_ms,
        scenario_count,
        anomaly_count,
        average_steps,
        ending_counts,
        scenarios,
    }
}

fn emit_log(
    level: &str,
    event: &str,
    match_id: &str,
    scenario: Option<&str>,
    seed: Option<u64>,
    step: Option<u64>,
    details: Value,
) {
    let log_line = StructuredLogLine {
        timestamp_ms: now_ms(),
        level: level.to_string(),
        event: event.to_string(),
        match_id: match_id.to_string(),
        scenario: scenario.map(|value| value.to_string()),
        seed,
        step,
        details,
    };
    eprintln!(
        "{}",
        serde_json::to_string(&log_line).expect("structured log should serialize")
    );
}

fn write_summary(path: &Path, summary: &RunSummary) -> io::Result<()> {
    let summary_text = serde_json::to_string_pretty(summary).expect("run summary should serialize");
    std::fs::write(path, summary_text)
}
