use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::Parser;
use serde::Deserialize;

use patrol::attendance::AttendanceEngine;
use patrol::cli::{Cli, Command};
use patrol::config::PatrolConfig;
use patrol::ingest::{IngestService, PositionReport};
use patrol::model::AlertState;
use patrol::scheduler::{JobKind, Jobs, Scheduler};
use patrol::seed::Fixture;
use patrol::store::{CheckInUpdate, Store};
use patrol::ui::Report;
use patrol::{PatrolError, logging};

/// A single report or a batch.
#[derive(Deserialize)]
#[serde(untagged)]
enum Reports {
    One(PositionReport),
    Many(Vec<PositionReport>),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = PatrolConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(db) = &cli.db {
        config.database_path = db.clone();
    }
    logging::init(&config.log_filter, cli.verbose);

    let store = Store::open(config.database_path.clone())
        .with_context(|| format!("opening {}", config.database_path.display()))?;
    let report = Report::default();

    match cli.command {
        Command::Ingest { file } => ingest(&store, &config, file.as_deref(), &report)?,
        Command::Reprocess { sample_id } => {
            let outcome = ingest_service(&store, &config)?.reprocess(&sample_id, Utc::now())?;
            report.outcome(&outcome);
        }
        Command::Run => {
            let scheduler = Scheduler::new(Jobs::new(store, &config), &config);
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(scheduler.run(async {
                let _ = tokio::signal::ctrl_c().await;
            }))?;
        }
        Command::Sweep => run_job(&store, &config, JobKind::Sweep, &report)?,
        Command::Refresh => run_job(&store, &config, JobKind::Refresh, &report)?,
        Command::Alerts => run_job(&store, &config, JobKind::Alerts, &report)?,
        Command::Status { agent } => {
            let stats = store.agent_stats()?;
            let alerts = store.list_alerts(Some(AlertState::Active))?;
            report.status(&stats, &alerts);
            let agents = match agent {
                Some(agent_id) => vec![
                    store
                        .find_agent(&agent_id)?
                        .ok_or_else(|| PatrolError::not_found("agent", agent_id))?,
                ],
                None if cli.verbose => store.list_agents()?,
                None => Vec::new(),
            };
            for agent in &agents {
                let last = store.last_position(&agent.id)?;
                report.agent(agent, last.as_ref());
            }
        }
        Command::Seed { file } => {
            let seeded = Fixture::from_path(&file)?.apply(&store)?;
            report.json(&seeded);
        }
        Command::Assignment { action, id } => {
            let subject = format!("assignment {id}");
            let change = store
                .apply_manual_action(&id, action.into(), Utc::now())?
                .ok_or_else(|| PatrolError::refused(&subject, "transition does not apply"))?;
            report.action(&subject, &change.to_string());
        }
        Command::CheckIn { action, id } => {
            let subject = format!("check-in {id}");
            match store.apply_check_in_action(&id, action.into())? {
                CheckInUpdate::Applied(state) => report.action(&subject, state.as_str()),
                CheckInUpdate::Refused(reason) => {
                    return Err(PatrolError::refused(&subject, reason).into());
                }
            }
        }
        Command::Alert { action, id } => {
            let subject = format!("alert {id}");
            let state = store
                .apply_alert_action(&id, action.into(), Utc::now())?
                .ok_or_else(|| PatrolError::refused(&subject, "action does not apply"))?;
            report.action(&subject, state.as_str());
        }
    }

    Ok(())
}

fn ingest_service(store: &Store, config: &PatrolConfig) -> Result<IngestService> {
    let offset = config
        .local_offset()
        .context("local_utc_offset_minutes out of range")?;
    let engine = AttendanceEngine::new(store.clone(), config.debounce_window());
    Ok(IngestService::new(store.clone(), engine, offset))
}

fn ingest(store: &Store, config: &PatrolConfig, file: Option<&Path>, report: &Report) -> Result<()> {
    let raw = match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    let reports = match serde_json::from_str::<Reports>(&raw).context("parsing position reports")? {
        Reports::One(r) => vec![r],
        Reports::Many(rs) => rs,
    };

    let service = ingest_service(store, config)?;
    let mut rejected = 0;
    for position in &reports {
        match service.ingest(position, Utc::now()) {
            Ok(receipt) => report.receipt(&receipt),
            Err(e) => {
                rejected += 1;
                report.rejected(&format!("report for {}", position.agent_id), &e);
            }
        }
    }
    if rejected > 0 {
        bail!("{rejected} of {} reports rejected", reports.len());
    }
    Ok(())
}

fn run_job(store: &Store, config: &PatrolConfig, kind: JobKind, report: &Report) -> Result<()> {
    let summary = Jobs::new(store.clone(), config).run_once(kind, Utc::now())?;
    report.job(kind, &summary);
    Ok(())
}
