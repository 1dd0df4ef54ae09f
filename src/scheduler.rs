//! Periodic jobs: sweep, status refresh and alert audit.
//!
//! Each job ticks on its own interval and is single-flight: a tick (or a
//! manual trigger) that finds the previous run still going is skipped.
//! Store work runs on the blocking pool.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinSet;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::alerts::{AlertEngine, AlertReport};
use crate::config::PatrolConfig;
use crate::error::{Result, StoreError};
use crate::store::Store;
use crate::sweep::{RefreshReport, Sweep, SweepReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    Sweep,
    Refresh,
    Alerts,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::Sweep => write!(f, "sweep"),
            JobKind::Refresh => write!(f, "refresh"),
            JobKind::Alerts => write!(f, "alerts"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobSummary {
    Sweep(SweepReport),
    Refresh(RefreshReport),
    Alerts(AlertReport),
}

impl fmt::Display for JobSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobSummary::Sweep(r) => write!(
                f,
                "examined {}, absences {}, departures {}, failures {}",
                r.examined, r.absences, r.departures, r.failures
            ),
            JobSummary::Refresh(r) => write!(
                f,
                "examined {}, changed {}, failures {}",
                r.examined, r.changed, r.failures
            ),
            JobSummary::Alerts(r) => write!(
                f,
                "raised {}, suppressed {}, failures {}",
                r.raised, r.suppressed, r.failures
            ),
        }
    }
}

/// The job bodies, runnable once on demand.
pub struct Jobs {
    sweep: Sweep,
    alerts: AlertEngine,
}

impl Jobs {
    pub fn new(store: Store, config: &PatrolConfig) -> Self {
        Self {
            sweep: Sweep::new(store.clone(), config.sweep_window()),
            alerts: AlertEngine::new(store),
        }
    }

    pub fn run_once(&self, kind: JobKind, now: DateTime<Utc>) -> Result<JobSummary> {
        match kind {
            JobKind::Sweep => self.sweep.run(now).map(JobSummary::Sweep),
            JobKind::Refresh => self.sweep.refresh_statuses(now).map(JobSummary::Refresh),
            JobKind::Alerts => self.alerts.run(now).map(JobSummary::Alerts),
        }
    }
}

/// At most one holder at a time. The guard releases on drop.
#[derive(Debug, Clone, Default)]
pub struct SingleFlight {
    running: Arc<AtomicBool>,
}

impl SingleFlight {
    pub fn try_acquire(&self) -> Option<FlightGuard> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard {
                running: Arc::clone(&self.running),
            })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
pub struct FlightGuard {
    running: Arc<AtomicBool>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

struct JobSlot {
    kind: JobKind,
    period: Duration,
    flight: SingleFlight,
}

pub struct Scheduler {
    jobs: Arc<Jobs>,
    slots: Vec<JobSlot>,
}

impl Scheduler {
    pub fn new(jobs: Jobs, config: &PatrolConfig) -> Self {
        let slot = |kind, secs| JobSlot {
            kind,
            period: Duration::from_secs(secs),
            flight: SingleFlight::default(),
        };
        Self {
            jobs: Arc::new(jobs),
            slots: vec![
                slot(JobKind::Sweep, config.sweep_interval_secs),
                slot(JobKind::Refresh, config.refresh_interval_secs),
                slot(JobKind::Alerts, config.alert_interval_secs),
            ],
        }
    }

    /// Runs `kind` now unless it is already running. `Ok(None)` means skipped.
    pub async fn trigger(&self, kind: JobKind) -> Result<Option<JobSummary>> {
        let Some(slot) = self.slots.iter().find(|s| s.kind == kind) else {
            return Ok(None);
        };
        execute(Arc::clone(&self.jobs), &slot.flight, kind).await
    }

    /// Ticks every job until `shutdown` resolves.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut loops = JoinSet::new();
        for slot in &self.slots {
            let jobs = Arc::clone(&self.jobs);
            let flight = slot.flight.clone();
            let (kind, period) = (slot.kind, slot.period);
            info!(job = %kind, period_secs = period.as_secs(), "job scheduled");

            loops.spawn(async move {
                let mut ticker = interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    match execute(Arc::clone(&jobs), &flight, kind).await {
                        Ok(Some(summary)) => debug!(job = %kind, %summary, "job finished"),
                        Ok(None) => {}
                        Err(e) => warn!(job = %kind, error = %e, "job failed"),
                    }
                }
            });
        }

        shutdown.await;
        info!("shutting down scheduler");
        loops.shutdown().await;
        Ok(())
    }
}

async fn execute(jobs: Arc<Jobs>, flight: &SingleFlight, kind: JobKind) -> Result<Option<JobSummary>> {
    let Some(guard) = flight.try_acquire() else {
        debug!(job = %kind, "previous run still in progress, tick skipped");
        return Ok(None);
    };
    let summary = tokio::task::spawn_blocking(move || {
        let _guard = guard;
        jobs.run_once(kind, Utc::now())
    })
    .await
    .map_err(|e| StoreError::Join(e.to_string()))??;
    Ok(Some(summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Agent, Assignment, AssignmentStatus};
    use crate::store::testing::*;

    use chrono::Duration as ChronoDuration;

    fn fast_config() -> PatrolConfig {
        PatrolConfig {
            sweep_interval_secs: 1,
            refresh_interval_secs: 1,
            alert_interval_secs: 1,
            ..Default::default()
        }
    }

    /// An active assignment that ended ten minutes ago, with no arrival.
    fn expired_store() -> (tempfile::TempDir, Store) {
        let (dir, store) = test_store();
        let now = Utc::now();
        store.upsert_agent(&Agent::new("AG-1", "Amina Benali")).unwrap();
        store.upsert_round(&round("R-1")).unwrap();
        store
            .upsert_assignment(&Assignment {
                id: "AF-1".into(),
                agent_id: "AG-1".into(),
                round_id: "R-1".into(),
                start: now - ChronoDuration::hours(2),
                end: now - ChronoDuration::minutes(10),
                status: AssignmentStatus::Active,
            })
            .unwrap();
        (dir, store)
    }

    #[test]
    fn single_flight_excludes_second_holder() {
        let flight = SingleFlight::default();
        let guard = flight.try_acquire().unwrap();
        assert!(flight.is_running());
        assert!(flight.clone().try_acquire().is_none());

        drop(guard);
        assert!(!flight.is_running());
        assert!(flight.try_acquire().is_some());
    }

    #[tokio::test]
    async fn trigger_runs_the_job() {
        let (_dir, store) = expired_store();
        let config = fast_config();
        let scheduler = Scheduler::new(Jobs::new(store.clone(), &config), &config);

        let summary = scheduler.trigger(JobKind::Sweep).await.unwrap().unwrap();
        let JobSummary::Sweep(report) = summary else {
            panic!("wrong summary: {summary:?}");
        };
        assert_eq!(report.absences, 1);
    }

    #[tokio::test]
    async fn trigger_skips_while_running() {
        let (_dir, store) = expired_store();
        let config = fast_config();
        let scheduler = Scheduler::new(Jobs::new(store.clone(), &config), &config);

        let held = scheduler.slots[0].flight.try_acquire().unwrap();
        assert!(scheduler.trigger(JobKind::Sweep).await.unwrap().is_none());
        drop(held);
        assert!(scheduler.trigger(JobKind::Sweep).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn run_ticks_until_shutdown() {
        let (_dir, store) = expired_store();
        let config = fast_config();
        let scheduler = Scheduler::new(Jobs::new(store.clone(), &config), &config);

        scheduler
            .run(tokio::time::sleep(Duration::from_millis(300)))
            .await
            .unwrap();

        // First ticks fire immediately; give the blocking pool a moment.
        let mut absences = 0;
        for _ in 0..20 {
            absences = store.list_absences().unwrap().len();
            if absences > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(absences, 1);
    }

    #[test]
    fn summary_display() {
        let summary = JobSummary::Alerts(AlertReport {
            raised: 2,
            suppressed: 1,
            failures: 0,
        });
        assert_eq!(summary.to_string(), "raised 2, suppressed 1, failures 0");
    }
}
