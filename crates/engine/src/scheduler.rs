//! Scheduler: cron-driven triggers.
//!
//! Schedule rows are only ever written under the [`ScheduleLedger`] lock, so
//! a tick, a finishing run and a concurrent API edit cannot interleave. Cron
//! expressions are evaluated in the schedule's IANA timezone, so DST shifts
//! follow local wall-clock time.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use croner::Cron;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use db::models::{ExecutionStatus, ScheduleRow, TriggerType, WorkflowStatus};
use db::{DbError, Store};

use crate::dispatcher::{Dispatcher, TriggerRequest};
use crate::EngineError;

/// Body of schedule create/update calls. On update, absent fields keep
/// their current value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScheduleInput {
    pub cron_expression: Option<String>,
    pub timezone: Option<String>,
    pub enabled: Option<bool>,
    pub trigger_data: Option<Value>,
}

/// Next fire time strictly after `after`, evaluated in `timezone`.
pub fn next_run(cron_expression: &str, timezone: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>, EngineError> {
    let tz = Tz::from_str(timezone).map_err(|_| EngineError::InvalidTimezone(timezone.to_owned()))?;
    let invalid = |message: String| EngineError::InvalidCron {
        expression: cron_expression.to_owned(),
        message,
    };
    let cron = Cron::new(cron_expression)
        .parse()
        .map_err(|e| invalid(e.to_string()))?;
    let next = cron
        .find_next_occurrence(&after.with_timezone(&tz), false)
        .map_err(|e| invalid(e.to_string()))?;
    Ok(next.with_timezone(&Utc))
}

/// Run counters and auto-disable for schedules.
///
/// The scheduler counts fires; whoever sees a scheduled execution end
/// (worker, stop, startup recovery) records its outcome here.
#[derive(Clone)]
pub struct ScheduleLedger {
    store: Arc<dyn Store>,
    lock: Arc<Mutex<()>>,
    failure_threshold: u32,
}

impl ScheduleLedger {
    pub fn new(store: Arc<dyn Store>, failure_threshold: u32) -> Self {
        Self {
            store,
            lock: Arc::new(Mutex::new(())),
            failure_threshold: failure_threshold.max(1),
        }
    }

    async fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }

    /// Record how a scheduled execution of `workflow_id` ended.
    #[instrument(skip(self))]
    pub async fn record(&self, workflow_id: Uuid, status: ExecutionStatus) -> Result<(), EngineError> {
        let _guard = self.lock().await;
        let mut schedule = match self.store.get_schedule(workflow_id).await {
            Ok(schedule) => schedule,
            // Deleted while the run was in flight.
            Err(DbError::NotFound) => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        self.apply(&mut schedule, status);
        schedule.updated_at = Utc::now();
        self.store.upsert_schedule(&schedule).await?;
        debug!(
            status = %status,
            consecutive_failures = schedule.consecutive_failures,
            "schedule outcome recorded"
        );
        Ok(())
    }

    fn apply(&self, schedule: &mut ScheduleRow, status: ExecutionStatus) {
        schedule.last_run_status = Some(status.as_str().into());
        match status {
            ExecutionStatus::Completed => {
                schedule.successful_runs += 1;
                schedule.consecutive_failures = 0;
            }
            ExecutionStatus::Failed => {
                schedule.failed_runs += 1;
                schedule.consecutive_failures += 1;
                if schedule.consecutive_failures >= i32::try_from(self.failure_threshold).unwrap_or(i32::MAX) {
                    schedule.enabled = false;
                    schedule.auto_disabled = true;
                    warn!(
                        workflow_id = %schedule.workflow_id,
                        consecutive_failures = schedule.consecutive_failures,
                        "schedule auto-disabled"
                    );
                }
            }
            _ => {}
        }
    }
}

#[derive(Clone)]
pub struct Scheduler {
    store: Arc<dyn Store>,
    dispatcher: Dispatcher,
    ledger: ScheduleLedger,
    tick_every: Duration,
}

impl Scheduler {
    pub fn new(store: Arc<dyn Store>, dispatcher: Dispatcher, ledger: ScheduleLedger, tick_every: Duration) -> Self {
        Self {
            store,
            dispatcher,
            ledger,
            tick_every,
        }
    }

    // ------ CRUD ------

    pub async fn create(&self, workflow_id: Uuid, input: ScheduleInput) -> Result<ScheduleRow, EngineError> {
        let _guard = self.ledger.lock().await;
        self.store
            .get_workflow(workflow_id)
            .await
            .map_err(EngineError::lookup("workflow"))?;
        match self.store.get_schedule(workflow_id).await {
            Ok(_) => return Err(EngineError::AlreadyExists("schedule".into())),
            Err(DbError::NotFound) => {}
            Err(err) => return Err(err.into()),
        }

        let cron_expression = input
            .cron_expression
            .ok_or_else(|| EngineError::Validation("cron_expression is required".into()))?;
        let timezone = input.timezone.unwrap_or_else(|| "UTC".into());
        let now = Utc::now();
        let next_run_at = next_run(&cron_expression, &timezone, now)?;

        let row = ScheduleRow {
            id: Uuid::new_v4(),
            workflow_id,
            cron_expression,
            timezone,
            enabled: input.enabled.unwrap_or(true),
            next_run_at: Some(next_run_at),
            last_run_at: None,
            last_run_status: None,
            total_runs: 0,
            successful_runs: 0,
            failed_runs: 0,
            consecutive_failures: 0,
            auto_disabled: false,
            trigger_data: input.trigger_data.unwrap_or_else(|| json!({})),
            created_at: now,
            updated_at: now,
        };
        self.store.upsert_schedule(&row).await?;
        info!(%workflow_id, cron = %row.cron_expression, tz = %row.timezone, next = %next_run_at, "schedule created");
        Ok(row)
    }

    pub async fn get(&self, workflow_id: Uuid) -> Result<ScheduleRow, EngineError> {
        self.store
            .get_schedule(workflow_id)
            .await
            .map_err(EngineError::lookup("schedule"))
    }

    /// Apply `input`. Re-enabling clears `auto_disabled` and the failure
    /// streak.
    pub async fn update(&self, workflow_id: Uuid, input: ScheduleInput) -> Result<ScheduleRow, EngineError> {
        let _guard = self.ledger.lock().await;
        let mut row = self.get(workflow_id).await?;
        let now = Utc::now();

        if let Some(cron_expression) = input.cron_expression {
            row.cron_expression = cron_expression;
        }
        if let Some(timezone) = input.timezone {
            row.timezone = timezone;
        }
        if let Some(trigger_data) = input.trigger_data {
            row.trigger_data = trigger_data;
        }
        if let Some(enabled) = input.enabled {
            if enabled && !row.enabled {
                row.auto_disabled = false;
                row.consecutive_failures = 0;
            }
            row.enabled = enabled;
        }
        row.next_run_at = Some(next_run(&row.cron_expression, &row.timezone, now)?);
        row.updated_at = now;

        self.store.upsert_schedule(&row).await?;
        info!(%workflow_id, enabled = row.enabled, "schedule updated");
        Ok(row)
    }

    pub async fn delete(&self, workflow_id: Uuid) -> Result<(), EngineError> {
        let _guard = self.ledger.lock().await;
        self.get(workflow_id).await?;
        self.store.delete_schedule(workflow_id).await?;
        info!(%workflow_id, "schedule deleted");
        Ok(())
    }

    // ------ firing ------

    /// Fire every schedule due at `now`. Returns the ids of the executions
    /// created; the worker records their outcomes as they finish.
    #[instrument(skip(self))]
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, EngineError> {
        let _guard = self.ledger.lock().await;
        let mut dispatched = Vec::new();

        for mut schedule in self.store.list_due_schedules(now).await? {
            let workflow = match self.store.get_workflow(schedule.workflow_id).await {
                Ok(workflow) => workflow,
                Err(DbError::NotFound) => continue,
                Err(err) => return Err(err.into()),
            };

            match next_run(&schedule.cron_expression, &schedule.timezone, now) {
                Ok(next) => schedule.next_run_at = Some(next),
                Err(err) => {
                    error!(workflow_id = %schedule.workflow_id, error = %err, "disabling unparseable schedule");
                    schedule.enabled = false;
                    schedule.next_run_at = None;
                }
            }
            schedule.updated_at = now;

            if workflow.status != WorkflowStatus::Active.as_str() {
                debug!(workflow_id = %workflow.id, status = %workflow.status, "workflow not active, skipping run");
                self.store.upsert_schedule(&schedule).await?;
                continue;
            }

            schedule.last_run_at = Some(now);
            schedule.total_runs += 1;
            let mut request = TriggerRequest::new(
                TriggerType::Schedule,
                json!({
                    "schedule_id": schedule.id,
                    "cron_expression": schedule.cron_expression,
                    "scheduled_at": now,
                    "data": schedule.trigger_data,
                }),
                schedule.trigger_data.clone(),
            );
            request.triggered_by = Some("scheduler".into());

            match self.dispatcher.dispatch(workflow.id, request).await {
                Ok(execution) => {
                    schedule.last_run_status = Some(ExecutionStatus::Queued.as_str().into());
                    self.store.upsert_schedule(&schedule).await?;
                    info!(workflow_id = %workflow.id, execution_id = %execution.id, "schedule fired");
                    dispatched.push(execution.id);
                }
                Err(err) => {
                    warn!(workflow_id = %workflow.id, error = %err, "scheduled dispatch failed");
                    self.ledger.apply(&mut schedule, ExecutionStatus::Failed);
                    self.store.upsert_schedule(&schedule).await?;
                }
            }
        }
        Ok(dispatched)
    }

    /// Tick forever at the configured interval.
    pub async fn run(self) {
        info!(every = ?self.tick_every, "scheduler started");
        let mut interval = tokio::time::interval(self.tick_every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(err) = self.tick(Utc::now()).await {
                error!(error = %err, "scheduler tick failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn next_run_respects_timezone() {
        let after = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        // 09:00 in Berlin (UTC+1 in winter) is 08:00 UTC the next day.
        let next = next_run("0 9 * * *", "Europe/Berlin", after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 16, 8, 0, 0).unwrap());

        let next = next_run("0 9 * * *", "UTC", after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 16, 9, 0, 0).unwrap());
    }

    #[test]
    fn next_run_follows_dst() {
        // Summer time: Berlin is UTC+2.
        let after = Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap();
        let next = next_run("0 9 * * *", "Europe/Berlin", after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 7, 1, 7, 0, 0).unwrap());
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        let now = Utc::now();
        assert!(matches!(
            next_run("not a cron", "UTC", now),
            Err(EngineError::InvalidCron { .. })
        ));
        assert!(matches!(
            next_run("* * * * *", "Mars/Olympus", now),
            Err(EngineError::InvalidTimezone(_))
        ));
    }

    fn schedule(workflow_id: Uuid) -> ScheduleRow {
        let now = Utc::now();
        ScheduleRow {
            id: Uuid::new_v4(),
            workflow_id,
            cron_expression: "*/5 * * * *".into(),
            timezone: "UTC".into(),
            enabled: true,
            next_run_at: Some(now),
            last_run_at: None,
            last_run_status: None,
            total_runs: 0,
            successful_runs: 0,
            failed_runs: 0,
            consecutive_failures: 0,
            auto_disabled: false,
            trigger_data: json!({}),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn ledger_disables_after_a_failure_streak_only() {
        let store = Arc::new(db::MemoryStore::new());
        let workflow_id = Uuid::new_v4();
        store.upsert_schedule(&schedule(workflow_id)).await.unwrap();
        let ledger = ScheduleLedger::new(store.clone(), 2);

        ledger.record(workflow_id, ExecutionStatus::Failed).await.unwrap();
        ledger.record(workflow_id, ExecutionStatus::Completed).await.unwrap();
        ledger.record(workflow_id, ExecutionStatus::Failed).await.unwrap();
        ledger.record(workflow_id, ExecutionStatus::Stopped).await.unwrap();
        let row = store.get_schedule(workflow_id).await.unwrap();
        assert!(row.enabled);
        assert_eq!((row.successful_runs, row.failed_runs, row.consecutive_failures), (1, 2, 1));
        assert_eq!(row.last_run_status.as_deref(), Some("stopped"));

        ledger.record(workflow_id, ExecutionStatus::Failed).await.unwrap();
        let row = store.get_schedule(workflow_id).await.unwrap();
        assert!(!row.enabled && row.auto_disabled);

        // A deleted schedule has nothing to record.
        ledger.record(Uuid::new_v4(), ExecutionStatus::Failed).await.unwrap();
    }
}
