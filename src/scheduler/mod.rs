//! Scheduler (C6).
//!
//! Drives commands through `disabled -> idle -> dispatching -> running ->
//! completing -> idle` (§4.6), gated by the execution registry's
//! concurrency check and a counted semaphore capping parallel dispatches.
//! Grounded on the teacher's (now-removed) `background_jobs::scheduler`
//! tick-loop shape (`tokio::select!` over a sleep/command-channel/shutdown
//! race), with real cron-expression evaluation via the `cron` crate in
//! place of the teacher's stub.

mod command;
mod command_config;
mod schema;

pub use command::{CommandContext, ScheduledCommand};
pub use command_config::{CommandConfig, CommandConfigError, CommandConfigStore, CommandSchedule};
pub use schema::SCHEDULER_VERSIONED_SCHEMAS;

use crate::registry::{CommandTimeoutSource, ExecutionRegistry, TriggeredBy};
use chrono::{TimeZone, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const TICK_INTERVAL: Duration = Duration::from_secs(1);
const SHUTDOWN_GRACE_DEFAULT: Duration = Duration::from_secs(30);
const CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);

fn now_ts() -> i64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_secs() as i64
}

fn is_due(schedule: &CommandSchedule, last_run: Option<i64>, now: i64) -> bool {
    match schedule {
        CommandSchedule::Cron { expression } => {
            let Ok(parsed) = cron::Schedule::from_str(expression) else {
                warn!(%expression, "invalid cron expression, command will never fire");
                return false;
            };
            let from = last_run
                .and_then(|t| Utc.timestamp_opt(t, 0).single())
                .unwrap_or_else(|| Utc.timestamp_opt(0, 0).single().unwrap());
            parsed.after(&from).next().map(|next| next.timestamp() <= now).unwrap_or(false)
        }
        CommandSchedule::IntervalHours { hours } => match last_run {
            None => true,
            Some(last) => now - last >= *hours as i64 * 3600,
        },
    }
}

enum SchedulerCommand {
    Trigger { name: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandStatus {
    pub command_name: String,
    pub enabled: bool,
    pub schedule: CommandSchedule,
    pub is_running: bool,
    pub last_run: Option<i64>,
    pub last_success: Option<bool>,
    pub last_duration: Option<i64>,
    pub last_error: Option<String>,
    pub success_rate_percent: f64,
    pub recent_executions: usize,
}

pub struct Scheduler {
    commands: HashMap<String, Arc<dyn ScheduledCommand>>,
    registry: Arc<ExecutionRegistry>,
    config_store: Arc<CommandConfigStore>,
    semaphore: Arc<Semaphore>,
    shutdown: CancellationToken,
    shutdown_grace: Duration,
    trigger_tx: mpsc::Sender<SchedulerCommand>,
    trigger_rx: tokio::sync::Mutex<Option<mpsc::Receiver<SchedulerCommand>>>,
    in_flight: Arc<AtomicI64>,
}

impl Scheduler {
    pub fn new(
        registry: Arc<ExecutionRegistry>,
        config_store: Arc<CommandConfigStore>,
        max_parallel_commands: usize,
        shutdown_grace: Duration,
    ) -> Self {
        let (trigger_tx, trigger_rx) = mpsc::channel(32);
        Self {
            commands: HashMap::new(),
            registry,
            config_store,
            semaphore: Arc::new(Semaphore::new(max_parallel_commands.max(1))),
            shutdown: CancellationToken::new(),
            shutdown_grace,
            trigger_tx,
            trigger_rx: tokio::sync::Mutex::new(Some(trigger_rx)),
            in_flight: Arc::new(AtomicI64::new(0)),
        }
    }

    pub fn register(&mut self, command: Arc<dyn ScheduledCommand>) {
        self.commands.insert(command.name().to_string(), command);
    }

    /// Runs the tick loop until `stop()` is called. Intended to be raced
    /// against the HTTP server and the ctrl-c signal in `main`.
    pub async fn run(self: Arc<Self>) {
        let mut rx = self.trigger_rx.lock().await.take().expect("run() called more than once");
        let mut ticker = tokio::time::interval(TICK_INTERVAL);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                Some(SchedulerCommand::Trigger { name }) = rx.recv() => {
                    self.dispatch(&name, TriggeredBy::Manual).await;
                }
                _ = self.shutdown.cancelled() => {
                    info!("scheduler shutting down");
                    break;
                }
            }
        }
    }

    async fn tick(&self) {
        let now = now_ts();
        let configs = match self.config_store.list() {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "failed to list command configs on tick");
                return;
            }
        };

        for config in configs {
            if !config.enabled || !self.commands.contains_key(&config.name) {
                continue;
            }
            if is_due(&config.schedule, config.last_run, now) {
                self.dispatch(&config.name, TriggeredBy::Scheduler).await;
            }
        }
    }

    async fn dispatch(&self, name: &str, triggered_by: TriggeredBy) {
        let Some(command) = self.commands.get(name).cloned() else {
            warn!(command = name, "dispatch requested for unknown command");
            return;
        };

        let Ok(permit) = self.semaphore.clone().try_acquire_owned() else {
            // At capacity; scheduled commands wait for the next tick, manual
            // triggers are dropped with a log line rather than queued.
            warn!(command = name, "max parallel commands reached, skipping dispatch");
            return;
        };

        let execution_id = match self.registry.begin(name, triggered_by) {
            Ok(id) => id,
            Err(e) => {
                info!(command = name, error = %e, "dispatch refused");
                return;
            }
        };

        let cancellation = self.shutdown.child_token();
        let registry = self.registry.clone();
        let config_store = self.config_store.clone();
        let timeout_minutes = config_store.timeout_minutes(name);
        let name_owned = name.to_string();
        let started_at = now_ts();
        let in_flight = self.in_flight.clone();
        in_flight.fetch_add(1, Ordering::SeqCst);

        tokio::spawn(async move {
            let ctx = CommandContext::new(execution_id, cancellation);
            let result = match timeout_minutes {
                Some(minutes) => match tokio::time::timeout(Duration::from_secs(minutes as u64 * 60), command.execute(&ctx)).await {
                    Ok(result) => result,
                    Err(_) => Err(anyhow::anyhow!("Command timed out after {minutes} minutes")),
                },
                None => command.execute(&ctx).await,
            };
            let (success, output, error) = match result {
                Ok(output) => (true, Some(output), None),
                Err(e) => (false, None, Some(e.to_string())),
            };
            let _ = registry.complete(execution_id, success, output.as_ref(), error.as_deref());
            let _ = config_store.record_run(&name_owned, started_at, success, now_ts() - started_at, error.as_deref());
            in_flight.fetch_sub(1, Ordering::SeqCst);
            drop(permit);
        });
    }

    /// Bypasses the schedule check but still goes through the registry's
    /// concurrency gate.
    pub async fn trigger_now(&self, command_name: &str) -> anyhow::Result<()> {
        if !self.commands.contains_key(command_name) {
            anyhow::bail!("unknown command '{command_name}'");
        }
        self.trigger_tx.send(SchedulerCommand::Trigger { name: command_name.to_string() }).await?;
        Ok(())
    }

    pub fn command_statuses(&self) -> anyhow::Result<Vec<CommandStatus>> {
        let configs = self.config_store.list()?;
        let mut statuses = Vec::new();

        for config in configs {
            if config.is_internal {
                continue;
            }
            let recent = self.registry.list_for(&config.name, 20)?;
            let is_running = recent.iter().any(|e| e.status == crate::registry::ExecutionStatus::Running);
            let completed: Vec<_> = recent.iter().filter(|e| e.success.is_some()).collect();
            let success_rate = if completed.is_empty() {
                0.0
            } else {
                100.0 * completed.iter().filter(|e| e.success == Some(true)).count() as f64 / completed.len() as f64
            };

            statuses.push(CommandStatus {
                command_name: config.name,
                enabled: config.enabled,
                schedule: config.schedule,
                is_running,
                last_run: config.last_run,
                last_success: config.last_success,
                last_duration: config.last_duration,
                last_error: config.last_error,
                success_rate_percent: success_rate,
                recent_executions: recent.len(),
            });
        }
        Ok(statuses)
    }

    /// Spawns the registry cleanup daemon (§4.5): every 5 minutes, runs the
    /// timed-out pass, the runaway pass, and retention pruning. Shares this
    /// scheduler's shutdown token so `stop()` also ends the daemon.
    pub fn spawn_cleanup_daemon(self: &Arc<Self>, retention_per_command: usize) -> tokio::task::JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match scheduler.registry.cleanup_once(scheduler.config_store.as_ref(), retention_per_command) {
                            Ok(report) => info!(?report, "registry cleanup pass complete"),
                            Err(e) => warn!(error = %e, "registry cleanup pass failed"),
                        }
                    }
                    _ = scheduler.shutdown.cancelled() => {
                        info!("registry cleanup daemon shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// Signals cancellation to every running command and returns once they
    /// finish or `shutdown_grace` elapses, whichever is first.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let deadline = tokio::time::Instant::now() + self.shutdown_grace;
        while self.in_flight.load(Ordering::SeqCst) > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct CountingCommand {
        name: String,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ScheduledCommand for CountingCommand {
        fn name(&self) -> &str {
            &self.name
        }
        async fn execute(&self, _ctx: &CommandContext) -> anyhow::Result<serde_json::Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(serde_json::json!({"ok": true}))
        }
    }

    #[test]
    fn interval_schedule_is_due_after_enough_time_has_passed() {
        let schedule = CommandSchedule::IntervalHours { hours: 1 };
        assert!(is_due(&schedule, None, now_ts()));
        assert!(!is_due(&schedule, Some(now_ts()), now_ts()));
        assert!(is_due(&schedule, Some(now_ts() - 3601), now_ts()));
    }

    #[tokio::test]
    async fn trigger_now_runs_a_registered_command() {
        let registry = Arc::new(ExecutionRegistry::new_in_memory().unwrap());
        let config_store = Arc::new(CommandConfigStore::new_in_memory().unwrap());
        config_store
            .register_default("noop", "Noop", "d", CommandSchedule::IntervalHours { hours: 24 }, None, false)
            .unwrap();

        let mut scheduler = Scheduler::new(registry.clone(), config_store, 3, Duration::from_secs(1));
        let calls = Arc::new(AtomicUsize::new(0));
        scheduler.register(Arc::new(CountingCommand { name: "noop".into(), calls: calls.clone() }));
        let scheduler = Arc::new(scheduler);

        let handle = tokio::spawn(scheduler.clone().run());
        scheduler.trigger_now("noop").await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        scheduler.stop().await;
        handle.abort();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.list_recent(10).unwrap().len(), 1);
    }

    #[test]
    fn command_statuses_excludes_internal_commands() {
        let registry = Arc::new(ExecutionRegistry::new_in_memory().unwrap());
        let config_store = Arc::new(CommandConfigStore::new_in_memory().unwrap());
        config_store
            .register_default("visible", "V", "d", CommandSchedule::IntervalHours { hours: 1 }, None, false)
            .unwrap();
        config_store
            .register_default("helper", "H", "d", CommandSchedule::IntervalHours { hours: 1 }, None, true)
            .unwrap();
        let scheduler = Scheduler::new(registry, config_store, 3, Duration::from_secs(1));
        let statuses = scheduler.command_statuses().unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].command_name, "visible");
    }
}
