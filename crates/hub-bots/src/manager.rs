use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::bot::Bot;
use crate::error::SupervisorError;

/// How one bot's run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotOutcome {
    /// Stopped on request.
    Stopped,
    Failed(SupervisorError),
    /// Did not stop within the grace period and was aborted.
    Aborted,
    Panicked(String),
    NotStarted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotReport {
    pub name: String,
    pub outcome: BotOutcome,
}

struct ManagedBot {
    bot: Arc<dyn Bot>,
    task: Option<JoinHandle<Result<(), SupervisorError>>>,
}

/// Owns a set of independent bots and their tasks.
#[derive(Default)]
pub struct BotManager {
    bots: Vec<ManagedBot>,
}

impl BotManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, bot: Arc<dyn Bot>) {
        self.bots.push(ManagedBot { bot, task: None });
    }

    pub fn len(&self) -> usize {
        self.bots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bots.is_empty()
    }

    pub fn bots(&self) -> impl Iterator<Item = &Arc<dyn Bot>> {
        self.bots.iter().map(|m| &m.bot)
    }

    /// Spawn a task per bot that is not already running.
    pub fn start_all(&mut self) {
        for managed in self.bots.iter_mut().filter(|m| m.task.is_none()) {
            let bot = managed.bot.clone();
            tracing::info!(bot = %bot.name(), "spawning bot");
            managed.task = Some(tokio::spawn(async move { bot.start().await }));
        }
    }

    /// Wait for every bot to finish on its own.
    pub async fn wait_all(&mut self) -> Vec<BotReport> {
        let mut reports = Vec::with_capacity(self.bots.len());
        for managed in &mut self.bots {
            // The handle stays in place until joined so an interrupted wait
            // leaves the bot to stop_all.
            let outcome = match managed.task.as_mut() {
                Some(task) => {
                    let result = task.await;
                    managed.task = None;
                    joined(result)
                }
                None => BotOutcome::NotStarted,
            };
            reports.push(report(managed.bot.name(), outcome));
        }
        reports
    }

    /// Stop every bot and wait up to `grace` in total; stragglers are aborted.
    pub async fn stop_all(&mut self, grace: Duration) -> Vec<BotReport> {
        for managed in &self.bots {
            managed.bot.stop();
        }
        let deadline = Instant::now() + grace;
        let mut reports = Vec::with_capacity(self.bots.len());
        for managed in &mut self.bots {
            let outcome = match managed.task.take() {
                Some(mut task) => match tokio::time::timeout_at(deadline, &mut task).await {
                    Ok(result) => joined(result),
                    Err(_) => {
                        tracing::warn!(bot = %managed.bot.name(), "bot did not stop in time, aborting");
                        task.abort();
                        BotOutcome::Aborted
                    }
                },
                None => BotOutcome::NotStarted,
            };
            reports.push(report(managed.bot.name(), outcome));
        }
        reports
    }
}

fn joined(
    result: Result<Result<(), SupervisorError>, tokio::task::JoinError>,
) -> BotOutcome {
    match result {
        Ok(Ok(())) => BotOutcome::Stopped,
        Ok(Err(err)) => BotOutcome::Failed(err),
        Err(err) if err.is_cancelled() => BotOutcome::Aborted,
        Err(err) => BotOutcome::Panicked(err.to_string()),
    }
}

fn report(name: &str, outcome: BotOutcome) -> BotReport {
    match &outcome {
        BotOutcome::Stopped | BotOutcome::NotStarted => {
            tracing::info!(bot = %name, outcome = ?outcome, "bot finished")
        }
        _ => tracing::error!(bot = %name, outcome = ?outcome, "bot finished"),
    }
    BotReport {
        name: name.to_string(),
        outcome,
    }
}
