//! Background housekeeping worker.
//!
//! A dedicated thread calls [`AudioCacheManager::tick`] every `tick_interval`
//! (expiry sweep when due, then sync when due). [`SyncScheduler::trigger_sync`]
//! asks for an immediate sync cycle, still subject to single-flight.

use std::any::Any;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::{SyncError, SyncResult};
use crate::manager::AudioCacheManager;
use crate::sync::SyncOutcome;

const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(60);

/// Configuration for [`SyncScheduler`].
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often the worker wakes up to check what is due.
    pub tick_interval: Duration,
    /// Tick once as soon as the worker starts.
    pub immediate_first_tick: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            immediate_first_tick: true,
        }
    }
}

impl SchedulerConfig {
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn with_immediate_first_tick(mut self, immediate: bool) -> Self {
        self.immediate_first_tick = immediate;
        self
    }
}

enum SchedulerCommand {
    TriggerSync,
    Shutdown,
}

/// Handle to the housekeeping worker thread. Dropping it stops the worker.
pub struct SyncScheduler {
    sender: Sender<SchedulerCommand>,
    handle: Option<JoinHandle<()>>,
}

impl SyncScheduler {
    pub fn start(manager: AudioCacheManager, config: SchedulerConfig) -> SyncResult<Self> {
        let (sender, receiver) = mpsc::channel();
        let worker = SchedulerWorker { manager, config };

        let handle = thread::Builder::new()
            .name("audiocache-sync".to_string())
            .spawn(move || worker.run(receiver))
            .map_err(|err| SyncError::Spawn(err.to_string()))?;

        Ok(Self {
            sender,
            handle: Some(handle),
        })
    }

    /// Requests an immediate sync cycle, bypassing the sync interval.
    pub fn trigger_sync(&self) -> SyncResult<()> {
        self.send_command(SchedulerCommand::TriggerSync)
    }

    /// Stops the worker and waits for it to exit.
    pub fn shutdown(mut self) -> SyncResult<()> {
        if self.handle.is_some() {
            let _ = self.send_command(SchedulerCommand::Shutdown);
            if let Some(handle) = self.handle.take() {
                handle
                    .join()
                    .map_err(|err| SyncError::Join(format_join_error(err)))?;
            }
        }
        Ok(())
    }

    fn send_command(&self, command: SchedulerCommand) -> SyncResult<()> {
        self.sender
            .send(command)
            .map_err(|err| SyncError::Channel(err.to_string()))
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        if self.handle.is_some() {
            let _ = self.sender.send(SchedulerCommand::Shutdown);
            if let Some(handle) = self.handle.take() {
                let _ = handle.join();
            }
        }
    }
}

struct SchedulerWorker {
    manager: AudioCacheManager,
    config: SchedulerConfig,
}

impl SchedulerWorker {
    fn run(self, receiver: Receiver<SchedulerCommand>) {
        log::debug!(
            "Audio cache scheduler started (tick every {:?})",
            self.config.tick_interval
        );

        if self.config.immediate_first_tick {
            self.tick();
        }

        loop {
            match receiver.recv_timeout(self.config.tick_interval) {
                Ok(SchedulerCommand::TriggerSync) => {
                    log_outcome(&self.manager.sync_with_server());
                }
                Ok(SchedulerCommand::Shutdown) => {
                    log::debug!("Audio cache scheduler shutting down");
                    break;
                }
                Err(RecvTimeoutError::Timeout) => self.tick(),
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    fn tick(&self) {
        let report = self.manager.tick();
        if let Some(outcome) = &report.sync {
            log_outcome(outcome);
        }
    }
}

fn log_outcome(outcome: &SyncOutcome) {
    match outcome {
        SyncOutcome::Completed(_) => {}
        SyncOutcome::Skipped => log::debug!("Scheduled sync skipped, another cycle in flight"),
        SyncOutcome::Disabled => log::debug!("Scheduled sync skipped, sync disabled"),
        SyncOutcome::Failed { reason } => log::debug!("Scheduled sync failed: {}", reason),
    }
}

fn format_join_error(err: Box<dyn Any + Send>) -> String {
    match err.downcast::<String>() {
        Ok(string) => *string,
        Err(err) => match err.downcast::<&str>() {
            Ok(str_ref) => (*str_ref).to_string(),
            Err(_) => "unknown panic".to_string(),
        },
    }
}
