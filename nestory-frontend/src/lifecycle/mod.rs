//! Job lifecycle controller.
//!
//! Drives one image job at a time through
//! `idle -> submitting -> running -> downloading -> done`, with `error`
//! reachable from any non-idle phase. While a job runs, two timer tasks are
//! live: a status poll and a progress easing tick. A one-shot timeout guards
//! the whole generation.
//!
//! Each `generate` or `reset` starts a new epoch. Timer tasks and in-flight
//! calls carry the epoch they were started under and drop their result when
//! it no longer matches, so a slow reply from an abandoned job can never
//! touch the current one.

pub mod client;
pub mod image_store;
pub mod progress;

pub use client::{ClientError, JobApi, ProxyClient};
pub use image_store::{ImageHandle, ImageStore};

use crate::models::NormalizedStatus;
use bytes::Bytes;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub const EMPTY_PROMPT_MESSAGE: &str = "Please enter a prompt.";
pub const UPSTREAM_FAILED_MESSAGE: &str = "Generation failed (upstream returned error).";
pub const TIMED_OUT_MESSAGE: &str = "Timed out waiting for image. Try again.";

const SUBMITTING_PROGRESS: f64 = 5.0;
const RUNNING_PROGRESS: f64 = 12.0;
const DOWNLOADING_PROGRESS: f64 = 95.0;
const DONE_PROGRESS: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Submitting,
    Running,
    Downloading,
    Done,
    Error,
}

impl Phase {
    /// A new job may only start once the previous one has settled.
    pub fn can_generate(&self) -> bool {
        matches!(self, Phase::Idle | Phase::Done | Phase::Error)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Phase::Idle => "Ready",
            Phase::Submitting => "Submitting job…",
            Phase::Running => "Generating…",
            Phase::Downloading => "Downloading image…",
            Phase::Done => "Done",
            Phase::Error => "Error",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Submitting => "submitting",
            Phase::Running => "running",
            Phase::Downloading => "downloading",
            Phase::Done => "done",
            Phase::Error => "error",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything an observer needs to render the current job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSnapshot {
    pub phase: Phase,
    pub progress: f64,
    pub job_id: Option<String>,
    pub error: Option<String>,
    pub image: Option<ImageHandle>,
}

impl Default for JobSnapshot {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            progress: 0.0,
            job_id: None,
            error: None,
            image: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub poll_interval: Duration,
    pub progress_interval: Duration,
    pub timeout: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1200),
            progress_interval: Duration::from_millis(200),
            timeout: Duration::from_secs(90),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GenerateError {
    #[error("a job is already {0}")]
    Busy(Phase),
}

struct State {
    snapshot: JobSnapshot,
    epoch: u64,
    timers: CancellationToken,
}

impl State {
    fn stop_timers(&mut self) {
        self.timers.cancel();
    }
}

struct Inner {
    api: Arc<dyn JobApi>,
    images: ImageStore,
    settings: ControllerSettings,
    state: Mutex<State>,
    updates: watch::Sender<JobSnapshot>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.state
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .stop_timers();
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &State) {
        self.updates.send_replace(state.snapshot.clone());
    }

    fn release_image(&self, state: &mut State) {
        if let Some(handle) = state.snapshot.image.take() {
            self.images.release(&handle);
        }
    }

    fn fail(&self, state: &mut State, message: String) {
        tracing::warn!(
            job_id = state.snapshot.job_id.as_deref().unwrap_or("-"),
            phase = %state.snapshot.phase,
            error = %message,
            "Image job failed"
        );
        state.stop_timers();
        state.snapshot.phase = Phase::Error;
        state.snapshot.progress = 0.0;
        state.snapshot.error = Some(message);
        self.publish(state);
    }

    /// One status poll. Returns whether polling should continue.
    async fn poll_once(&self, epoch: u64, job_id: &str) -> bool {
        let status = self.api.status(job_id).await;

        {
            let mut state = self.lock();
            if state.epoch != epoch || state.snapshot.phase != Phase::Running {
                return false;
            }

            match status {
                Err(e) => {
                    self.fail(&mut state, e.to_string());
                    return false;
                }
                Ok(NormalizedStatus::Running) => return true,
                Ok(NormalizedStatus::Error) => {
                    self.fail(&mut state, UPSTREAM_FAILED_MESSAGE.to_string());
                    return false;
                }
                Ok(NormalizedStatus::Done) => {
                    state.stop_timers();
                    state.snapshot.phase = Phase::Downloading;
                    state.snapshot.progress = DOWNLOADING_PROGRESS;
                    self.publish(&state);
                }
            }
        }

        let image = self.api.result(job_id).await;

        let mut state = self.lock();
        if state.epoch != epoch || state.snapshot.phase != Phase::Downloading {
            tracing::debug!(job_id = %job_id, "Discarding stale image download");
            return false;
        }

        match image {
            Ok(bytes) => {
                self.release_image(&mut state);
                let handle = self.images.insert(bytes);
                tracing::info!(job_id = %job_id, image = %handle, "Image job finished");
                state.snapshot.image = Some(handle);
                state.snapshot.phase = Phase::Done;
                state.snapshot.progress = DONE_PROGRESS;
                self.publish(&state);
            }
            Err(e) => self.fail(&mut state, e.to_string()),
        }
        false
    }

    /// One easing tick. Returns whether easing should continue.
    fn ease_once(&self, epoch: u64, started: Instant) -> bool {
        let mut state = self.lock();
        if state.epoch != epoch || state.snapshot.phase != Phase::Running {
            return false;
        }
        let elapsed = started.elapsed().as_secs_f64();
        state.snapshot.progress = progress::eased_progress(state.snapshot.progress, elapsed);
        self.publish(&state);
        true
    }

    fn time_out(&self, epoch: u64) {
        let mut state = self.lock();
        if state.epoch == epoch
            && matches!(state.snapshot.phase, Phase::Submitting | Phase::Running)
        {
            self.fail(&mut state, TIMED_OUT_MESSAGE.to_string());
        }
    }
}

/// Handle to a job controller. Clones share the same job.
#[derive(Clone)]
pub struct JobController {
    inner: Arc<Inner>,
}

impl JobController {
    pub fn new(api: Arc<dyn JobApi>, settings: ControllerSettings) -> Self {
        Self::with_store(api, settings, ImageStore::new())
    }

    /// Like [`JobController::new`] but keeps finished images in `images`.
    pub fn with_store(
        api: Arc<dyn JobApi>,
        settings: ControllerSettings,
        images: ImageStore,
    ) -> Self {
        let (updates, _) = watch::channel(JobSnapshot::default());
        let timers = CancellationToken::new();
        timers.cancel();

        Self {
            inner: Arc::new(Inner {
                api,
                images,
                settings,
                state: Mutex::new(State {
                    snapshot: JobSnapshot::default(),
                    epoch: 0,
                    timers,
                }),
                updates,
            }),
        }
    }

    pub fn snapshot(&self) -> JobSnapshot {
        self.inner.lock().snapshot.clone()
    }

    /// Receives a fresh snapshot on every transition and progress tick.
    pub fn subscribe(&self) -> watch::Receiver<JobSnapshot> {
        self.inner.updates.subscribe()
    }

    pub fn images(&self) -> &ImageStore {
        &self.inner.images
    }

    /// Bytes of the finished image, if the current job has one.
    pub fn image(&self) -> Option<Bytes> {
        let handle = self.inner.lock().snapshot.image?;
        self.inner.images.get(&handle)
    }

    /// Start a new job.
    ///
    /// Returns once the submit call has settled; polling continues in the
    /// background. Rejected without side effects while a job is in flight.
    pub async fn generate(&self, prompt: &str, steps: i64) -> Result<(), GenerateError> {
        let prompt = prompt.trim().to_string();

        let (epoch, timers) = {
            let mut state = self.inner.lock();
            if !state.snapshot.phase.can_generate() {
                return Err(GenerateError::Busy(state.snapshot.phase));
            }

            state.stop_timers();
            state.epoch += 1;
            state.snapshot.error = None;
            self.inner.release_image(&mut state);

            if prompt.is_empty() {
                state.snapshot.phase = Phase::Error;
                state.snapshot.progress = 0.0;
                state.snapshot.error = Some(EMPTY_PROMPT_MESSAGE.to_string());
                self.inner.publish(&state);
                return Ok(());
            }

            state.timers = CancellationToken::new();
            state.snapshot.phase = Phase::Submitting;
            state.snapshot.progress = SUBMITTING_PROGRESS;
            state.snapshot.job_id = None;
            self.inner.publish(&state);
            (state.epoch, state.timers.clone())
        };

        self.spawn_timeout(epoch, timers.clone());

        let submitted = self.inner.api.submit(&prompt, steps).await;

        let job_id = {
            let mut state = self.inner.lock();
            if state.epoch != epoch || state.snapshot.phase != Phase::Submitting {
                tracing::debug!("Discarding stale submit reply");
                return Ok(());
            }

            match submitted {
                Ok(job_id) => {
                    tracing::info!(job_id = %job_id, steps, "Image job submitted");
                    state.snapshot.job_id = Some(job_id.clone());
                    state.snapshot.phase = Phase::Running;
                    state.snapshot.progress = RUNNING_PROGRESS;
                    self.inner.publish(&state);
                    job_id
                }
                Err(e) => {
                    self.inner.fail(&mut state, e.to_string());
                    return Ok(());
                }
            }
        };

        self.spawn_progress(epoch, timers.clone());
        self.spawn_poll(epoch, timers, job_id);
        Ok(())
    }

    /// Abandon whatever is in flight and return to idle.
    pub fn reset(&self) {
        let mut state = self.inner.lock();
        state.stop_timers();
        state.epoch += 1;
        self.inner.release_image(&mut state);
        state.snapshot.job_id = None;
        state.snapshot.error = None;
        state.snapshot.phase = Phase::Idle;
        state.snapshot.progress = 0.0;
        self.inner.publish(&state);
    }

    fn spawn_timeout(&self, epoch: u64, timers: CancellationToken) {
        let inner = Arc::downgrade(&self.inner);
        let timeout = self.inner.settings.timeout;

        tokio::spawn(async move {
            tokio::select! {
                _ = timers.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    if let Some(inner) = inner.upgrade() {
                        inner.time_out(epoch);
                    }
                }
            }
        });
    }

    fn spawn_progress(&self, epoch: u64, timers: CancellationToken) {
        let inner = Arc::downgrade(&self.inner);
        let period = self.inner.settings.progress_interval;

        tokio::spawn(async move {
            let started = Instant::now();
            let mut ticker = interval_at(started + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = timers.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if !tick(&inner, &timers, |inner| inner.ease_once(epoch, started)) {
                    break;
                }
            }
        });
    }

    fn spawn_poll(&self, epoch: u64, timers: CancellationToken, job_id: String) {
        let inner = Arc::downgrade(&self.inner);
        let period = self.inner.settings.poll_interval;

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = timers.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if timers.is_cancelled() {
                    break;
                }
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                if !inner.poll_once(epoch, &job_id).await {
                    break;
                }
            }
        });
    }
}

fn tick(inner: &Weak<Inner>, timers: &CancellationToken, f: impl FnOnce(&Inner) -> bool) -> bool {
    if timers.is_cancelled() {
        return false;
    }
    match inner.upgrade() {
        Some(inner) => f(&*inner),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_settled_phases_accept_a_new_job() {
        assert!(Phase::Idle.can_generate());
        assert!(Phase::Done.can_generate());
        assert!(Phase::Error.can_generate());
        assert!(!Phase::Submitting.can_generate());
        assert!(!Phase::Running.can_generate());
        assert!(!Phase::Downloading.can_generate());
    }

    #[test]
    fn phase_labels() {
        assert_eq!(Phase::Idle.label(), "Ready");
        assert_eq!(Phase::Running.label(), "Generating…");
        assert_eq!(Phase::Downloading.label(), "Downloading image…");
    }

    #[test]
    fn default_timings() {
        let settings = ControllerSettings::default();
        assert_eq!(settings.poll_interval, Duration::from_millis(1200));
        assert_eq!(settings.progress_interval, Duration::from_millis(200));
        assert_eq!(settings.timeout, Duration::from_secs(90));
    }
}
