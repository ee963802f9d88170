use async_trait::async_trait;
use bytes::Bytes;
use nestory_frontend::lifecycle::{
    ClientError, ControllerSettings, GenerateError, JobApi, JobController, JobSnapshot, Phase,
    EMPTY_PROMPT_MESSAGE, TIMED_OUT_MESSAGE, UPSTREAM_FAILED_MESSAGE,
};
use nestory_frontend::models::NormalizedStatus;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const PNG: &[u8] = b"\x89PNG\r\n\x1a\nfake";

/// Upstream stand-in that replays a fixed list of statuses, then reports
/// `running` forever.
struct ScriptedApi {
    job_id: String,
    submit_delay: Duration,
    statuses: Mutex<VecDeque<NormalizedStatus>>,
    image: Option<Bytes>,
    submit_calls: AtomicUsize,
    status_calls: AtomicUsize,
    result_calls: AtomicUsize,
}

impl ScriptedApi {
    fn new(statuses: &[NormalizedStatus]) -> Self {
        Self {
            job_id: "abc".to_string(),
            submit_delay: Duration::ZERO,
            statuses: Mutex::new(statuses.iter().copied().collect()),
            image: Some(Bytes::from_static(PNG)),
            submit_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
            result_calls: AtomicUsize::new(0),
        }
    }

    fn with_submit_delay(mut self, delay: Duration) -> Self {
        self.submit_delay = delay;
        self
    }

    fn without_image(mut self) -> Self {
        self.image = None;
        self
    }

    fn push_statuses(&self, statuses: &[NormalizedStatus]) {
        self.statuses.lock().unwrap().extend(statuses.iter().copied());
    }

    fn submits(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    fn polls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    fn downloads(&self) -> usize {
        self.result_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobApi for ScriptedApi {
    async fn submit(&self, _prompt: &str, _steps: i64) -> Result<String, ClientError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        if !self.submit_delay.is_zero() {
            tokio::time::sleep(self.submit_delay).await;
        }
        Ok(self.job_id.clone())
    }

    async fn status(&self, _job_id: &str) -> Result<NormalizedStatus, ClientError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(NormalizedStatus::Running))
    }

    async fn result(&self, _job_id: &str) -> Result<Bytes, ClientError> {
        self.result_calls.fetch_add(1, Ordering::SeqCst);
        self.image.clone().ok_or(ClientError::BadResult {
            status: 502,
            snippet: "{\"ok\":false}".to_string(),
        })
    }
}

fn controller_for(api: &Arc<ScriptedApi>) -> JobController {
    JobController::new(api.clone(), ControllerSettings::default())
}

async fn sleep_secs(secs: f64) {
    tokio::time::sleep(Duration::from_secs_f64(secs)).await;
}

use NormalizedStatus::{Done, Error, Running};

#[tokio::test(start_paused = true)]
async fn job_runs_to_done_with_one_image() {
    let api = Arc::new(ScriptedApi::new(&[Running, Running, Done]));
    let controller = controller_for(&api);

    controller
        .generate("a cute superhero child", 10)
        .await
        .unwrap();

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.phase, Phase::Running);
    assert_eq!(snapshot.job_id.as_deref(), Some("abc"));
    assert_eq!(snapshot.progress, 12.0);

    sleep_secs(5.0).await;

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.phase, Phase::Done);
    assert_eq!(snapshot.progress, 100.0);
    assert!(snapshot.error.is_none());
    assert!(snapshot.image.is_some());
    assert_eq!(controller.images().len(), 1);
    assert_eq!(controller.image(), Some(Bytes::from_static(PNG)));
    assert_eq!(api.polls(), 3);
    assert_eq!(api.downloads(), 1);

    // timers are gone once done
    sleep_secs(30.0).await;
    assert_eq!(api.polls(), 3);
    assert_eq!(controller.snapshot().phase, Phase::Done);
}

#[tokio::test(start_paused = true)]
async fn progress_eases_but_stays_below_ceiling() {
    let api = Arc::new(ScriptedApi::new(&[]));
    let controller = controller_for(&api);

    controller.generate("lighthouse", 10).await.unwrap();

    sleep_secs(2.0).await;
    let early = controller.snapshot().progress;
    assert!(early > 12.0, "progress {}", early);
    assert!(early < 30.0, "progress {}", early);

    sleep_secs(60.0).await;
    let late = controller.snapshot().progress;
    assert!(late > early);
    assert!(late <= 92.0);
    assert_eq!(controller.snapshot().phase, Phase::Running);
}

#[tokio::test(start_paused = true)]
async fn upstream_error_stops_polling_without_download() {
    let api = Arc::new(ScriptedApi::new(&[Running, Error]));
    let controller = controller_for(&api);

    controller.generate("a dragon", 10).await.unwrap();
    sleep_secs(5.0).await;

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.phase, Phase::Error);
    assert_eq!(snapshot.progress, 0.0);
    assert_eq!(snapshot.error.as_deref(), Some(UPSTREAM_FAILED_MESSAGE));
    assert_eq!(api.downloads(), 0);

    let polls = api.polls();
    sleep_secs(10.0).await;
    assert_eq!(api.polls(), polls);
}

#[tokio::test(start_paused = true)]
async fn failed_download_ends_in_error() {
    let api = Arc::new(ScriptedApi::new(&[Done]).without_image());
    let controller = controller_for(&api);

    controller.generate("a dragon", 10).await.unwrap();
    sleep_secs(2.0).await;

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.phase, Phase::Error);
    assert_eq!(snapshot.progress, 0.0);
    assert_eq!(
        snapshot.error.as_deref(),
        Some("Result failed (502): {\"ok\":false}")
    );
    assert!(controller.images().is_empty());
}

#[tokio::test(start_paused = true)]
async fn second_generate_while_running_is_rejected() {
    let api = Arc::new(ScriptedApi::new(&[]));
    let controller = controller_for(&api);

    controller.generate("first", 10).await.unwrap();
    let before = controller.snapshot();

    let rejected = controller.generate("second", 10).await;
    assert_eq!(rejected, Err(GenerateError::Busy(Phase::Running)));
    assert_eq!(api.submits(), 1);
    assert_eq!(controller.snapshot().job_id, before.job_id);
    assert_eq!(controller.snapshot().phase, Phase::Running);
}

#[tokio::test(start_paused = true)]
async fn reset_from_done_releases_the_image() {
    let api = Arc::new(ScriptedApi::new(&[Done]));
    let controller = controller_for(&api);

    controller.generate("a boat", 10).await.unwrap();
    sleep_secs(2.0).await;

    let handle = controller.snapshot().image.expect("image after done");
    assert!(controller.images().get(&handle).is_some());

    controller.reset();

    assert_eq!(controller.snapshot(), JobSnapshot::default());
    assert!(controller.images().get(&handle).is_none());
    assert!(controller.images().is_empty());
    assert!(controller.image().is_none());
}

#[tokio::test(start_paused = true)]
async fn new_job_replaces_previous_image() {
    let api = Arc::new(ScriptedApi::new(&[Done]));
    let controller = controller_for(&api);

    controller.generate("first", 10).await.unwrap();
    sleep_secs(2.0).await;
    let first = controller.snapshot().image.expect("first image");

    api.push_statuses(&[Done]);
    controller.generate("second", 10).await.unwrap();
    assert!(controller.images().get(&first).is_none());

    sleep_secs(2.0).await;
    let second = controller.snapshot().image.expect("second image");
    assert_ne!(first, second);
    assert_eq!(controller.images().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn times_out_when_job_never_finishes() {
    let api = Arc::new(ScriptedApi::new(&[]));
    let controller = controller_for(&api);

    controller.generate("slow", 10).await.unwrap();

    sleep_secs(89.0).await;
    assert_eq!(controller.snapshot().phase, Phase::Running);

    sleep_secs(2.0).await;
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.phase, Phase::Error);
    assert_eq!(snapshot.progress, 0.0);
    assert_eq!(snapshot.error.as_deref(), Some(TIMED_OUT_MESSAGE));

    let polls = api.polls();
    sleep_secs(10.0).await;
    assert_eq!(api.polls(), polls);
}

#[tokio::test(start_paused = true)]
async fn times_out_while_submit_is_still_pending() {
    let api = Arc::new(ScriptedApi::new(&[Done]).with_submit_delay(Duration::from_secs(120)));
    let controller = controller_for(&api);

    let generator = controller.clone();
    let pending = tokio::spawn(async move { generator.generate("stuck", 10).await });

    sleep_secs(0.1).await;
    assert_eq!(controller.snapshot().phase, Phase::Submitting);

    sleep_secs(91.0).await;
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.phase, Phase::Error);
    assert_eq!(snapshot.progress, 0.0);
    assert_eq!(snapshot.error.as_deref(), Some(TIMED_OUT_MESSAGE));

    // the late job id must not revive the job
    pending.await.unwrap().unwrap();
    sleep_secs(10.0).await;

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.phase, Phase::Error);
    assert_eq!(snapshot.error.as_deref(), Some(TIMED_OUT_MESSAGE));
    assert!(snapshot.job_id.is_none());
    assert_eq!(api.submits(), 1);
    assert_eq!(api.polls(), 0);
    assert_eq!(api.downloads(), 0);
}

#[tokio::test(start_paused = true)]
async fn empty_prompt_fails_without_submitting() {
    let api = Arc::new(ScriptedApi::new(&[]));
    let controller = controller_for(&api);

    controller.generate("   ", 10).await.unwrap();

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.phase, Phase::Error);
    assert_eq!(snapshot.error.as_deref(), Some(EMPTY_PROMPT_MESSAGE));
    assert_eq!(api.submits(), 0);

    // an error is a settled phase
    assert!(snapshot.phase.can_generate());
}

#[tokio::test(start_paused = true)]
async fn submit_reply_after_reset_is_discarded() {
    let api = Arc::new(ScriptedApi::new(&[Done]).with_submit_delay(Duration::from_secs(2)));
    let controller = controller_for(&api);

    let generator = controller.clone();
    let pending = tokio::spawn(async move { generator.generate("late", 10).await });

    sleep_secs(0.1).await;
    assert_eq!(controller.snapshot().phase, Phase::Submitting);
    assert_eq!(controller.snapshot().progress, 5.0);

    controller.reset();
    pending.await.unwrap().unwrap();

    sleep_secs(5.0).await;
    let snapshot = controller.snapshot();
    assert_eq!(snapshot, JobSnapshot::default());
    assert_eq!(api.polls(), 0);
    assert_eq!(api.downloads(), 0);
}

#[tokio::test(start_paused = true)]
async fn observers_see_the_final_state() {
    let api = Arc::new(ScriptedApi::new(&[Done]));
    let controller = controller_for(&api);
    let mut updates = controller.subscribe();

    controller.generate("a kite", 10).await.unwrap();

    let done = tokio::time::timeout(
        Duration::from_secs(10),
        updates.wait_for(|snapshot| snapshot.phase == Phase::Done),
    )
    .await
    .expect("no done update")
    .expect("controller dropped")
    .clone();

    assert_eq!(done.progress, 100.0);
    assert_eq!(done.job_id.as_deref(), Some("abc"));
}
