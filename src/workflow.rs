//! Image-to-video job workflow: upload, submit, poll, fetch result.
//!
//! A [`WorkflowController`] tracks a single job at a time. The observable
//! [`WorkflowState`] lives in a watch channel; the running job is one spawned
//! task whose poll timer is a single-shot sleep re-armed after every status
//! response, so polls never overlap. Replacing or tearing down the job
//! cancels that task and bumps an epoch under the same lock, which discards
//! any update a stale task might still try to publish.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::client::VideoProvider;
use crate::models::{
    GenerationInput, ImageUpload, QueueStatus, DEFAULT_ASPECT_RATIO, DEFAULT_DURATION,
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

pub const UPLOADING_MESSAGE: &str = "Uploading image...";
pub const SUBMITTING_MESSAGE: &str = "Starting video generation...";
pub const PROCESSING_MESSAGE: &str = "Processing...";
pub const COMPLETED_MESSAGE: &str = "Video generation completed!";

pub const SUBMIT_FALLBACK: &str = "Failed to generate video";
pub const STATUS_FALLBACK: &str = "Failed to check status";
pub const FETCH_FAILED_MESSAGE: &str = "Failed to fetch video data";
pub const NO_VIDEO_MESSAGE: &str = "Video generation completed but no video URL was returned";
pub const FAILED_MESSAGE: &str = "Video generation failed";
pub const UNKNOWN_STATUS_MESSAGE: &str = "Received unknown status from server";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("Please provide both an image and a prompt")]
    MissingInput,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum Phase {
    #[default]
    Idle,
    Uploading,
    Submitting,
    Polling,
    Completed,
    Failed,
    Error,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed | Phase::Error)
    }

    pub fn is_active(self) -> bool {
        matches!(self, Phase::Uploading | Phase::Submitting | Phase::Polling)
    }
}

/// What the UI shows. `error` and `video_url` are never both set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkflowState {
    pub phase: Phase,
    pub progress: String,
    pub error: Option<String>,
    pub video_url: Option<String>,
    pub request_id: Option<String>,
}

impl WorkflowState {
    pub fn is_generating(&self) -> bool {
        self.phase.is_active()
    }

    fn begin(&mut self) {
        *self = WorkflowState {
            phase: Phase::Uploading,
            progress: UPLOADING_MESSAGE.to_owned(),
            ..WorkflowState::default()
        };
    }

    fn complete(&mut self, video_url: &str) {
        self.phase = Phase::Completed;
        self.progress = COMPLETED_MESSAGE.to_owned();
        self.error = None;
        self.video_url = Some(video_url.to_owned());
    }

    fn fail(&mut self, phase: Phase, message: String) {
        self.phase = phase;
        self.progress.clear();
        self.error = Some(message);
        self.video_url = None;
    }

    /// Records a validation error without leaving the current phase.
    fn reject(&mut self, message: String) {
        self.error = Some(message);
        self.video_url = None;
    }
}

/// Fixed generation parameters and the poll cadence.
#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    pub poll_interval: Duration,
    pub aspect_ratio: String,
    pub duration: String,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            aspect_ratio: DEFAULT_ASPECT_RATIO.to_owned(),
            duration: DEFAULT_DURATION.to_owned(),
        }
    }
}

struct JobHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl JobHandle {
    fn stop(self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

#[derive(Default)]
struct ActiveJob {
    epoch: u64,
    handle: Option<JobHandle>,
}

struct Shared {
    state: watch::Sender<WorkflowState>,
    active: Mutex<ActiveJob>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ActiveJob> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Applies `update` only while `epoch` is still the current job.
    fn apply<F>(&self, epoch: u64, update: F) -> bool
    where
        F: FnOnce(&mut WorkflowState),
    {
        let active = self.lock();
        if active.epoch != epoch {
            return false;
        }
        self.state.send_modify(update);
        true
    }
}

pub struct WorkflowController<P: VideoProvider> {
    provider: Arc<P>,
    settings: WorkflowSettings,
    shared: Arc<Shared>,
}

impl<P: VideoProvider> WorkflowController<P> {
    pub fn new(provider: Arc<P>, settings: WorkflowSettings) -> Self {
        let (state, _) = watch::channel(WorkflowState::default());

        Self {
            provider,
            settings,
            shared: Arc::new(Shared {
                state,
                active: Mutex::new(ActiveJob::default()),
            }),
        }
    }

    pub fn state(&self) -> WorkflowState {
        self.shared.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<WorkflowState> {
        self.shared.state.subscribe()
    }

    /// Starts a new job, replacing any job still in flight.
    ///
    /// Must be called from within a tokio runtime. Without both an image and
    /// a non-empty prompt nothing is sent to the provider and the phase is
    /// left as it was.
    pub fn submit(&self, image: Option<ImageUpload>, prompt: &str) -> Result<(), WorkflowError> {
        let image = match image {
            Some(image) if !prompt.is_empty() => image,
            _ => {
                tracing::warn!("Rejected submission without both an image and a prompt");
                let message = WorkflowError::MissingInput.to_string();
                self.shared.state.send_modify(|state| state.reject(message));
                return Err(WorkflowError::MissingInput);
            }
        };

        let mut active = self.shared.lock();

        if let Some(previous) = active.handle.take() {
            tracing::debug!(epoch = active.epoch, "Cancelling previous job");
            previous.stop();
        }

        active.epoch += 1;
        self.shared.state.send_modify(WorkflowState::begin);

        let cancel = CancellationToken::new();
        let runner = JobRunner {
            provider: Arc::clone(&self.provider),
            settings: self.settings.clone(),
            shared: Arc::clone(&self.shared),
            epoch: active.epoch,
            cancel: cancel.clone(),
        };

        tracing::info!(epoch = active.epoch, file_name = %image.file_name, "Starting job");

        let task = tokio::spawn(runner.run(image, prompt.to_owned()));
        active.handle = Some(JobHandle { cancel, task });

        Ok(())
    }

    /// Abandons the job in flight, if any. State is left as last published
    /// and no further provider call is made.
    pub fn teardown(&self) {
        let mut active = self.shared.lock();
        if let Some(handle) = active.handle.take() {
            tracing::debug!(epoch = active.epoch, "Tearing down job");
            handle.stop();
        }
        active.epoch += 1;
    }
}

impl<P: VideoProvider> Drop for WorkflowController<P> {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn describe(err: &impl std::fmt::Display, fallback: &str) -> String {
    let message = err.to_string();
    if message.trim().is_empty() {
        fallback.to_owned()
    } else {
        message
    }
}

struct JobRunner<P> {
    provider: Arc<P>,
    settings: WorkflowSettings,
    shared: Arc<Shared>,
    epoch: u64,
    cancel: CancellationToken,
}

impl<P: VideoProvider> JobRunner<P> {
    async fn run(self, image: ImageUpload, prompt: String) {
        if let Some(request_id) = self.start(image, prompt).await {
            self.poll(&request_id).await;
        }
    }

    /// Resolves to `None` once the job is cancelled.
    async fn guard<F: Future>(&self, future: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            output = future => Some(output),
        }
    }

    fn update<F: FnOnce(&mut WorkflowState)>(&self, update: F) {
        self.shared.apply(self.epoch, update);
    }

    fn fail(&self, phase: Phase, message: String) {
        self.update(|state| state.fail(phase, message));
    }

    async fn start(&self, image: ImageUpload, prompt: String) -> Option<String> {
        let image_url = match self.guard(self.provider.upload_image(&image)).await? {
            Ok(url) => url,
            Err(err) => {
                tracing::error!(error = %err, "Image upload failed");
                self.fail(Phase::Error, describe(&err, SUBMIT_FALLBACK));
                return None;
            }
        };

        self.update(|state| {
            state.phase = Phase::Submitting;
            state.progress = SUBMITTING_MESSAGE.to_owned();
        });

        let input = GenerationInput {
            prompt,
            image_url,
            aspect_ratio: self.settings.aspect_ratio.clone(),
            duration: self.settings.duration.clone(),
        };

        let request_id = match self.guard(self.provider.submit(&input)).await? {
            Ok(request_id) => request_id,
            Err(err) => {
                tracing::error!(error = %err, "Submitting generation request failed");
                self.fail(Phase::Error, describe(&err, SUBMIT_FALLBACK));
                return None;
            }
        };

        tracing::info!(request_id = %request_id, "Submitted generation request");

        self.update(|state| {
            state.phase = Phase::Polling;
            state.request_id = Some(request_id.clone());
        });

        Some(request_id)
    }

    async fn poll(&self, request_id: &str) {
        loop {
            let status = match self.guard(self.provider.status(request_id)).await {
                None => return,
                Some(Ok(status)) => status,
                Some(Err(err)) => {
                    tracing::error!(request_id, error = %err, "Error checking status");
                    self.fail(Phase::Error, describe(&err, STATUS_FALLBACK));
                    return;
                }
            };

            match status.status {
                QueueStatus::InQueue | QueueStatus::InProgress => {
                    let progress = status.latest_log().unwrap_or(PROCESSING_MESSAGE).to_owned();
                    tracing::debug!(
                        request_id,
                        queue_position = ?status.queue_position,
                        progress = %progress,
                        "Still processing",
                    );
                    self.update(|state| state.progress = progress);

                    if self.guard(tokio::time::sleep(self.settings.poll_interval)).await.is_none() {
                        return;
                    }
                }
                QueueStatus::Completed => {
                    self.finish(request_id).await;
                    return;
                }
                QueueStatus::Failed => {
                    tracing::warn!(request_id, "Generation failed");
                    self.fail(Phase::Failed, FAILED_MESSAGE.to_owned());
                    return;
                }
                QueueStatus::Unknown => {
                    tracing::error!(request_id, "Unknown status");
                    self.fail(Phase::Error, UNKNOWN_STATUS_MESSAGE.to_owned());
                    return;
                }
            }
        }
    }

    async fn finish(&self, request_id: &str) {
        let result = match self.guard(self.provider.fetch_result(request_id)).await {
            None => return,
            Some(Ok(result)) => result,
            Some(Err(err)) => {
                tracing::error!(request_id, error = %err, "Error fetching result");
                self.fail(Phase::Error, FETCH_FAILED_MESSAGE.to_owned());
                return;
            }
        };

        match result.video_url() {
            Some(url) => {
                tracing::info!(request_id, video_url = url, "Generation completed");
                self.update(|state| state.complete(url));
            }
            None => {
                tracing::error!(request_id, "No video URL in result");
                self.fail(Phase::Error, NO_VIDEO_MESSAGE.to_owned());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_and_active_phases_are_disjoint() {
        for phase in [
            Phase::Idle,
            Phase::Uploading,
            Phase::Submitting,
            Phase::Polling,
            Phase::Completed,
            Phase::Failed,
            Phase::Error,
        ] {
            assert!(!(phase.is_terminal() && phase.is_active()), "{phase:?}");
        }
        assert!(!Phase::Idle.is_terminal());
        assert!(!Phase::Idle.is_active());
    }

    #[test]
    fn error_and_video_url_are_mutually_exclusive() {
        let mut state = WorkflowState::default();
        state.complete("https://cdn/v.mp4");
        assert!(state.error.is_none());

        state.reject("bad input".into());
        assert!(state.video_url.is_none());
        assert_eq!(state.phase, Phase::Completed);

        state.begin();
        assert!(state.error.is_none() && state.video_url.is_none());
        assert!(state.is_generating());

        state.complete("https://cdn/w.mp4");
        assert!(state.error.is_none());
        assert!(!state.is_generating());

        state.fail(Phase::Error, "boom".into());
        assert!(state.video_url.is_none());
        assert!(state.progress.is_empty());
    }

    #[test]
    fn describe_falls_back_on_blank_messages() {
        assert_eq!(describe(&"  ", STATUS_FALLBACK), STATUS_FALLBACK);
        assert_eq!(describe(&"network down", STATUS_FALLBACK), "network down");
    }
}
