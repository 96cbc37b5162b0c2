//! services/client/src/app/video.rs
//!
//! Image-to-video generation as an explicit job: submit once, then poll on a fixed
//! interval until the operation finishes or the attempt cap is reached.

use std::sync::Arc;
use std::time::Duration;
use study_sync_core::domain::{OperationStatus, VideoRequest};
use study_sync_core::ports::{PortError, VideoService};
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum VideoJobState {
    #[default]
    Idle,
    Submitted,
    Polling { attempt: u32 },
    Succeeded(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VideoError {
    #[error("Video service error: {0}")]
    Service(#[from] PortError),

    #[error("Video generation failed: {0}")]
    Generation(String),

    #[error("Video generation did not finish after {0} status checks")]
    TimedOut(u32),
}

pub struct VideoJob {
    service: Arc<dyn VideoService>,
    poll_interval: Duration,
    max_polls: u32,
    state: watch::Sender<VideoJobState>,
}

impl VideoJob {
    pub fn new(service: Arc<dyn VideoService>, poll_interval: Duration, max_polls: u32) -> Self {
        let (state, _) = watch::channel(VideoJobState::Idle);
        Self { service, poll_interval, max_polls, state }
    }

    pub fn state(&self) -> VideoJobState {
        self.state.borrow().clone()
    }

    /// Runs one generation to completion and returns the playable media URI.
    pub async fn run(&self, request: VideoRequest) -> Result<String, VideoError> {
        let result = self.drive(request).await;
        match &result {
            Ok(uri) => {
                info!("Video generation finished.");
                self.state.send_replace(VideoJobState::Succeeded(uri.clone()));
            }
            Err(e) => {
                error!("Video generation error: {}", e);
                self.state.send_replace(VideoJobState::Failed(e.to_string()));
            }
        }
        result
    }

    async fn drive(&self, request: VideoRequest) -> Result<String, VideoError> {
        let operation = self.service.submit(&request).await?;
        self.state.send_replace(VideoJobState::Submitted);

        for attempt in 1..=self.max_polls {
            tokio::time::sleep(self.poll_interval).await;
            self.state.send_replace(VideoJobState::Polling { attempt });
            match self.service.poll(&operation).await? {
                OperationStatus::Running => continue,
                OperationStatus::Succeeded(uri) => return Ok(uri),
                OperationStatus::Failed(reason) => return Err(VideoError::Generation(reason)),
            }
        }
        Err(VideoError::TimedOut(self.max_polls))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicU32, Ordering};
    use study_sync_core::domain::{AspectRatio, Attachment, OperationHandle};
    use study_sync_core::ports::PortResult;

    /// Reports `Running` until the configured poll, then the final status.
    struct FakeVideo {
        finish_after: Option<u32>,
        outcome: OperationStatus,
        polls: AtomicU32,
    }

    #[async_trait]
    impl VideoService for FakeVideo {
        async fn submit(&self, _request: &VideoRequest) -> PortResult<OperationHandle> {
            Ok(OperationHandle("operations/42".into()))
        }

        async fn poll(&self, operation: &OperationHandle) -> PortResult<OperationStatus> {
            assert_eq!(operation.0, "operations/42");
            let polls = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            match self.finish_after {
                Some(n) if polls >= n => Ok(self.outcome.clone()),
                _ => Ok(OperationStatus::Running),
            }
        }
    }

    fn request() -> VideoRequest {
        VideoRequest {
            image: Attachment { name: "cell.png".into(), mime_type: "image/png".into(), data: Bytes::from_static(b"png") },
            prompt: None,
            aspect_ratio: AspectRatio::Landscape,
        }
    }

    fn job(fake: FakeVideo, max_polls: u32) -> (VideoJob, Arc<FakeVideo>) {
        let fake = Arc::new(fake);
        (VideoJob::new(fake.clone(), Duration::from_secs(5), max_polls), fake)
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn polls_until_the_operation_finishes() {
        let (job, fake) = job(
            FakeVideo {
                finish_after: Some(3),
                outcome: OperationStatus::Succeeded("https://x/v?key=k".into()),
                polls: AtomicU32::new(0),
            },
            120,
        );
        let started = tokio::time::Instant::now();

        let uri = job.run(request()).await.unwrap();

        assert_eq!(uri, "https://x/v?key=k");
        assert_eq!(fake.polls.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(15));
        assert_eq!(job.state(), VideoJobState::Succeeded(uri));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn gives_up_after_the_poll_cap() {
        let (job, fake) = job(
            FakeVideo { finish_after: None, outcome: OperationStatus::Running, polls: AtomicU32::new(0) },
            4,
        );
        assert_eq!(job.run(request()).await, Err(VideoError::TimedOut(4)));
        assert_eq!(fake.polls.load(Ordering::SeqCst), 4);
        assert!(matches!(job.state(), VideoJobState::Failed(_)));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn remote_failure_ends_the_job() {
        let (job, _) = job(
            FakeVideo {
                finish_after: Some(1),
                outcome: OperationStatus::Failed("No video URI returned from the API.".into()),
                polls: AtomicU32::new(0),
            },
            120,
        );
        assert_eq!(
            job.run(request()).await,
            Err(VideoError::Generation("No video URI returned from the API.".into()))
        );
    }
}
