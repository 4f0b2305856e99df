//! Video processing state machine.
//!
//! `Idle -> Probing -> {Converting | AlreadyCompatible} -> Finalizing -> {Completed | Failed | Aborted}`
//!
//! Abort is checked before start, after the probe, before the transcode starts,
//! right after it resolves, before finalizing and before completion. Outputs stay
//! staged until completion, so no partial run is ever served as processed.

use crate::application::reconciler::DanglingFileReconciler;
use crate::application::registry::InFlightJobs;
use crate::config::PipelineConfig;
use crate::domain::artifacts::DanglingFile;
use crate::domain::av::probe::ProbeResult;
use crate::domain::jobs::{
    validate_video_id, JobStatus, Namespace, ProcessingJob, ProcessingResult, TranscodeOutcome,
    VideoInput,
};
use crate::domain::progress::ProgressPlan;
use crate::error::{PipelineError, PipelineResult};
use crate::ports::events::{EventStatus, ProgressEventSink, VideoProcessingEvent};
use crate::ports::repository::{ProcessingRepository, ProcessingStatusUpdate};
use crate::ports::storage::MediaStore;
use crate::ports::transcoder::Transcoder;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Caller progress callback: overall percentage and a human readable message.
pub type ProgressFn = dyn Fn(u8, &str) + Send + Sync;

#[derive(Debug, Clone)]
pub struct ProcessingSettings {
    /// Inputs already in this codec skip transcoding
    pub target_codec: String,
    pub plan: ProgressPlan,
    pub job_timeout: Option<Duration>,
    pub retry_failed_on_restart: bool,
    pub generate_thumbnails: bool,
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            target_codec: "h264".to_string(),
            plan: ProgressPlan::default(),
            job_timeout: None,
            retry_failed_on_restart: false,
            generate_thumbnails: true,
        }
    }
}

impl From<&PipelineConfig> for ProcessingSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            target_codec: config.encoder.target_codec.clone(),
            plan: ProgressPlan::default(),
            job_timeout: config.job_timeout,
            retry_failed_on_restart: config.retry_failed_on_restart,
            generate_thumbnails: config.generate_thumbnails,
        }
    }
}

/// What a resumption pass did with each incomplete video.
#[derive(Debug, Clone, Default)]
pub struct ResumeReport {
    pub completed: Vec<String>,
    pub failed: Vec<(String, String)>,
    pub aborted: Vec<String>,
    /// Videos with a recorded error, left alone unless retries are enabled
    pub skipped_failed: Vec<String>,
    pub already_running: Vec<String>,
}

pub struct VideoProcessingService<S, T, R, E> {
    store: S,
    transcoder: T,
    repo: R,
    events: E,
    settings: ProcessingSettings,
}

impl<S, T, R, E> VideoProcessingService<S, T, R, E>
where
    S: MediaStore,
    T: Transcoder,
    R: ProcessingRepository,
    E: ProgressEventSink,
{
    pub fn new(store: S, transcoder: T, repo: R, events: E, settings: ProcessingSettings) -> Self {
        Self {
            store,
            transcoder,
            repo,
            events,
            settings,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    pub fn settings(&self) -> &ProcessingSettings {
        &self.settings
    }

    pub fn reconciler(&self) -> DanglingFileReconciler<'_, S> {
        DanglingFileReconciler::new(&self.store)
    }

    /// Process one video end to end.
    ///
    /// Returns [`PipelineError::Aborted`] once `cancel` fires, and
    /// [`PipelineError::TimedOut`] when the configured job timeout elapses.
    /// Every failure is recorded through the repository and the event sink
    /// before it is returned.
    pub async fn process_video_from_file(
        &self,
        input: VideoInput,
        namespace: &Namespace,
        on_progress: Option<&ProgressFn>,
        cancel: &CancellationToken,
    ) -> PipelineResult<ProcessingResult> {
        if cancel.is_cancelled() {
            info!(video_id = %input.id, "Aborted before start");
            return Err(PipelineError::Aborted);
        }
        validate_video_id(&input.id)?;

        let job_token = cancel.child_token();
        let _timer = self
            .settings
            .job_timeout
            .map(|timeout| TimeoutGuard::start(timeout, job_token.clone()));

        info!(video_id = %input.id, namespace = %namespace, "Processing video");
        let mut run = JobRun {
            service: self,
            job: ProcessingJob::new(input.id.clone(), namespace.clone()),
            on_progress,
            produced_output: None,
        };

        match run.execute(&input, &job_token).await {
            Ok(result) => Ok(result),
            Err(err) => {
                let err = self.classify(err, cancel, &job_token);
                run.discard_output().await;
                if err.is_abort() {
                    run.record_abort().await;
                } else {
                    run.record_failure(&err).await;
                }
                Err(err)
            }
        }
    }

    pub async fn get_dangling_files(&self, namespace: &Namespace) -> PipelineResult<Vec<DanglingFile>> {
        self.reconciler().list_dangling(namespace).await
    }

    pub async fn cleanup(&self, video_id: &str, namespace: &Namespace) -> PipelineResult<usize> {
        self.reconciler().cleanup(video_id, namespace).await
    }

    pub async fn get_processed_file(
        &self,
        video_id: &str,
        namespace: &Namespace,
    ) -> PipelineResult<PathBuf> {
        self.store.get_processed_file(video_id, namespace).await
    }

    /// Any error observed after cancellation is an abort; a fired timeout is a failure.
    fn classify(
        &self,
        err: PipelineError,
        cancel: &CancellationToken,
        job_token: &CancellationToken,
    ) -> PipelineError {
        if cancel.is_cancelled() {
            PipelineError::Aborted
        } else if job_token.is_cancelled() {
            PipelineError::TimedOut(self.settings.job_timeout.unwrap_or_default())
        } else {
            err
        }
    }

    /// Mark a video failed without running it, e.g. when its source cannot be resolved.
    async fn record_unstartable(&self, video_id: &str, err: &PipelineError) {
        let message = err.detailed_message();
        error!(video_id, "Cannot resume video: {}", message);
        if let Err(e) = self
            .repo
            .update_video_processing_status(video_id, ProcessingStatusUpdate::failed(&message))
            .await
        {
            warn!(video_id, "Failed to record failure: {}", e);
        }
        self.events.emit(VideoProcessingEvent::new(
            video_id,
            0,
            EventStatus::Failed,
            message,
        ));
    }
}

impl<S, T, R, E> VideoProcessingService<S, T, R, E>
where
    S: MediaStore + 'static,
    T: Transcoder + 'static,
    R: ProcessingRepository + 'static,
    E: ProgressEventSink + 'static,
{
    /// Restart every incomplete video in the background.
    ///
    /// Returns immediately; the handle resolves once every resumed job ended.
    /// Jobs run concurrently and are registered in `registry`, so cancelling
    /// `shutdown` (or one id through the registry) aborts them.
    pub fn resume_incomplete(
        self: &Arc<Self>,
        namespace: Namespace,
        registry: InFlightJobs,
        shutdown: CancellationToken,
    ) -> JoinHandle<ResumeReport> {
        let service = Arc::clone(self);
        tokio::spawn(async move { service.run_resumption(namespace, registry, shutdown).await })
    }

    async fn run_resumption(
        self: Arc<Self>,
        namespace: Namespace,
        registry: InFlightJobs,
        shutdown: CancellationToken,
    ) -> ResumeReport {
        let mut report = ResumeReport::default();
        let incomplete = match self.repo.find_incomplete_videos().await {
            Ok(videos) => videos,
            Err(e) => {
                error!("Failed to query incomplete videos: {}", e);
                return report;
            }
        };
        if incomplete.is_empty() {
            debug!("No incomplete videos to resume");
            return report;
        }

        let mut tasks = JoinSet::new();
        for video in incomplete {
            if video.processing_error.is_some() && !self.settings.retry_failed_on_restart {
                debug!(video_id = %video.id, "Skipping previously failed video");
                report.skipped_failed.push(video.id);
                continue;
            }
            let Some(ticket) = registry.try_begin(&video.id, &shutdown) else {
                report.already_running.push(video.id);
                continue;
            };

            info!(
                video_id = %video.id,
                last_progress = video.processing_progress,
                "Resuming video"
            );
            let service = Arc::clone(&self);
            let namespace = namespace.clone();
            tasks.spawn(async move {
                let video_id = ticket.video_id().to_string();
                let source = match service.repo.get_video_file_path(&video_id).await {
                    Ok(source) => source,
                    Err(e) => {
                        service.record_unstartable(&video_id, &e).await;
                        return (video_id, Err(e));
                    }
                };
                let result = service
                    .process_video_from_file(
                        VideoInput::new(video_id.clone(), source),
                        &namespace,
                        None,
                        ticket.token(),
                    )
                    .await;
                (video_id, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((video_id, Ok(_))) => report.completed.push(video_id),
                Ok((video_id, Err(e))) if e.is_abort() => report.aborted.push(video_id),
                Ok((video_id, Err(e))) => report.failed.push((video_id, e.to_string())),
                Err(e) => error!("Resumed job panicked: {}", e),
            }
        }

        info!(
            completed = report.completed.len(),
            failed = report.failed.len(),
            aborted = report.aborted.len(),
            skipped = report.skipped_failed.len(),
            "Resumption finished"
        );
        report
    }
}

/// State of one `process_video_from_file` call.
struct JobRun<'a, S, T, R, E> {
    service: &'a VideoProcessingService<S, T, R, E>,
    job: ProcessingJob,
    on_progress: Option<&'a ProgressFn>,
    /// Output written by this run, removed again if the run does not complete
    produced_output: Option<PathBuf>,
}

impl<'a, S, T, R, E> JobRun<'a, S, T, R, E>
where
    S: MediaStore,
    T: Transcoder,
    R: ProcessingRepository,
    E: ProgressEventSink,
{
    async fn execute(
        &mut self,
        input: &VideoInput,
        token: &CancellationToken,
    ) -> PipelineResult<ProcessingResult> {
        let service = self.service;
        let plan = service.settings.plan;
        let video_id = input.id.as_str();
        let namespace = self.job.namespace.clone();

        service
            .repo
            .update_video_processing_status(video_id, ProcessingStatusUpdate::started())
            .await?;

        let local = service
            .store
            .materialize_local_copy(video_id, &input.source, &namespace)
            .await?;
        self.report(plan.source_ready, "Source ready", None).await?;

        checkpoint(token)?;
        self.job.advance(JobStatus::Probing);
        let probe = service.transcoder.probe(&local).await?;
        debug!(
            video_id,
            codec = %probe.codec,
            width = probe.width,
            height = probe.height,
            duration = probe.duration,
            "Probed input"
        );
        self.report(
            plan.probed,
            &format!(
                "Detected {} {}x{} ({:.1}s)",
                probe.codec, probe.width, probe.height, probe.duration
            ),
            Some(probe.clone()),
        )
        .await?;
        checkpoint(token)?;

        let mut outcome = if probe.has_codec(&service.settings.target_codec) {
            self.keep_compatible(video_id, &namespace, &local, &probe).await?
        } else {
            self.convert(video_id, &namespace, &local, &probe, token).await?
        };

        checkpoint(token)?;
        self.job.advance(JobStatus::Finalizing);
        self.report(plan.finalizing, "Finalizing", None).await?;
        let thumbnail = self.finalize(video_id, &namespace, &outcome, &probe, token).await?;

        checkpoint(token)?;
        outcome.output_handle = self.complete(&probe, &outcome.output_handle).await?;

        Ok(ProcessingResult {
            video_id: video_id.to_string(),
            namespace,
            probe,
            outcome,
            thumbnail,
        })
    }

    async fn keep_compatible(
        &mut self,
        video_id: &str,
        namespace: &Namespace,
        local: &Path,
        probe: &ProbeResult,
    ) -> PipelineResult<TranscodeOutcome> {
        info!(video_id, codec = %probe.codec, "Input already compatible, skipping transcode");
        let staged = self
            .service
            .store
            .adopt_as_output(video_id, namespace, local)
            .await?;
        self.produced_output = Some(staged.clone());
        let plan = self.service.settings.plan;
        self.report(plan.transcode_end, "Already in target codec", None)
            .await?;

        Ok(TranscodeOutcome {
            was_converted: false,
            output_handle: staged,
            final_codec: probe.codec.clone(),
        })
    }

    async fn convert(
        &mut self,
        video_id: &str,
        namespace: &Namespace,
        local: &Path,
        probe: &ProbeResult,
        token: &CancellationToken,
    ) -> PipelineResult<TranscodeOutcome> {
        let service = self.service;
        let plan = service.settings.plan;
        let target = service.settings.target_codec.as_str();

        self.job.advance(JobStatus::Transcoding);
        let output = service.store.output_path(video_id, namespace).await?;
        self.report(
            plan.transcode_start,
            &format!("Transcoding {} to {}", probe.codec, target),
            None,
        )
        .await?;
        checkpoint(token)?;

        // Ticks arrive on the adapter's side; repository writes stay on this task.
        let (tick_tx, mut tick_rx) = mpsc::unbounded_channel::<f64>();
        let transcoder = &service.transcoder;
        let output_ref = output.as_path();
        let transcode = async move {
            let on_tick = move |percent: f64| {
                let _ = tick_tx.send(percent);
            };
            transcoder
                .transcode_to_standard_codec(local, output_ref, &on_tick, token)
                .await
        };
        let forward = async {
            while let Some(percent) = tick_rx.recv().await {
                self.report(
                    plan.map_transcode(percent),
                    &format!("Transcoding {:.0}%", percent.clamp(0.0, 100.0)),
                    None,
                )
                .await?;
            }
            Ok::<_, PipelineError>(())
        };
        let (transcoded, forwarded) = tokio::join!(transcode, forward);

        // The staged output exists as soon as the adapter renamed it into place.
        if transcoded.is_ok() {
            self.produced_output = Some(output.clone());
        }
        transcoded?;
        // A cancellation that raced the final write must not count as converted.
        checkpoint(token)?;
        forwarded?;

        self.report(plan.transcode_end, "Transcode complete", None)
            .await?;
        Ok(TranscodeOutcome {
            was_converted: true,
            output_handle: output,
            final_codec: target.to_string(),
        })
    }

    /// Derivative artifacts. Only an abort stops the job here.
    async fn finalize(
        &mut self,
        video_id: &str,
        namespace: &Namespace,
        outcome: &TranscodeOutcome,
        probe: &ProbeResult,
        token: &CancellationToken,
    ) -> PipelineResult<Option<PathBuf>> {
        let service = self.service;
        if !service.settings.generate_thumbnails {
            return Ok(None);
        }

        let thumbnail = service.store.thumbnail_path(video_id, namespace).await?;
        let at_seconds = (probe.duration / 2.0).min(1.0);
        match service
            .transcoder
            .extract_thumbnail(&outcome.output_handle, &thumbnail, at_seconds, token)
            .await
        {
            Ok(()) => Ok(Some(thumbnail)),
            Err(e) if e.is_abort() || token.is_cancelled() => Err(PipelineError::Aborted),
            Err(e) => {
                warn!(video_id, "Thumbnail extraction failed: {}", e);
                Ok(None)
            }
        }
    }

    /// Publish the staged output, then mark the video processed.
    async fn complete(&mut self, probe: &ProbeResult, staged: &Path) -> PipelineResult<PathBuf> {
        let service = self.service;
        let video_id = self.job.video_id.clone();

        let output = service
            .store
            .promote_output(&video_id, &self.job.namespace, staged)
            .await?;
        // discarded again if the status write below fails
        self.produced_output = Some(output.clone());

        service
            .repo
            .update_video_processing_status(&video_id, ProcessingStatusUpdate::completed())
            .await?;
        self.job.complete();

        let message = "Processing complete";
        if let Some(on_progress) = self.on_progress {
            on_progress(self.job.progress(), message);
        }
        service.events.emit(
            VideoProcessingEvent::new(&video_id, 100, EventStatus::Completed, message)
                .with_metadata(probe.clone()),
        );
        info!(video_id = %video_id, "Processing completed");
        Ok(output)
    }

    /// Forward a progress report. The callback sees every report; the
    /// repository and the sink only see changed values.
    async fn report(
        &mut self,
        percent: u8,
        message: &str,
        metadata: Option<ProbeResult>,
    ) -> PipelineResult<()> {
        let (progress, moved) = self.job.record_progress(percent);
        if let Some(on_progress) = self.on_progress {
            on_progress(progress, message);
        }
        if !moved {
            return Ok(());
        }

        let video_id = self.job.video_id.as_str();
        self.service
            .repo
            .update_video_processing_status(video_id, ProcessingStatusUpdate::progress(progress))
            .await?;
        let mut event =
            VideoProcessingEvent::new(video_id, progress, EventStatus::Processing, message);
        if let Some(metadata) = metadata {
            event = event.with_metadata(metadata);
        }
        self.service.events.emit(event);
        Ok(())
    }

    async fn discard_output(&mut self) {
        let Some(output) = self.produced_output.take() else {
            return;
        };
        match tokio::fs::remove_file(&output).await {
            Ok(()) => debug!(path = %output.display(), "Discarded output of unfinished run"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %output.display(), "Failed to discard output: {}", e),
        }
    }

    async fn record_failure(&mut self, err: &PipelineError) {
        let message = err.detailed_message();
        self.job.fail(&message);
        let video_id = self.job.video_id.as_str();
        error!(video_id, progress = self.job.progress(), "Processing failed: {}", message);

        if let Err(e) = self
            .service
            .repo
            .update_video_processing_status(video_id, ProcessingStatusUpdate::failed(&message))
            .await
        {
            warn!(video_id, "Failed to record failure: {}", e);
        }
        self.service.events.emit(VideoProcessingEvent::new(
            video_id,
            self.job.progress(),
            EventStatus::Failed,
            message,
        ));
    }

    async fn record_abort(&mut self) {
        self.job.abort();
        let video_id = self.job.video_id.as_str();
        info!(video_id, progress = self.job.progress(), "Processing aborted");

        if let Err(e) = self
            .service
            .repo
            .update_video_processing_status(video_id, ProcessingStatusUpdate::aborted())
            .await
        {
            warn!(video_id, "Failed to record abort: {}", e);
        }
        self.service.events.emit(VideoProcessingEvent::new(
            video_id,
            self.job.progress(),
            EventStatus::Cancelled,
            "Processing aborted",
        ));
    }
}

fn checkpoint(token: &CancellationToken) -> PipelineResult<()> {
    if token.is_cancelled() {
        Err(PipelineError::Aborted)
    } else {
        Ok(())
    }
}

/// Cancels the job token once the timeout elapses; stops the timer on drop.
struct TimeoutGuard(JoinHandle<()>);

impl TimeoutGuard {
    fn start(timeout: Duration, token: CancellationToken) -> Self {
        Self(tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    warn!(timeout_secs = timeout.as_secs(), "Job timed out");
                    token.cancel();
                }
                _ = token.cancelled() => {}
            }
        }))
    }
}

impl Drop for TimeoutGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[cfg(all(test, feature = "local"))]
mod tests;
