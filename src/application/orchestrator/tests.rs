use super::*;
use crate::adapters::local::fs::FsMediaStore;
use crate::adapters::memory::{MemoryRepository, VideoRecord};
use crate::domain::artifacts::ArtifactKind;
use crate::domain::jobs::SourceHandle;
use crate::ports::events::EventStatus;
use crate::ports::repository::{IncompleteVideo, MockProcessingRepository};
use crate::ports::transcoder::EncodeProgressFn;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tempfile::{tempdir, TempDir};
use tokio::sync::Notify;

enum TranscodeBehavior {
    Succeed,
    /// Writes the output, then fires the given token before reporting success
    SucceedThenCancel(CancellationToken),
    Fail,
    /// Blocks until cancelled
    Hang,
}

struct FakeTranscoder {
    probe: ProbeResult,
    ticks: Vec<f64>,
    behavior: TranscodeBehavior,
    thumbnail_fails: bool,
    /// Signalled when extraction starts, which then blocks until cancelled
    thumbnail_gate: Option<Arc<Notify>>,
    probe_gate: Option<Arc<Notify>>,
    probes: AtomicUsize,
    transcodes: AtomicUsize,
}

impl FakeTranscoder {
    fn new(codec: &str) -> Self {
        Self {
            probe: ProbeResult {
                duration: 42.0,
                width: 1920,
                height: 1080,
                codec: codec.to_string(),
                has_audio: true,
            },
            ticks: vec![0.0, 25.0, 50.0, 75.0, 100.0],
            behavior: TranscodeBehavior::Succeed,
            thumbnail_fails: false,
            thumbnail_gate: None,
            probe_gate: None,
            probes: AtomicUsize::new(0),
            transcodes: AtomicUsize::new(0),
        }
    }

    fn behavior(mut self, behavior: TranscodeBehavior) -> Self {
        self.behavior = behavior;
        self
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn probe(&self, input: &Path) -> PipelineResult<ProbeResult> {
        if let Some(gate) = &self.probe_gate {
            gate.notified().await;
        }
        self.probes.fetch_add(1, Ordering::SeqCst);
        if !input.exists() {
            return Err(PipelineError::not_found(input.display().to_string()));
        }
        Ok(self.probe.clone())
    }

    async fn transcode_to_standard_codec(
        &self,
        _input: &Path,
        output: &Path,
        on_progress: &EncodeProgressFn,
        cancel: &CancellationToken,
    ) -> PipelineResult<()> {
        self.transcodes.fetch_add(1, Ordering::SeqCst);
        for tick in &self.ticks {
            on_progress(*tick);
        }
        match &self.behavior {
            TranscodeBehavior::Succeed => {
                tokio::fs::write(output, b"h264").await?;
                Ok(())
            }
            TranscodeBehavior::SucceedThenCancel(token) => {
                tokio::fs::write(output, b"h264").await?;
                token.cancel();
                Ok(())
            }
            TranscodeBehavior::Fail => Err(PipelineError::transcode(
                "ffmpeg exited with exit status: 1",
                Some("Unknown encoder 'libx264'".into()),
                Some(1),
            )),
            TranscodeBehavior::Hang => {
                cancel.cancelled().await;
                Err(PipelineError::Aborted)
            }
        }
    }

    async fn extract_thumbnail(
        &self,
        _input: &Path,
        output: &Path,
        _at_seconds: f64,
        cancel: &CancellationToken,
    ) -> PipelineResult<()> {
        if let Some(gate) = &self.thumbnail_gate {
            gate.notify_one();
            cancel.cancelled().await;
            return Err(PipelineError::Aborted);
        }
        if self.thumbnail_fails {
            return Err(PipelineError::transcode("no frame decoded", None, Some(1)));
        }
        tokio::fs::write(output, b"jpeg").await?;
        Ok(())
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<VideoProcessingEvent>>,
}

impl RecordingSink {
    fn events(&self) -> Vec<VideoProcessingEvent> {
        self.events.lock().unwrap().clone()
    }

    fn last_status(&self) -> Option<EventStatus> {
        self.events.lock().unwrap().last().map(|e| e.status)
    }
}

impl ProgressEventSink for RecordingSink {
    fn emit(&self, event: VideoProcessingEvent) {
        self.events.lock().unwrap().push(event);
    }
}

struct Harness {
    dir: TempDir,
    store: FsMediaStore,
    namespace: Namespace,
    repo: MemoryRepository,
    sink: Arc<RecordingSink>,
}

type TestService = VideoProcessingService<FsMediaStore, FakeTranscoder, MemoryRepository, Arc<RecordingSink>>;

impl Harness {
    fn new() -> Self {
        let dir = tempdir().unwrap();
        let store = FsMediaStore::new(dir.path().join("work"), dir.path().join("objects"));
        Self {
            dir,
            store,
            namespace: Namespace::parse("capsules").unwrap(),
            repo: MemoryRepository::new(),
            sink: Arc::new(RecordingSink::default()),
        }
    }

    /// Writes an upload and registers it with the repository.
    fn upload(&self, video_id: &str) -> SourceHandle {
        let path = self.dir.path().join(format!("{}-upload.mov", video_id));
        std::fs::write(&path, b"raw video").unwrap();
        let source = SourceHandle::Local(path);
        self.repo.register_video(video_id, source.clone());
        source
    }

    fn service(&self, transcoder: FakeTranscoder, settings: ProcessingSettings) -> TestService {
        VideoProcessingService::new(
            self.store.clone(),
            transcoder,
            self.repo.clone(),
            self.sink.clone(),
            settings,
        )
    }
}

fn collector() -> (Arc<Mutex<Vec<u8>>>, Box<ProgressFn>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let callback: Box<ProgressFn> = Box::new(move |percent: u8, _message: &str| {
        sink.lock().unwrap().push(percent);
    });
    (seen, callback)
}

/// Cancels `token` once a report reaches `percent`.
fn cancel_at(percent: u8, token: CancellationToken) -> Box<ProgressFn> {
    Box::new(move |reported: u8, _message: &str| {
        if reported >= percent {
            token.cancel();
        }
    })
}

fn deduped(values: &[u8]) -> Vec<u8> {
    let mut values = values.to_vec();
    values.dedup();
    values
}

#[tokio::test]
async fn test_end_to_end_hevc_conversion() {
    let h = Harness::new();
    let source = h.upload("v1");
    let service = h.service(FakeTranscoder::new("hevc"), ProcessingSettings::default());
    let (seen, callback) = collector();

    let result = service
        .process_video_from_file(
            VideoInput::new("v1", source),
            &h.namespace,
            Some(callback.as_ref()),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(result.outcome.was_converted);
    assert_eq!(result.outcome.final_codec, "h264");
    assert_eq!(result.probe.codec, "hevc");
    assert!(result.thumbnail.as_ref().is_some_and(|t| t.exists()));

    let seen = seen.lock().unwrap().clone();
    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "regressed: {:?}", seen);
    assert_eq!(deduped(&seen), vec![10, 20, 40, 50, 60, 70, 80, 90, 100]);
    assert_eq!(seen.iter().filter(|p| **p == 100).count(), 1);

    let record = h.repo.record("v1").unwrap();
    assert!(record.is_processed);
    assert_eq!(record.processing_progress, 100);
    assert_eq!(record.processing_error, None);

    let events = h.sink.events();
    assert!(events.windows(2).all(|w| w[0].progress < w[1].progress));
    assert_eq!(h.sink.last_status(), Some(EventStatus::Completed));
    assert!(events.iter().any(|e| e.metadata.is_some()));

    assert_eq!(
        service.get_processed_file("v1", &h.namespace).await.unwrap(),
        result.outcome.output_handle
    );
}

#[tokio::test]
async fn test_compatible_codec_skips_transcode() {
    let h = Harness::new();
    let source = h.upload("v1");
    let service = h.service(FakeTranscoder::new("h264"), ProcessingSettings::default());
    let (seen, callback) = collector();

    let result = service
        .process_video_from_file(
            VideoInput::new("v1", source),
            &h.namespace,
            Some(callback.as_ref()),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(service.transcoder.transcodes.load(Ordering::SeqCst), 0);
    assert!(!result.outcome.was_converted);
    assert_eq!(result.outcome.final_codec, "h264");
    assert_eq!(deduped(&seen.lock().unwrap()), vec![10, 20, 80, 90, 100]);
    assert!(h.repo.record("v1").unwrap().is_processed);
    assert!(service.get_processed_file("v1", &h.namespace).await.is_ok());
}

#[tokio::test]
async fn test_abort_before_start_has_no_side_effects() {
    let h = Harness::new();
    let sink = Arc::new(RecordingSink::default());
    // no expectations: any repository call fails the test
    let repo = MockProcessingRepository::new();
    let service = VideoProcessingService::new(
        h.store.clone(),
        FakeTranscoder::new("hevc"),
        repo,
        sink.clone(),
        ProcessingSettings::default(),
    );
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = service
        .process_video_from_file(
            VideoInput::new("v1", SourceHandle::Local(h.dir.path().join("a.mov"))),
            &h.namespace,
            None,
            &cancel,
        )
        .await
        .unwrap_err();

    assert!(err.is_abort());
    assert_eq!(service.transcoder.probes.load(Ordering::SeqCst), 0);
    assert_eq!(service.transcoder.transcodes.load(Ordering::SeqCst), 0);
    assert!(sink.events().is_empty());
    assert!(h.store.list_artifacts(&h.namespace).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_abort_racing_transcode_completion_is_not_completed() {
    let h = Harness::new();
    let source = h.upload("v1");
    let cancel = CancellationToken::new();
    let transcoder =
        FakeTranscoder::new("hevc").behavior(TranscodeBehavior::SucceedThenCancel(cancel.clone()));
    let service = h.service(transcoder, ProcessingSettings::default());

    let err = service
        .process_video_from_file(VideoInput::new("v1", source), &h.namespace, None, &cancel)
        .await
        .unwrap_err();

    assert!(err.is_abort());
    let record = h.repo.record("v1").unwrap();
    assert!(!record.is_processed);
    assert_eq!(record.processing_error, None);
    assert_ne!(record.processing_progress, 100);

    assert_eq!(h.sink.last_status(), Some(EventStatus::Cancelled));
    assert!(h
        .sink
        .events()
        .iter()
        .all(|e| e.status != EventStatus::Completed));
    assert!(matches!(
        service.get_processed_file("v1", &h.namespace).await,
        Err(PipelineError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_cancel_during_transcode_leaves_job_resumable() {
    let h = Harness::new();
    let source = h.upload("v1");
    let service = h.service(
        FakeTranscoder::new("hevc").behavior(TranscodeBehavior::Hang),
        ProcessingSettings::default(),
    );
    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });

    let err = service
        .process_video_from_file(VideoInput::new("v1", source), &h.namespace, None, &cancel)
        .await
        .unwrap_err();

    assert!(err.is_abort());
    let cancelled = h.sink.events().pop().unwrap();
    assert_eq!(cancelled.status, EventStatus::Cancelled);
    assert_eq!(cancelled.progress, 80);

    let incomplete = h.repo.find_incomplete_videos().await.unwrap();
    assert_eq!(incomplete.len(), 1);
    assert_eq!(incomplete[0].processing_error, None);
}

#[tokio::test]
async fn test_output_is_not_served_until_completed() {
    for codec in ["hevc", "h264"] {
        let h = Harness::new();
        let source = h.upload("v1");
        let extracting = Arc::new(Notify::new());
        let mut transcoder = FakeTranscoder::new(codec);
        transcoder.thumbnail_gate = Some(extracting.clone());
        let service = h.service(transcoder, ProcessingSettings::default());
        let cancel = CancellationToken::new();

        let run =
            service.process_video_from_file(VideoInput::new("v1", source), &h.namespace, None, &cancel);
        let finalizing = async {
            extracting.notified().await;
            let served = service.get_processed_file("v1", &h.namespace).await;
            let record = h.repo.record("v1").unwrap();
            cancel.cancel();
            (served, record)
        };
        let (result, (served, record)) = tokio::join!(run, finalizing);

        assert!(
            matches!(served, Err(PipelineError::NotFound(_))),
            "{}: served {:?} while finalizing",
            codec,
            served
        );
        assert!(!record.is_processed);
        assert_eq!(record.processing_progress, 90);

        // an abort during extraction still aborts
        assert!(result.unwrap_err().is_abort(), "{}", codec);
        assert_eq!(h.sink.last_status(), Some(EventStatus::Cancelled));
        let record = h.repo.record("v1").unwrap();
        assert!(!record.is_processed);
        assert_eq!(record.processing_error, None);
        let leftovers = h.store.list_artifacts(&h.namespace).await.unwrap();
        assert!(
            leftovers
                .iter()
                .all(|f| matches!(f.kind, ArtifactKind::Source)),
            "{}: {:?}",
            codec,
            leftovers
        );
        assert!(service.get_processed_file("v1", &h.namespace).await.is_err());
    }
}

#[tokio::test]
async fn test_cancel_after_probe_skips_transcode() {
    let h = Harness::new();
    let source = h.upload("v1");
    let service = h.service(FakeTranscoder::new("hevc"), ProcessingSettings::default());
    let cancel = CancellationToken::new();
    let callback = cancel_at(20, cancel.clone());

    let err = service
        .process_video_from_file(
            VideoInput::new("v1", source),
            &h.namespace,
            Some(callback.as_ref()),
            &cancel,
        )
        .await
        .unwrap_err();

    assert!(err.is_abort());
    assert_eq!(service.transcoder.probes.load(Ordering::SeqCst), 1);
    assert_eq!(service.transcoder.transcodes.load(Ordering::SeqCst), 0);
    let cancelled = h.sink.events().pop().unwrap();
    assert_eq!(cancelled.status, EventStatus::Cancelled);
    assert_eq!(cancelled.progress, 20);
}

#[tokio::test]
async fn test_cancel_at_transcode_start_never_starts_transcoder() {
    let h = Harness::new();
    let source = h.upload("v1");
    let service = h.service(FakeTranscoder::new("hevc"), ProcessingSettings::default());
    let cancel = CancellationToken::new();
    let callback = cancel_at(40, cancel.clone());

    let err = service
        .process_video_from_file(
            VideoInput::new("v1", source),
            &h.namespace,
            Some(callback.as_ref()),
            &cancel,
        )
        .await
        .unwrap_err();

    assert!(err.is_abort());
    assert_eq!(service.transcoder.transcodes.load(Ordering::SeqCst), 0);
    assert_eq!(h.repo.record("v1").unwrap().processing_progress, 40);
    assert_eq!(h.sink.last_status(), Some(EventStatus::Cancelled));
}

#[tokio::test]
async fn test_failure_records_error_and_keeps_progress() {
    let h = Harness::new();
    let source = h.upload("v1");
    let mut transcoder = FakeTranscoder::new("hevc").behavior(TranscodeBehavior::Fail);
    transcoder.ticks = vec![0.0, 50.0];
    let service = h.service(transcoder, ProcessingSettings::default());

    let err = service
        .process_video_from_file(
            VideoInput::new("v1", source),
            &h.namespace,
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Transcode { .. }));
    let record = h.repo.record("v1").unwrap();
    assert!(!record.is_processed);
    assert_eq!(record.processing_progress, 60);
    assert!(record
        .processing_error
        .as_deref()
        .is_some_and(|e| e.contains("Unknown encoder")));

    let failed = h.sink.events().pop().unwrap();
    assert_eq!(failed.status, EventStatus::Failed);
    assert_eq!(failed.progress, 60);
}

#[tokio::test]
async fn test_job_timeout_is_a_failure() {
    let h = Harness::new();
    let source = h.upload("v1");
    let settings = ProcessingSettings {
        job_timeout: Some(Duration::from_millis(50)),
        ..Default::default()
    };
    let service = h.service(
        FakeTranscoder::new("hevc").behavior(TranscodeBehavior::Hang),
        settings,
    );

    let err = service
        .process_video_from_file(
            VideoInput::new("v1", source),
            &h.namespace,
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::TimedOut(_)));
    assert!(h.repo.record("v1").unwrap().processing_error.is_some());
    assert_eq!(h.sink.last_status(), Some(EventStatus::Failed));
}

#[tokio::test]
async fn test_thumbnail_failure_does_not_fail_job() {
    let h = Harness::new();
    let source = h.upload("v1");
    let mut transcoder = FakeTranscoder::new("hevc");
    transcoder.thumbnail_fails = true;
    let service = h.service(transcoder, ProcessingSettings::default());

    let result = service
        .process_video_from_file(
            VideoInput::new("v1", source),
            &h.namespace,
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(result.thumbnail, None);
    assert!(h.repo.record("v1").unwrap().is_processed);
}

#[tokio::test]
async fn test_missing_source_fails_with_not_found() {
    let h = Harness::new();
    let source = SourceHandle::Local(h.dir.path().join("deleted.mov"));
    h.repo.register_video("v1", source.clone());
    let service = h.service(FakeTranscoder::new("hevc"), ProcessingSettings::default());

    let err = service
        .process_video_from_file(
            VideoInput::new("v1", source),
            &h.namespace,
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::NotFound(_)));
    assert!(h.repo.record("v1").unwrap().processing_error.is_some());
}

#[tokio::test]
async fn test_resumption_runs_each_incomplete_video_once_in_background() {
    let h = Harness::new();
    let upload = h.dir.path().join("v1-upload.mov");
    std::fs::write(&upload, b"raw").unwrap();
    let source = SourceHandle::Local(upload);

    let mut repo = MockProcessingRepository::new();
    repo.expect_find_incomplete_videos().times(1).returning(|| {
        Ok(vec![IncompleteVideo {
            id: "v1".into(),
            is_processed: false,
            processing_progress: 40,
            processing_error: None,
        }])
    });
    repo.expect_get_video_file_path()
        .withf(|video_id| video_id == "v1")
        .times(1)
        .returning(move |_| Ok(source.clone()));
    repo.expect_update_video_processing_status()
        .returning(|_, _| Ok(()));

    let gate = Arc::new(Notify::new());
    let mut transcoder = FakeTranscoder::new("hevc");
    transcoder.probe_gate = Some(gate.clone());
    let service = Arc::new(VideoProcessingService::new(
        h.store.clone(),
        transcoder,
        repo,
        h.sink.clone(),
        ProcessingSettings::default(),
    ));

    let registry = InFlightJobs::new();
    let handle =
        service.resume_incomplete(h.namespace.clone(), registry.clone(), CancellationToken::new());
    // the job is parked on the probe gate, yet the call already returned
    assert!(!handle.is_finished());

    gate.notify_one();
    let report = handle.await.unwrap();

    assert_eq!(report.completed, vec!["v1"]);
    assert_eq!(service.transcoder.probes.load(Ordering::SeqCst), 1);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_resumption_skips_failed_unless_retry_enabled() {
    let h = Harness::new();
    h.upload("fresh");
    let failed_source = h.upload("broken");
    h.repo.insert_record(
        "broken",
        VideoRecord {
            source: failed_source,
            is_processed: false,
            processing_progress: 55,
            processing_error: Some("Transcode failed".into()),
        },
    );

    let service = Arc::new(h.service(FakeTranscoder::new("hevc"), ProcessingSettings::default()));
    let report = service
        .resume_incomplete(h.namespace.clone(), InFlightJobs::new(), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.completed, vec!["fresh"]);
    assert_eq!(report.skipped_failed, vec!["broken"]);

    let retrying = Arc::new(h.service(
        FakeTranscoder::new("hevc"),
        ProcessingSettings {
            retry_failed_on_restart: true,
            ..Default::default()
        },
    ));
    let report = retrying
        .resume_incomplete(h.namespace.clone(), InFlightJobs::new(), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.completed, vec!["broken"]);
    assert!(h.repo.record("broken").unwrap().is_processed);
}

#[tokio::test]
async fn test_resumption_reports_missing_source() {
    let h = Harness::new();
    h.repo
        .register_video("gone", SourceHandle::Local(h.dir.path().join("gone.mov")));
    let registry = InFlightJobs::new();
    let _running = registry
        .try_begin("busy", &CancellationToken::new())
        .unwrap();
    h.upload("busy");

    let service = Arc::new(h.service(FakeTranscoder::new("hevc"), ProcessingSettings::default()));
    let report = service
        .resume_incomplete(h.namespace.clone(), registry, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "gone");
    assert_eq!(report.already_running, vec!["busy"]);
    assert!(h
        .repo
        .record("gone")
        .unwrap()
        .processing_error
        .is_some_and(|e| e.starts_with("Not found")));
}

#[tokio::test]
async fn test_invalid_video_id_is_rejected() {
    let h = Harness::new();
    let service = h.service(FakeTranscoder::new("hevc"), ProcessingSettings::default());
    let err = service
        .process_video_from_file(
            VideoInput::new("../escape", SourceHandle::Local(h.dir.path().join("a.mov"))),
            &h.namespace,
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::InvalidInput(_)));
    assert!(h.sink.events().is_empty());
}
