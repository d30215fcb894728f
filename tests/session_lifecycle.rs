use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;

use facemesh::detect::{NormalizedRect, RawFace};
use facemesh::ingest::{SourceStats, SyntheticCamera};
use facemesh::permission::PERMISSION_NOTICE;
use facemesh::render::MemoryTarget;
use facemesh::{
    BackendRegistry, BackpressurePolicy, CameraFacing, CameraFrame, CameraRequest, Capability,
    FaceMesh, FaceMeshOptions, FrameSource, FrameView, LandmarkBackend, LogErrorSink,
    PermissionState, Session, SessionParts, SessionSettings, SolutionSurface, StaticPermission,
    StubBackend, SurfaceView,
};

#[derive(Default)]
struct DeviceLog {
    created: AtomicUsize,
    opened: AtomicUsize,
    closed: AtomicUsize,
    closed_at: Mutex<Option<Instant>>,
}

/// Synthetic camera that records device opens and closes.
struct LoggedCamera {
    inner: SyntheticCamera,
    log: Arc<DeviceLog>,
}

impl FrameSource for LoggedCamera {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn open(&mut self, request: &CameraRequest) -> Result<()> {
        self.log.opened.fetch_add(1, Ordering::SeqCst);
        self.inner.open(request)
    }

    fn next_frame(&mut self) -> Result<CameraFrame> {
        self.inner.next_frame()
    }

    fn close(&mut self) {
        self.log.closed.fetch_add(1, Ordering::SeqCst);
        *self.log.closed_at.lock().unwrap() = Some(Instant::now());
        self.inner.close();
    }

    fn is_healthy(&self) -> bool {
        self.inner.is_healthy()
    }

    fn stats(&self) -> SourceStats {
        self.inner.stats()
    }
}

fn session_parts(
    permission: StaticPermission,
    log: Arc<DeviceLog>,
    target: MemoryTarget,
) -> Result<SessionParts> {
    let mut registry = BackendRegistry::new();
    registry.register(StubBackend::new());
    let options = FaceMeshOptions::builder().refine_landmarks(true).build()?;
    Ok(SessionParts {
        settings: SessionSettings {
            facing: CameraFacing::Front,
            target_fps: 200,
            refresh_hz: Some(100),
            ..SessionSettings::default()
        },
        permission: Box::new(permission),
        cameras: Box::new(move |facing: CameraFacing| -> Result<Box<dyn FrameSource>> {
            log.created.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(LoggedCamera {
                inner: SyntheticCamera::new(&format!("stub://{}", facing)),
                log: Arc::clone(&log),
            }))
        }),
        solution: FaceMesh::new(options, &registry)?,
        surface: Arc::new(SurfaceView::new(96, 72, Box::new(target))?),
        errors: Arc::new(LogErrorSink),
    })
}

fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
fn denied_permission_never_starts_the_camera() -> Result<()> {
    let log = Arc::new(DeviceLog::default());
    let target = MemoryTarget::new();
    let mut session = Session::create(session_parts(
        StaticPermission::denied(),
        Arc::clone(&log),
        target.clone(),
    )?)?;

    assert_eq!(session.permission(), PermissionState::Denied);
    assert_eq!(session.surface().notice().as_deref(), Some(PERMISSION_NOTICE));

    for _ in 0..3 {
        assert!(!session.resume()?);
        assert!(!session.pause()?);
    }
    let report = session.shutdown()?;

    assert_eq!(log.created.load(Ordering::SeqCst), 0);
    assert_eq!(log.opened.load(Ordering::SeqCst), 0);
    assert_eq!(report.camera_starts, 0);
    assert_eq!(report.frames_sent, 0);
    assert_eq!(report.frames_drawn, 0);
    assert_eq!(report.notices_drawn, 1);
    assert_eq!(report.notice.as_deref(), Some(PERMISSION_NOTICE));

    // Only the notice banner reaches the screen.
    assert_eq!(target.presented(), 1);
    assert_eq!(target.last_sequence(), Some(0));
    let image = target.last_image().expect("notice frame");
    assert_ne!(image.get_pixel(0, 0).0, [0, 0, 0]);
    assert_eq!(image.get_pixel(48, 60).0, [0, 0, 0]);
    Ok(())
}

#[test]
fn granted_permission_starts_once_per_resume() -> Result<()> {
    let log = Arc::new(DeviceLog::default());
    let target = MemoryTarget::new();
    let mut session = Session::create(session_parts(
        StaticPermission::prompt(true),
        Arc::clone(&log),
        target.clone(),
    )?)?;
    assert_eq!(session.permission(), PermissionState::Granted);
    assert_eq!(session.surface().notice(), None);

    for round in 1..=3u64 {
        assert!(session.resume()?);
        assert!(!session.resume()?);
        assert!(wait_for(|| session.report().frames_sent > 0));
        assert!(session.pause()?);

        let report = session.report();
        assert_eq!(report.camera_starts, round);
        assert_eq!(report.camera_closes, round);
        assert_eq!(log.created.load(Ordering::SeqCst) as u64, round);
        assert_eq!(log.opened.load(Ordering::SeqCst) as u64, round);
        assert_eq!(log.closed.load(Ordering::SeqCst) as u64, round);
    }

    let report = session.shutdown()?;
    assert_eq!(report.resumes, 3);
    assert!(report.results_presented > 0);
    assert!(target.presented() > 0);
    Ok(())
}

#[test]
fn pause_releases_once_and_stops_frames() -> Result<()> {
    let log = Arc::new(DeviceLog::default());
    let mut session = Session::create(session_parts(
        StaticPermission::granted(),
        Arc::clone(&log),
        MemoryTarget::new(),
    )?)?;

    session.resume()?;
    assert!(wait_for(|| session.report().frames_captured >= 3));
    assert!(session.pause()?);
    assert!(!session.pause()?);

    let after_pause = session.report();
    std::thread::sleep(Duration::from_millis(100));
    let later = session.report();

    assert_eq!(log.closed.load(Ordering::SeqCst), 1);
    assert_eq!(later.frames_captured, after_pause.frames_captured);
    assert_eq!(later.frames_sent, after_pause.frames_sent);
    assert!(later.frames_sent <= later.frames_captured);
    assert_eq!(
        later.frames_sent,
        later.results_presented + later.errors_logged
    );

    let report = session.shutdown()?;
    assert_eq!(report.camera_closes, 1);
    assert_eq!(log.closed.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn synthetic_face_reaches_the_surface() -> Result<()> {
    let target = MemoryTarget::new();
    let mut session = Session::create(session_parts(
        StaticPermission::granted(),
        Arc::new(DeviceLog::default()),
        target.clone(),
    )?)?;
    session.resume()?;
    assert!(wait_for(|| target.presented() > 0));
    let report = session.shutdown()?;

    assert!(report.frames_drawn > 0);
    let image = target.last_image().expect("drawn canvas");
    assert_eq!(image.dimensions(), (96, 72));
    Ok(())
}

/// Backend that takes a while per frame and records when each call started.
struct SlowBackend {
    calls: Arc<Mutex<Vec<Instant>>>,
}

impl LandmarkBackend for SlowBackend {
    fn name(&self) -> &'static str {
        "slow"
    }

    fn supports(&self, capability: Capability) -> bool {
        matches!(capability, Capability::FaceLandmarks)
    }

    fn detect(
        &mut self,
        _view: &FrameView<'_>,
        _roi: Option<&NormalizedRect>,
        _options: &FaceMeshOptions,
    ) -> Result<Vec<RawFace>> {
        self.calls.lock().unwrap().push(Instant::now());
        std::thread::sleep(Duration::from_millis(20));
        Ok(Vec::new())
    }
}

#[test]
fn no_frame_reaches_inference_after_camera_close() -> Result<()> {
    let log = Arc::new(DeviceLog::default());
    let calls = Arc::new(Mutex::new(Vec::new()));
    let mut registry = BackendRegistry::new();
    registry.register(SlowBackend {
        calls: Arc::clone(&calls),
    });

    let mut parts = session_parts(
        StaticPermission::granted(),
        Arc::clone(&log),
        MemoryTarget::new(),
    )?;
    parts.settings.queue_capacity = 4;
    parts.settings.backpressure = BackpressurePolicy::DropNewest;
    parts.solution = FaceMesh::new(FaceMeshOptions::default(), &registry)?;
    let mut session = Session::create(parts)?;

    session.resume()?;
    // Frames arrive far faster than the backend handles them, so the queue is full.
    assert!(wait_for(|| calls.lock().unwrap().len() >= 2));
    assert!(session.pause()?);

    let closed_at = log.closed_at.lock().unwrap().expect("camera closed");
    let sent = calls.lock().unwrap().clone();
    assert!(sent.iter().all(|started| *started < closed_at));

    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(calls.lock().unwrap().len(), sent.len());
    let report = session.shutdown()?;
    assert_eq!(report.frames_sent as usize, sent.len());
    assert!(report.frames_dropped > 0);
    Ok(())
}
