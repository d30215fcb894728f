//! Camera input.
//!
//! `CameraInput` drives a `FrameSource` on a dedicated capture thread and hands every
//! frame to a listener. It is single-use: one `start`, one `close`. A paused session
//! drops its `CameraInput` and builds a fresh one on resume.
//!
//! `close` joins the capture thread before it returns, so no listener call can happen
//! after it.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::frame::CameraFrame;
use crate::ingest::{CameraRequest, FrameSource, SourceStats};

/// Consecutive capture failures tolerated before the capture thread gives up.
pub const DEFAULT_MAX_CONSECUTIVE_ERRORS: u32 = 5;

/// Longest single sleep while pacing; bounds how long `close` waits on a paced thread.
const PACING_SLICE: Duration = Duration::from_millis(10);

pub type FrameListener = Box<dyn FnMut(CameraFrame) + Send>;

/// Lifecycle counters for one `CameraInput`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CameraStats {
    pub starts: u64,
    pub closes: u64,
    pub frames_delivered: u64,
}

#[derive(Debug, Default)]
struct CameraCounters {
    starts: AtomicU64,
    closes: AtomicU64,
    frames_delivered: AtomicU64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CameraState {
    Idle,
    Running,
    Closed,
}

pub struct CameraInput {
    device: String,
    source: Option<Box<dyn FrameSource>>,
    listener: Option<FrameListener>,
    state: CameraState,
    stop: Arc<AtomicBool>,
    counters: Arc<CameraCounters>,
    join: Option<JoinHandle<OpenedSource>>,
    max_consecutive_errors: u32,
    last_source_stats: Option<SourceStats>,
}

impl CameraInput {
    pub fn new(source: Box<dyn FrameSource>) -> Self {
        Self {
            device: source.name().to_string(),
            source: Some(source),
            listener: None,
            state: CameraState::Idle,
            stop: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(CameraCounters::default()),
            join: None,
            max_consecutive_errors: DEFAULT_MAX_CONSECUTIVE_ERRORS,
            last_source_stats: None,
        }
    }

    pub fn with_max_consecutive_errors(mut self, max: u32) -> Self {
        self.max_consecutive_errors = max.max(1);
        self
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    /// Register the per-frame callback. Must be called before `start`.
    pub fn set_new_frame_listener<F>(&mut self, listener: F) -> Result<()>
    where
        F: FnMut(CameraFrame) + Send + 'static,
    {
        if self.state != CameraState::Idle {
            return Err(anyhow!(
                "camera {}: listener must be set before start",
                self.device
            ));
        }
        self.listener = Some(Box::new(listener));
        Ok(())
    }

    /// Open the source and start delivering frames on the capture thread.
    pub fn start(&mut self, request: &CameraRequest) -> Result<()> {
        match self.state {
            CameraState::Idle => {}
            CameraState::Running => {
                return Err(anyhow!("camera {} already started", self.device))
            }
            CameraState::Closed => return Err(anyhow!("camera {} is closed", self.device)),
        }
        let listener = self
            .listener
            .take()
            .ok_or_else(|| anyhow!("camera {}: no new-frame listener set", self.device))?;
        let mut source = self
            .source
            .take()
            .ok_or_else(|| anyhow!("camera {}: source unavailable", self.device))?;

        if let Err(err) = source.open(request) {
            source.close();
            self.source = Some(source);
            self.listener = Some(listener);
            return Err(err.context(format!("open camera {}", self.device)));
        }

        let frame_interval = if request.target_fps > 0 {
            Some(Duration::from_secs_f64(1.0 / request.target_fps as f64))
        } else {
            None
        };
        let stop = Arc::clone(&self.stop);
        let counters = Arc::clone(&self.counters);
        let max_errors = self.max_consecutive_errors;
        // Closes the source if the closure is dropped unrun or the thread unwinds.
        let mut opened = OpenedSource(Some(source));
        let join = std::thread::Builder::new()
            .name(format!("camera-{}", request.facing))
            .spawn(move || {
                if let Some(source) = opened.0.as_mut() {
                    capture_loop(
                        source.as_mut(),
                        listener,
                        stop,
                        counters,
                        frame_interval,
                        max_errors,
                    );
                }
                opened
            })
            .map_err(|e| anyhow!("failed to spawn capture thread: {}", e))?;

        self.join = Some(join);
        self.state = CameraState::Running;
        self.counters.starts.fetch_add(1, Ordering::SeqCst);
        log::info!(
            "camera {} started ({}x{} {} @ {} fps)",
            self.device,
            request.width,
            request.height,
            request.facing,
            request.target_fps
        );
        Ok(())
    }

    /// True while the capture thread is delivering frames.
    pub fn is_running(&self) -> bool {
        self.state == CameraState::Running
            && self.join.as_ref().map(|j| !j.is_finished()).unwrap_or(false)
    }

    /// Stop capture and release the device.
    ///
    /// Returns `true` only on the call that actually released a started device.
    pub fn close(&mut self) -> bool {
        if self.state != CameraState::Running {
            self.state = CameraState::Closed;
            return false;
        }
        self.state = CameraState::Closed;
        self.stop.store(true, Ordering::SeqCst);

        let mut source = match self.join.take().map(|join| join.join()) {
            Some(Ok(opened)) => match opened.release() {
                Some(source) => source,
                None => return false,
            },
            Some(Err(_)) => {
                log::error!("camera {}: capture thread panicked", self.device);
                self.counters.closes.fetch_add(1, Ordering::SeqCst);
                return true;
            }
            None => return false,
        };
        source.close();
        self.last_source_stats = Some(source.stats());
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        log::info!(
            "camera {} closed after {} frames",
            self.device,
            self.counters.frames_delivered.load(Ordering::SeqCst)
        );
        true
    }

    pub fn stats(&self) -> CameraStats {
        CameraStats {
            starts: self.counters.starts.load(Ordering::SeqCst),
            closes: self.counters.closes.load(Ordering::SeqCst),
            frames_delivered: self.counters.frames_delivered.load(Ordering::SeqCst),
        }
    }

    /// Source statistics, available once the camera has been closed.
    pub fn source_stats(&self) -> Option<&SourceStats> {
        self.last_source_stats.as_ref()
    }
}

impl Drop for CameraInput {
    fn drop(&mut self) {
        self.close();
    }
}

/// Source owned by the capture thread. Closed on drop unless released.
struct OpenedSource(Option<Box<dyn FrameSource>>);

impl OpenedSource {
    fn release(mut self) -> Option<Box<dyn FrameSource>> {
        self.0.take()
    }
}

impl Drop for OpenedSource {
    fn drop(&mut self) {
        if let Some(mut source) = self.0.take() {
            source.close();
        }
    }
}

fn capture_loop(
    source: &mut dyn FrameSource,
    mut listener: FrameListener,
    stop: Arc<AtomicBool>,
    counters: Arc<CameraCounters>,
    frame_interval: Option<Duration>,
    max_errors: u32,
) {
    let mut consecutive_errors = 0u32;
    while !stop.load(Ordering::SeqCst) {
        let started = Instant::now();
        match source.next_frame() {
            Ok(frame) => {
                consecutive_errors = 0;
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                listener(frame);
                counters.frames_delivered.fetch_add(1, Ordering::SeqCst);
            }
            Err(err) => {
                consecutive_errors += 1;
                log::warn!("camera {}: capture failed: {:#}", source.name(), err);
                if consecutive_errors >= max_errors {
                    log::error!(
                        "camera {}: giving up after {} consecutive failures",
                        source.name(),
                        consecutive_errors
                    );
                    break;
                }
            }
        }

        if let Some(interval) = frame_interval {
            let deadline = started + interval;
            loop {
                let now = Instant::now();
                if now >= deadline || stop.load(Ordering::SeqCst) {
                    break;
                }
                std::thread::sleep((deadline - now).min(PACING_SLICE));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::SyntheticCamera;
    use std::sync::mpsc;

    fn request(fps: u32) -> CameraRequest {
        CameraRequest {
            width: 32,
            height: 24,
            target_fps: fps,
            ..CameraRequest::default()
        }
    }

    struct FailingSource;

    impl FrameSource for FailingSource {
        fn name(&self) -> &str {
            "failing"
        }
        fn open(&mut self, _request: &CameraRequest) -> Result<()> {
            Ok(())
        }
        fn next_frame(&mut self) -> Result<CameraFrame> {
            Err(anyhow!("sensor unplugged"))
        }
        fn close(&mut self) {}
        fn is_healthy(&self) -> bool {
            false
        }
        fn stats(&self) -> SourceStats {
            SourceStats::default()
        }
    }

    #[test]
    fn delivers_frames_until_closed() -> Result<()> {
        let mut camera = CameraInput::new(Box::new(SyntheticCamera::new("stub://test")));
        let (tx, rx) = mpsc::channel();
        camera.set_new_frame_listener(move |frame: CameraFrame| {
            let _ = tx.send(frame.sequence);
        })?;
        camera.start(&request(0))?;
        let first = rx.recv_timeout(Duration::from_secs(2))?;
        let second = rx.recv_timeout(Duration::from_secs(2))?;
        assert!(second > first);

        assert!(camera.close());
        assert!(!camera.close());
        while rx.try_recv().is_ok() {}
        std::thread::sleep(Duration::from_millis(20));
        assert!(rx.try_recv().is_err());

        let stats = camera.stats();
        assert_eq!((stats.starts, stats.closes), (1, 1));
        assert!(stats.frames_delivered >= 2);
        assert_eq!(
            camera.source_stats().map(|s| s.frames_captured >= 2),
            Some(true)
        );
        Ok(())
    }

    #[test]
    fn start_requires_listener_and_only_once() -> Result<()> {
        let mut camera = CameraInput::new(Box::new(SyntheticCamera::new("stub://test")));
        assert!(camera.start(&request(30)).is_err());
        camera.set_new_frame_listener(|_frame| {})?;
        camera.start(&request(30))?;
        assert!(camera.start(&request(30)).is_err());
        assert!(camera.set_new_frame_listener(|_frame| {}).is_err());
        assert!(camera.close());
        assert!(camera.start(&request(30)).is_err());
        Ok(())
    }

    #[test]
    fn close_without_start_releases_nothing() {
        let mut camera = CameraInput::new(Box::new(SyntheticCamera::new("stub://test")));
        assert!(!camera.close());
        assert_eq!(camera.stats(), CameraStats::default());
    }

    #[test]
    fn capture_gives_up_after_repeated_failures() -> Result<()> {
        let mut camera = CameraInput::new(Box::new(FailingSource)).with_max_consecutive_errors(3);
        camera.set_new_frame_listener(|_frame| {})?;
        camera.start(&request(0))?;
        let deadline = Instant::now() + Duration::from_secs(2);
        while camera.is_running() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(!camera.is_running());
        assert!(camera.close());
        assert_eq!(camera.stats().frames_delivered, 0);
        Ok(())
    }

    /// Synthetic camera that counts how often it is closed.
    struct CountingSource {
        inner: SyntheticCamera,
        closes: Arc<AtomicU64>,
    }

    impl FrameSource for CountingSource {
        fn name(&self) -> &str {
            self.inner.name()
        }
        fn open(&mut self, request: &CameraRequest) -> Result<()> {
            self.inner.open(request)
        }
        fn next_frame(&mut self) -> Result<CameraFrame> {
            self.inner.next_frame()
        }
        fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
            self.inner.close();
        }
        fn is_healthy(&self) -> bool {
            self.inner.is_healthy()
        }
        fn stats(&self) -> SourceStats {
            self.inner.stats()
        }
    }

    #[test]
    fn panicking_listener_still_closes_the_source() -> Result<()> {
        let closes = Arc::new(AtomicU64::new(0));
        let mut camera = CameraInput::new(Box::new(CountingSource {
            inner: SyntheticCamera::new("stub://test"),
            closes: Arc::clone(&closes),
        }));
        camera.set_new_frame_listener(|_frame| panic!("listener failed"))?;
        camera.start(&request(0))?;
        let deadline = Instant::now() + Duration::from_secs(2);
        while camera.is_running() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(camera.close());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(camera.stats().closes, 1);
        Ok(())
    }
}
