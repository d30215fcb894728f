//! Presentation surface.
//!
//! `SurfaceView` holds a single render slot. The pipeline stores the latest result in
//! it and requests a render; the refresh thread (or a direct `draw_pending` call) draws
//! it at most once. A newer result replaces an undrawn older one.
//!
//! No result is drawn until it has been delivered and a render requested. A notice is
//! drawn on its own, as a banner over a blank canvas, as soon as it is shown.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use super::canvas::{Canvas, Color};
use super::renderer::FaceMeshRenderer;
use super::target::RenderTarget;
use crate::solution::RenderData;

const BACKGROUND: Color = [0, 0, 0];
const NOTICE_COLOR: Color = [200, 40, 40];
const NOTICE_HEIGHT_FRACTION: u32 = 12;

/// Consumer side of the pipeline.
pub trait SolutionSurface: Send + Sync {
    /// Store a result for the next draw.
    fn set_render_data(&self, data: RenderData);

    /// Ask for the stored result to be drawn.
    fn request_render(&self);

    /// Show a persistent notice to the user.
    fn show_notice(&self, text: &str);

    fn notice(&self) -> Option<String>;

    /// Width and height in pixels.
    fn dimensions(&self) -> (u32, u32);
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SurfaceStats {
    pub results_received: u64,
    pub render_requests: u64,
    pub frames_drawn: u64,
    /// Notice-only draws (no result).
    pub notices_drawn: u64,
    /// Results replaced before they were drawn.
    pub frames_superseded: u64,
}

struct SurfaceState {
    pending: Option<RenderData>,
    dirty: bool,
    notice: Option<String>,
    notice_dirty: bool,
    canvas: Canvas,
    target: Box<dyn RenderTarget>,
    stats: SurfaceStats,
}

pub struct SurfaceView {
    width: u32,
    height: u32,
    renderer: FaceMeshRenderer,
    render_input_image: AtomicBool,
    state: Mutex<SurfaceState>,
    wake: Condvar,
}

impl SurfaceView {
    pub fn new(width: u32, height: u32, target: Box<dyn RenderTarget>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!(
                "surface dimensions must be non-zero, got {}x{}",
                width,
                height
            ));
        }
        Ok(Self {
            width,
            height,
            renderer: FaceMeshRenderer::new(),
            render_input_image: AtomicBool::new(true),
            state: Mutex::new(SurfaceState {
                pending: None,
                dirty: false,
                notice: None,
                notice_dirty: false,
                canvas: Canvas::new(width, height),
                target,
                stats: SurfaceStats::default(),
            }),
            wake: Condvar::new(),
        })
    }

    pub fn with_renderer(mut self, renderer: FaceMeshRenderer) -> Self {
        self.renderer = renderer;
        self
    }

    /// Draw the camera frame under the mesh (otherwise a blank background).
    pub fn set_render_input_image(&self, enabled: bool) {
        self.render_input_image.store(enabled, Ordering::SeqCst);
    }

    pub fn stats(&self) -> SurfaceStats {
        self.state.lock().map(|s| s.stats).unwrap_or_default()
    }

    /// Draw the pending result if a render was requested, or a newly shown notice.
    /// Returns whether it drew.
    pub fn draw_pending(&self) -> Result<bool> {
        let mut guard = self
            .state
            .lock()
            .map_err(|_| anyhow!("surface lock poisoned"))?;
        let data = if guard.dirty {
            guard.dirty = false;
            guard.pending.take()
        } else {
            None
        };
        let state = &mut *guard;
        let Some(data) = data else {
            if !state.notice_dirty {
                return Ok(false);
            }
            state.notice_dirty = false;
            state.canvas.clear(BACKGROUND);
            self.draw_banner(&mut state.canvas);
            state.target.present(&state.canvas, 0)?;
            state.stats.notices_drawn += 1;
            return Ok(true);
        };

        if self.render_input_image.load(Ordering::SeqCst) {
            state.canvas.blit_frame(&data.frame.view());
        } else {
            state.canvas.clear(BACKGROUND);
        }
        self.renderer.render(&mut state.canvas, &data.result);
        if state.notice.is_some() {
            self.draw_banner(&mut state.canvas);
            state.notice_dirty = false;
        }
        let sequence = data.result.sequence;
        // The frame is released here, once drawn.
        drop(data);

        state.target.present(&state.canvas, sequence)?;
        state.stats.frames_drawn += 1;
        Ok(true)
    }

    fn draw_banner(&self, canvas: &mut Canvas) {
        let banner = (self.height / NOTICE_HEIGHT_FRACTION).max(1);
        canvas.fill_rect(0, 0, self.width, banner, NOTICE_COLOR);
    }

    /// Draw on a background thread at `refresh_hz`.
    pub fn start_refresh(self: &Arc<Self>, refresh_hz: u32) -> Result<RefreshHandle> {
        if refresh_hz == 0 {
            return Err(anyhow!("refresh rate must be at least 1 Hz"));
        }
        let tick = Duration::from_secs_f64(1.0 / refresh_hz as f64);
        let shutdown = Arc::new(AtomicBool::new(false));
        let surface = Arc::clone(self);
        let stop = Arc::clone(&shutdown);
        let join = std::thread::Builder::new()
            .name("surface-refresh".to_string())
            .spawn(move || surface.refresh_loop(tick, stop))
            .map_err(|e| anyhow!("failed to spawn refresh thread: {}", e))?;
        Ok(RefreshHandle {
            surface: Arc::clone(self),
            shutdown,
            join: Some(join),
        })
    }

    fn refresh_loop(&self, tick: Duration, shutdown: Arc<AtomicBool>) {
        while !shutdown.load(Ordering::SeqCst) {
            let waited = match self.state.lock() {
                Ok(guard) => self
                    .wake
                    .wait_timeout_while(guard, tick, |s| {
                        !s.dirty && !s.notice_dirty && !shutdown.load(Ordering::SeqCst)
                    })
                    .map(|_| ()),
                Err(_) => {
                    log::error!("surface lock poisoned; stopping refresh");
                    return;
                }
            };
            if waited.is_err() {
                log::error!("surface lock poisoned; stopping refresh");
                return;
            }
            if shutdown.load(Ordering::SeqCst) {
                break;
            }
            if let Err(err) = self.draw_pending() {
                log::warn!("surface draw failed: {:#}", err);
            }
            // One draw per display tick.
            std::thread::sleep(tick);
        }
    }
}

impl SolutionSurface for SurfaceView {
    fn set_render_data(&self, data: RenderData) {
        match self.state.lock() {
            Ok(mut state) => {
                if state.pending.replace(data).is_some() {
                    state.stats.frames_superseded += 1;
                }
                state.stats.results_received += 1;
            }
            Err(_) => log::error!("surface lock poisoned; dropping render data"),
        }
    }

    fn request_render(&self) {
        match self.state.lock() {
            Ok(mut state) => {
                state.stats.render_requests += 1;
                if state.pending.is_some() {
                    state.dirty = true;
                    self.wake.notify_all();
                }
            }
            Err(_) => log::error!("surface lock poisoned; render request ignored"),
        }
    }

    fn show_notice(&self, text: &str) {
        log::warn!("{}", text);
        match self.state.lock() {
            Ok(mut state) => {
                state.notice = Some(text.to_string());
                state.notice_dirty = true;
                self.wake.notify_all();
            }
            Err(_) => log::error!("surface lock poisoned; notice not stored"),
        }
    }

    fn notice(&self) -> Option<String> {
        self.state.lock().ok().and_then(|s| s.notice.clone())
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Running refresh thread.
pub struct RefreshHandle {
    surface: Arc<SurfaceView>,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl RefreshHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        self.surface.wake.notify_all();
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("surface refresh thread panicked"))?;
        }
        Ok(())
    }
}
