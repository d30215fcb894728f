//! Inference pipeline.
//!
//! Frames flow camera thread → `FrameQueue` → pipeline worker → `FaceMesh`. Each frame
//! the worker takes has exactly one outcome: its result is handed to the surface
//! (`set_render_data` + `request_render`), or its error is reported to the error sink.
//! Frames discarded by the queue never reach inference and are counted as dropped.

mod queue;
mod sink;

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::frame::CameraFrame;
use crate::render::SolutionSurface;
use crate::solution::FaceMesh;

pub use queue::{BackpressurePolicy, FrameQueue, PushOutcome};
pub use sink::{CollectingErrorSink, ErrorSink, LogErrorSink};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames_sent: u64,
    pub results_presented: u64,
    pub errors_logged: u64,
    pub frames_dropped: u64,
}

#[derive(Debug, Default)]
struct PipelineCounters {
    frames_sent: AtomicU64,
    results_presented: AtomicU64,
    errors_logged: AtomicU64,
    frames_dropped: AtomicU64,
}

impl PipelineCounters {
    fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            frames_sent: self.frames_sent.load(Ordering::SeqCst),
            results_presented: self.results_presented.load(Ordering::SeqCst),
            errors_logged: self.errors_logged.load(Ordering::SeqCst),
            frames_dropped: self.frames_dropped.load(Ordering::SeqCst),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    Failed,
}

pub struct Pipeline {
    solution: FaceMesh,
    surface: Arc<dyn SolutionSurface>,
    errors: Arc<dyn ErrorSink>,
    counters: Arc<PipelineCounters>,
}

impl Pipeline {
    pub fn new(
        solution: FaceMesh,
        surface: Arc<dyn SolutionSurface>,
        errors: Arc<dyn ErrorSink>,
    ) -> Self {
        Self {
            solution,
            surface,
            errors,
            counters: Arc::new(PipelineCounters::default()),
        }
    }

    pub fn solution(&self) -> &FaceMesh {
        &self.solution
    }

    pub fn solution_mut(&mut self) -> &mut FaceMesh {
        &mut self.solution
    }

    /// Send one frame to inference and route the outcome.
    pub fn process(&mut self, frame: CameraFrame) -> FrameOutcome {
        let sequence = frame.sequence;
        self.counters.frames_sent.fetch_add(1, Ordering::SeqCst);
        match self.solution.send(frame) {
            Ok(data) => {
                self.surface.set_render_data(data);
                self.surface.request_render();
                self.counters.results_presented.fetch_add(1, Ordering::SeqCst);
                FrameOutcome::Presented
            }
            Err(err) => {
                self.errors.report(sequence, &format!("{:#}", err));
                self.counters.errors_logged.fetch_add(1, Ordering::SeqCst);
                FrameOutcome::Failed
            }
        }
    }

    pub fn stats(&self) -> PipelineStats {
        self.counters.snapshot()
    }

    /// Run the pipeline on a worker thread fed by `queue`.
    pub fn spawn(self, queue: Arc<FrameQueue>) -> Result<PipelineHandle> {
        let counters = Arc::clone(&self.counters);
        let worker_queue = Arc::clone(&queue);
        let join = std::thread::Builder::new()
            .name("facemesh-pipeline".to_string())
            .spawn(move || {
                let mut pipeline = self;
                while let Some(frame) = worker_queue.pop() {
                    pipeline.process(frame);
                }
                pipeline
            })
            .map_err(|e| anyhow!("failed to spawn pipeline worker: {}", e))?;
        Ok(PipelineHandle {
            queue,
            counters,
            join: Some(join),
        })
    }
}

/// Running pipeline worker.
pub struct PipelineHandle {
    queue: Arc<FrameQueue>,
    counters: Arc<PipelineCounters>,
    join: Option<JoinHandle<Pipeline>>,
}

impl PipelineHandle {
    pub fn queue(&self) -> &Arc<FrameQueue> {
        &self.queue
    }

    pub fn stats(&self) -> PipelineStats {
        let mut stats = self.counters.snapshot();
        stats.frames_dropped += self.queue.dropped();
        stats
    }

    /// Close the queue, wait for the in-flight frame and hand the pipeline back.
    pub fn stop(mut self) -> Result<Pipeline> {
        self.queue.close();
        let join = self
            .join
            .take()
            .ok_or_else(|| anyhow!("pipeline worker already stopped"))?;
        let pipeline = join
            .join()
            .map_err(|_| anyhow!("pipeline worker panicked"))?;
        self.counters
            .frames_dropped
            .fetch_add(self.queue.dropped(), Ordering::SeqCst);
        Ok(pipeline)
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            self.queue.close();
            if join.join().is_err() {
                log::error!("pipeline worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BackendRegistry, FaceMeshOptions, StubBackend};
    use crate::render::{MemoryTarget, SurfaceView};

    fn pipeline(target: &MemoryTarget) -> Result<(Pipeline, Arc<SurfaceView>, Arc<CollectingErrorSink>)> {
        let mut registry = BackendRegistry::new();
        registry.register(StubBackend::new());
        let solution = FaceMesh::new(FaceMeshOptions::default(), &registry)?;
        let surface = Arc::new(SurfaceView::new(64, 48, Box::new(target.clone()))?);
        let errors = Arc::new(CollectingErrorSink::new());
        let pipeline = Pipeline::new(solution, surface.clone(), errors.clone());
        Ok((pipeline, surface, errors))
    }

    fn gray(width: u32, height: u32, sequence: u64) -> Result<CameraFrame> {
        CameraFrame::from_rgb(vec![40u8; (width * height * 3) as usize], width, height, sequence)
    }

    #[test]
    fn success_goes_to_surface() -> Result<()> {
        let target = MemoryTarget::new();
        let (mut pipeline, surface, errors) = pipeline(&target)?;
        assert_eq!(pipeline.process(gray(64, 48, 1)?), FrameOutcome::Presented);
        assert!(surface.draw_pending()?);
        assert_eq!(target.last_sequence(), Some(1));
        assert!(errors.errors().is_empty());
        let stats = pipeline.stats();
        assert_eq!((stats.frames_sent, stats.results_presented, stats.errors_logged), (1, 1, 0));
        Ok(())
    }

    #[test]
    fn worker_drains_queue_in_order() -> Result<()> {
        let target = MemoryTarget::new();
        let (pipeline, surface, _errors) = pipeline(&target)?;
        let queue = Arc::new(FrameQueue::new(8, BackpressurePolicy::Block)?);
        let handle = pipeline.spawn(Arc::clone(&queue))?;
        for sequence in 1..=4 {
            queue.push(gray(64, 48, sequence)?)?;
        }
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while handle.stats().frames_sent < 4 && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        let pipeline = handle.stop()?;
        let stats = pipeline.stats();
        assert_eq!(stats.frames_sent, 4);
        assert_eq!(stats.results_presented + stats.errors_logged, stats.frames_sent);
        assert!(surface.draw_pending()?);
        assert_eq!(target.last_sequence(), Some(4));
        Ok(())
    }
}
