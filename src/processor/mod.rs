//! Frame processor: converts each camera frame, applies the current filter
//! and keeps the last output for feedback filters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::filters::{Filter, FilterError, LastOutputProvider, Transition};
use crate::gpu::{GpuContext, GpuError, Image, RawFrame, TextureProvider};

/// Called with the new filter's name after every swap.
pub type FilterListener = Box<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, thiserror::Error)]
enum FrameError {
    #[error("{0}")]
    Gpu(#[from] GpuError),
    #[error("{0}")]
    Filter(#[from] FilterError),
}

struct FeedbackHistory {
    last: Option<Arc<Image>>,
    placeholder: Arc<Image>,
    working_size: Option<(u32, u32)>,
}

/// Runs the per-frame pipeline: convert, filter, wait, remember.
///
/// Failures never surface as errors; the frame is dropped, logged and counted.
pub struct FrameProcessor {
    ctx: Arc<GpuContext>,
    textures: Arc<TextureProvider>,
    current: Mutex<Arc<dyn Filter>>,
    history: Mutex<FeedbackHistory>,
    // Held for a whole frame so filter swaps never land mid-frame.
    render: Mutex<()>,
    listeners: Mutex<Vec<FilterListener>>,
    dropped_frames: AtomicU64,
}

impl FrameProcessor {
    /// Create a processor and start `initial`.
    pub fn new(ctx: Arc<GpuContext>, textures: Arc<TextureProvider>, initial: Arc<dyn Filter>) -> Self {
        initial.start();
        let placeholder = textures.blank();
        Self {
            ctx,
            textures,
            current: Mutex::new(initial),
            history: Mutex::new(FeedbackHistory {
                last: None,
                placeholder,
                working_size: None,
            }),
            render: Mutex::new(()),
            listeners: Mutex::new(Vec::new()),
            dropped_frames: AtomicU64::new(0),
        }
    }

    pub fn context(&self) -> &Arc<GpuContext> {
        &self.ctx
    }

    pub fn textures(&self) -> &Arc<TextureProvider> {
        &self.textures
    }

    pub fn current_filter(&self) -> Arc<dyn Filter> {
        self.current.lock().clone()
    }

    /// Swap the filter. Takes effect on the next frame.
    ///
    /// The old filter is stopped and the new one started only when the
    /// filter actually changes.
    pub fn set_filter(&self, filter: Arc<dyn Filter>) {
        let frame = self.render.lock();
        let old = {
            let mut current = self.current.lock();
            if Arc::ptr_eq(&current, &filter) || current.name() == filter.name() {
                return;
            }
            std::mem::replace(&mut *current, filter.clone())
        };
        old.stop();
        filter.start();
        log::info!("Filter changed: {} -> {}", old.name(), filter.name());
        drop(frame);

        for listener in self.listeners.lock().iter() {
            listener(filter.name());
        }
    }

    pub fn on_filter_changed(&self, listener: FilterListener) {
        self.listeners.lock().push(listener);
    }

    /// Most recent output, if any frame has been produced.
    pub fn last_output(&self) -> Option<Arc<Image>> {
        self.history.lock().last.clone()
    }

    /// Forget the last output; feedback restarts from the placeholder.
    pub fn reset_history(&self) {
        self.history.lock().last = None;
    }

    /// Size of the most recent input frame.
    pub fn working_size(&self) -> Option<(u32, u32)> {
        self.history.lock().working_size
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    fn drop_frame(&self, reason: &dyn std::fmt::Display) {
        let dropped = self.dropped_frames.fetch_add(1, Ordering::Relaxed) + 1;
        log::warn!("Dropped frame ({} so far): {}", dropped, reason);
    }

    /// Filter one camera frame at filter time `time`.
    pub fn process(&self, frame: &RawFrame, time: f32) -> Option<Arc<Image>> {
        let _frame = self.render.lock();
        let source = match self.textures.try_convert(frame) {
            Ok(source) => source,
            Err(e) => {
                self.drop_frame(&e);
                return None;
            }
        };
        self.apply(&source, time)
    }

    /// Filter an image that is already on the GPU.
    pub fn process_image(&self, image: &Arc<Image>, time: f32) -> Option<Arc<Image>> {
        let _frame = self.render.lock();
        self.apply(image, time)
    }

    /// Upload and filter a CPU-side image.
    pub fn process_rgba(&self, image: &image::RgbaImage, time: f32) -> Option<Arc<Image>> {
        let _frame = self.render.lock();
        let source = match self.textures.from_rgba("still_image", image) {
            Ok(source) => source,
            Err(e) => {
                self.drop_frame(&e);
                return None;
            }
        };
        self.apply(&source, time)
    }

    fn apply(&self, source: &Arc<Image>, time: f32) -> Option<Arc<Image>> {
        let filter = self.current_filter();
        self.track_size(source.size());

        let output = if filter.is_passthrough() {
            source.clone()
        } else {
            match self.render_filter(filter.as_ref(), source, time) {
                Ok(output) => output,
                Err(e) => {
                    self.drop_frame(&format!("{}: {}", filter.name(), e));
                    return None;
                }
            }
        };

        self.history.lock().last = Some(output.clone());
        Some(output)
    }

    fn track_size(&self, size: (u32, u32)) {
        let mut history = self.history.lock();
        if history.working_size != Some(size) {
            log::info!("Working size now {}x{}", size.0, size.1);
            history.working_size = Some(size);
            // A trail from another size would be stretched.
            history.last = None;
        }
    }

    fn render_filter(&self, filter: &dyn Filter, source: &Arc<Image>, time: f32) -> Result<Arc<Image>, FrameError> {
        let (width, height) = source.size();
        let destination = Image::for_kernel_output(&self.ctx, "filter_output", width, height)?;
        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(filter.name()),
            });
        filter.encode(&mut encoder, source, &destination, time, self)?;
        self.ctx.submit_and_wait(encoder)?;
        log::debug!("Rendered {} at t={:.3} ({}x{})", filter.name(), time, width, height);
        Ok(destination)
    }

    /// Render `transition` from `outgoing` into `incoming` at `time`.
    pub fn blend(
        &self,
        outgoing: &Arc<Image>,
        incoming: &Arc<Image>,
        transition: &Transition,
        time: f64,
    ) -> Option<Arc<Image>> {
        let _frame = self.render.lock();
        match self.render_transition(outgoing, incoming, transition, time) {
            Ok(output) => {
                self.history.lock().last = Some(output.clone());
                Some(output)
            }
            Err(e) => {
                self.drop_frame(&format!("{}: {}", transition.name(), e));
                None
            }
        }
    }

    fn render_transition(
        &self,
        outgoing: &Arc<Image>,
        incoming: &Arc<Image>,
        transition: &Transition,
        time: f64,
    ) -> Result<Arc<Image>, FrameError> {
        let (width, height) = outgoing.size();
        let destination = Image::for_kernel_output(&self.ctx, "transition_output", width, height)?;
        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(transition.name()),
            });
        transition.encode(&mut encoder, outgoing, incoming, &destination, time, self)?;
        self.ctx.submit_and_wait(encoder)?;
        Ok(destination)
    }
}

impl LastOutputProvider for FrameProcessor {
    /// The previous output, or the blank placeholder before the first frame.
    fn provide_last_output(&self, _filter: &str) -> Arc<Image> {
        let history = self.history.lock();
        history
            .last
            .clone()
            .unwrap_or_else(|| history.placeholder.clone())
    }
}
