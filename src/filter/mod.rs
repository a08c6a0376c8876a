//! The base filter engine.
//!
//! A [`Filter`] is both an image consumer and an image source. It buffers
//! one frame per declared input, runs one unit of GPU work once every
//! input has delivered for the current cycle, and fans the single output
//! out to its consumers.
//!
//! Unless the filter runs synchronously, the output is forwarded right
//! after submission, before the GPU has finished. Consumers that persist
//! a texture should wait for the filter's completion handlers, which carry
//! the real outcome.

mod binding;
mod completion;
mod kind;

pub use binding::Provenance;
pub use completion::{CompletionHandler, CompletionInfo, CompletionKey};
pub use kind::{Compute, FilterKind, KernelEncoder, OutputSizing, PassThrough, Rotate};

use crate::error::{CompletionError, GraphError, Result};
use crate::gpu::{workgroup_count, GpuContext, KernelPipeline};
use crate::graph::{ConsumerList, ImageConsumer, ImageSource, SourceId};
use crate::source::StaticImageSource;
use crate::texture::{Size, Texture, TextureFrame, TextureRole};
use binding::{Delivery, SourceBinding};
use completion::CompletionRegistry;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, trace, warn};

/// Per-filter counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterStats {
    /// Cycles that submitted GPU work
    pub dispatched: u64,
    /// Frames passed on untouched by a forwarding pass-through
    pub forwarded: u64,
    /// Complete cycles abandoned without fan-out
    pub dropped: u64,
    /// Deliveries from sources that are not declared inputs
    pub foreign_deliveries: u64,
}

enum Pipeline {
    Kernel(KernelPipeline),
    Encoder,
    Inert(String),
}

impl Pipeline {
    fn build(ctx: &GpuContext, name: &str, kind: &FilterKind) -> Self {
        let Some((source, inputs, with_parameters)) = kind.kernel() else {
            return Pipeline::Encoder;
        };
        match KernelPipeline::build(ctx, name, &source, inputs, with_parameters) {
            Ok(kernel) => Pipeline::Kernel(kernel),
            Err(e) => {
                warn!("Filter `{}` is inert: {}", name, e);
                Pipeline::Inert(e.to_string())
            }
        }
    }
}

struct FilterState {
    kind: FilterKind,
    pipeline: Pipeline,
    bindings: Vec<SourceBinding>,
    consumers: ConsumerList,
    completions: CompletionRegistry,
    sample_time_source: Option<usize>,
    run_synchronously: bool,
    output: Option<Texture>,
    workgroups: Option<(u32, u32)>,
    uniforms: Option<wgpu::Buffer>,
    stats: FilterStats,
}

/// A node of the frame graph that runs a GPU kernel over its inputs.
pub struct Filter {
    id: SourceId,
    name: String,
    ctx: Arc<GpuContext>,
    state: Mutex<FilterState>,
}

impl Filter {
    /// Create a filter of the given kind.
    ///
    /// A kernel that fails to build leaves the filter inert: it stays in
    /// the graph but drops every cycle.
    pub fn new(ctx: Arc<GpuContext>, name: impl Into<String>, kind: FilterKind) -> Arc<Self> {
        let name = name.into();
        let pipeline = Pipeline::build(&ctx, &name, &kind);
        info!("Created filter `{}` ({:?})", name, kind);
        Arc::new(Self {
            id: SourceId::next(),
            name,
            ctx,
            state: Mutex::new(FilterState {
                kind,
                pipeline,
                bindings: Vec::new(),
                consumers: ConsumerList::default(),
                completions: CompletionRegistry::default(),
                sample_time_source: None,
                run_synchronously: false,
                output: None,
                workgroups: None,
                uniforms: None,
                stats: FilterStats::default(),
            }),
        })
    }

    /// A junction that forwards frames, or copies them on the GPU when
    /// `create_texture` is set.
    pub fn pass_through(ctx: Arc<GpuContext>, create_texture: bool) -> Arc<Self> {
        Self::new(ctx, "pass_through", FilterKind::PassThrough(PassThrough { create_texture }))
    }

    pub fn rotate(ctx: Arc<GpuContext>, degrees: f32, fit_size: bool) -> Arc<Self> {
        Self::new(ctx, "rotate", FilterKind::Rotate(Rotate::new(degrees, fit_size)))
    }

    pub fn compute(ctx: Arc<GpuContext>, name: impl Into<String>, compute: Compute) -> Arc<Self> {
        Self::new(ctx, name, FilterKind::Compute(compute))
    }

    pub fn custom(ctx: Arc<GpuContext>, name: impl Into<String>, encoder: Arc<dyn KernelEncoder>) -> Arc<Self> {
        Self::new(ctx, name, FilterKind::Custom(encoder))
    }

    fn lock(&self) -> MutexGuard<'_, FilterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> FilterKind {
        self.lock().kind.clone()
    }

    /// Change the filter's parameters. The pipeline is rebuilt only when
    /// the kernel itself changes.
    pub fn configure<R>(&self, f: impl FnOnce(&mut FilterKind) -> R) -> R {
        let mut state = self.lock();
        let before = state.kind.kernel();
        let result = f(&mut state.kind);
        if state.kind.kernel() != before {
            debug!("Rebuilding pipeline of filter `{}`", self.name);
            state.pipeline = Pipeline::build(&self.ctx, &self.name, &state.kind);
        }
        result
    }

    pub fn is_inert(&self) -> bool {
        matches!(self.lock().pipeline, Pipeline::Inert(_))
    }

    /// Input whose sample time wins provenance resolution. `None` means
    /// the first input carrying a sample time.
    pub fn set_sample_time_source(&self, index: Option<usize>) {
        self.lock().sample_time_source = index;
    }

    pub fn sample_time_source(&self) -> Option<usize> {
        self.lock().sample_time_source
    }

    /// Block every dispatch until the GPU has finished it.
    pub fn set_run_synchronously(&self, run_synchronously: bool) {
        self.lock().run_synchronously = run_synchronously;
    }

    pub fn runs_synchronously(&self) -> bool {
        self.lock().run_synchronously
    }

    /// Texture written by the most recent dispatch.
    pub fn output_texture(&self) -> Option<Texture> {
        self.lock().output.clone()
    }

    /// Workgroup grid of the current output, once computed.
    pub fn dispatch_grid(&self) -> Option<(u32, u32)> {
        self.lock().workgroups
    }

    /// Declared inputs, in binding order.
    pub fn sources(&self) -> Vec<SourceId> {
        self.lock().bindings.iter().map(|b| b.source).collect()
    }

    /// Number of inputs already holding a frame for the current cycle.
    pub fn pending_inputs(&self) -> usize {
        self.lock().bindings.iter().filter(|b| b.slot.is_some()).count()
    }

    pub fn stats(&self) -> FilterStats {
        self.lock().stats
    }

    /// Register a handler called once per completed unit of GPU work.
    pub fn add_completed_handler(&self, handler: impl Fn(&CompletionInfo) + Send + Sync + 'static) -> CompletionKey {
        self.lock().completions.add(Arc::new(handler))
    }

    pub fn remove_completed_handler(&self, key: CompletionKey) {
        self.lock().completions.remove(key);
    }

    pub fn remove_all_completed_handlers(&self) {
        self.lock().completions.clear();
    }

    /// Run the filter once over `textures` and return its output.
    ///
    /// Switches the filter to synchronous mode. Returns `None` when the
    /// textures did not complete a cycle.
    pub fn filtered_texture(self: &Arc<Self>, textures: &[Texture]) -> Option<Texture> {
        if self.lock().kind.forwards_unchanged() {
            return textures.first().cloned();
        }

        let sources: Vec<StaticImageSource> = textures
            .iter()
            .map(|texture| {
                let source = StaticImageSource::from_texture(texture.clone());
                source.add_consumer(self.clone());
                source
            })
            .collect();

        self.set_run_synchronously(true);
        let before = self.stats().dispatched;
        for source in &sources {
            source.transmit_texture();
        }

        let state = self.lock();
        if state.stats.dispatched > before {
            state.output.clone()
        } else {
            None
        }
    }

    /// Run the filter once over CPU images and read the result back.
    pub fn filtered_image(self: &Arc<Self>, images: &[image::RgbaImage]) -> Result<image::RgbaImage> {
        let textures = images
            .iter()
            .map(|image| Texture::from_image(&self.ctx, image, "filter input"))
            .collect::<Result<Vec<_>>>()?;
        let output = self
            .filtered_texture(&textures)
            .ok_or_else(|| GraphError::NoOutput(self.name.clone()))?;
        output.read_rgba(&self.ctx)
    }

    fn forward(&self, frame: &TextureFrame) {
        let consumers = {
            let mut state = self.lock();
            state.stats.forwarded += 1;
            state.consumers.snapshot()
        };
        for consumer in consumers {
            consumer.new_texture_available(frame, self.id);
        }
    }

    fn ensure_output(&self, state: &mut FilterState, size: Size) -> Result<Texture> {
        if let Some(output) = state.output.as_ref().filter(|o| o.size() == size) {
            return Ok(output.clone());
        }
        let texture = Texture::new(&self.ctx, size, TextureRole::Output, &format!("{} output", self.name))?;
        debug!("Filter `{}` allocated {} output", self.name, size);
        state.output = Some(texture.clone());
        state.workgroups = None;
        Ok(texture)
    }

    fn encode(&self, state: &mut FilterState, inputs: &[Texture], output: &Texture) -> Result<wgpu::CommandBuffer> {
        let FilterState {
            kind,
            pipeline,
            workgroups,
            uniforms,
            ..
        } = state;

        let mut encoder = self.ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(&format!("{} command", self.name)),
        });

        match pipeline {
            Pipeline::Inert(_) => return Err(GraphError::InertFilter(self.name.clone())),
            Pipeline::Encoder => {
                if let FilterKind::Custom(custom) = kind {
                    custom.encode(&self.ctx, &mut encoder, inputs, output)?;
                }
            }
            Pipeline::Kernel(kernel) => {
                let size = output.size();
                let grid = *workgroups.get_or_insert_with(|| workgroup_count(size.width, size.height));

                let parameters = match kind.bind_parameters() {
                    Some(bytes) => {
                        if uniforms.as_ref().is_some_and(|b| b.size() != bytes.len() as u64) {
                            *uniforms = None;
                        }
                        let buffer = uniforms.get_or_insert_with(|| {
                            self.ctx.device.create_buffer(&wgpu::BufferDescriptor {
                                label: Some(&format!("{} parameters", self.name)),
                                size: bytes.len() as u64,
                                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                                mapped_at_creation: false,
                            })
                        });
                        self.ctx.queue.write_buffer(buffer, 0, &bytes);
                        Some(&*buffer)
                    }
                    None => None,
                };

                let views: Vec<&wgpu::TextureView> = inputs.iter().map(Texture::view).collect();
                kernel.encode(&self.ctx.device, &mut encoder, output.view(), &views, parameters, grid)?;
            }
        }
        Ok(encoder.finish())
    }

    fn run_cycle(&self, frame: &TextureFrame, source: SourceId) {
        let mut state = self.lock();

        match binding::store(&mut state.bindings, frame, source) {
            Delivery::Foreign => {
                state.stats.foreign_deliveries += 1;
                trace!("Filter `{}` ignored a frame from an unknown source", self.name);
                return;
            }
            Delivery::Incomplete => return,
            Delivery::Complete => {}
        }

        let inputs: Vec<Texture> = state
            .bindings
            .iter()
            .filter_map(|b| b.slot.as_ref().map(|f| f.texture.clone()))
            .collect();
        let Some(first) = inputs.first() else {
            return;
        };

        let output_size = state.kind.compute_output_size(first.size());
        let output = match self.ensure_output(&mut state, output_size) {
            Ok(output) => output,
            Err(e) => {
                warn!("Filter `{}` dropped a frame: {}", self.name, e);
                state.stats.dropped += 1;
                return;
            }
        };

        let provenance = binding::resolve_provenance(&state.bindings, state.sample_time_source);
        let handlers = state.completions.handlers();

        let command = match self.encode(&mut state, &inputs, &output) {
            Ok(command) => command,
            Err(e) => {
                warn!("Filter `{}` dropped a frame: {}", self.name, e);
                state.stats.dropped += 1;
                binding::clear(&mut state.bindings);
                return;
            }
        };

        let submission = self.ctx.queue.submit(std::iter::once(command));
        let waiting = if state.run_synchronously {
            Some(handlers)
        } else {
            if !handlers.is_empty() {
                let loss = self.ctx.device_loss();
                let texture = output.clone();
                self.ctx.queue.on_submitted_work_done(move || {
                    let result = match loss.reason() {
                        Some(reason) => Err(CompletionError::DeviceLost(reason)),
                        None => Ok(texture),
                    };
                    notify(&handlers, result, provenance);
                });
            }
            None
        };

        binding::clear(&mut state.bindings);
        state.stats.dispatched += 1;
        let consumers = state.consumers.snapshot();
        drop(state);

        // Waiting polls the device, which runs other filters' completion
        // callbacks; none of them may see this filter locked.
        if let Some(handlers) = waiting {
            let result = match self.ctx.wait_for(submission) {
                Err(e) => {
                    warn!("Filter `{}` could not wait for the GPU: {}", self.name, e);
                    Err(CompletionError::Wait(e))
                }
                Ok(()) => match self.ctx.device_loss().reason() {
                    Some(reason) => Err(CompletionError::DeviceLost(reason)),
                    None => Ok(output.clone()),
                },
            };
            notify(&handlers, result, provenance);
        }

        let outgoing = TextureFrame {
            texture: output,
            sample_time: provenance.sample_time,
            facing: provenance.facing,
            is_photo: provenance.is_photo,
            retained: frame.retained.clone(),
        };
        for consumer in consumers {
            consumer.new_texture_available(&outgoing, self.id);
        }
    }
}

fn notify(handlers: &[CompletionHandler], result: std::result::Result<Texture, CompletionError>, provenance: Provenance) {
    if handlers.is_empty() {
        return;
    }
    let info = CompletionInfo {
        result,
        sample_time: provenance.sample_time,
        facing: provenance.facing,
        is_photo: provenance.is_photo,
    };
    for handler in handlers {
        handler(&info);
    }
}

impl ImageConsumer for Filter {
    fn add_source(&self, source: SourceId) {
        self.lock().bindings.push(SourceBinding { source, slot: None });
    }

    fn remove_source(&self, source: SourceId) {
        let mut state = self.lock();
        if let Some(index) = state.bindings.iter().position(|b| b.source == source) {
            state.bindings.remove(index);
        }
    }

    fn new_texture_available(&self, frame: &TextureFrame, source: SourceId) {
        let forwards = self.lock().kind.forwards_unchanged();
        if forwards {
            self.forward(frame);
        } else {
            self.run_cycle(frame, source);
        }
    }
}

impl ImageSource for Filter {
    fn source_id(&self) -> SourceId {
        self.id
    }

    fn attach_consumer(&self, consumer: Arc<dyn ImageConsumer>, index: Option<usize>) {
        self.lock().consumers.insert(consumer.clone(), index);
        consumer.add_source(self.id);
    }

    fn remove_consumer(&self, consumer: &dyn ImageConsumer) {
        let removed = self.lock().consumers.remove(consumer);
        if let Some(consumer) = removed {
            consumer.remove_source(self.id);
        }
    }

    fn remove_all_consumers(&self) {
        let consumers = self.lock().consumers.take_all();
        for consumer in consumers {
            consumer.remove_source(self.id);
        }
    }

    fn consumers(&self) -> Vec<Arc<dyn ImageConsumer>> {
        self.lock().consumers.snapshot()
    }
}

impl Drop for Filter {
    fn drop(&mut self) {
        self.remove_all_consumers();
    }
}
