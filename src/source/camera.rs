//! Live frames from a capture producer as a graph source.

use crate::error::{CompletionError, Result};
use crate::filter::{CompletionInfo, Filter};
use crate::frame::VideoFrame;
use crate::gpu::GpuContext;
use crate::graph::{ConsumerList, ImageConsumer, ImageSource, SourceId};
use crate::stats::CaptureBenchmark;
use crate::texture::{CameraFacing, Size, Texture, TextureFrame, TextureRole};
use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Receives an unfiltered copy of the frame captured for a photo request.
pub type PhotoCompletion = Box<dyn FnOnce(CompletionInfo) + Send>;

/// Called with each CPU frame before it is uploaded.
pub type Preprocess = Arc<dyn Fn(&mut VideoFrame) + Send + Sync>;

/// Called with each texture and its sample time right before fan-out.
pub type WillTransmit = Arc<dyn Fn(&Texture, Duration) + Send + Sync>;

struct CameraState {
    consumers: ConsumerList,
    facing: CameraFacing,
    paused: bool,
    need_photo: bool,
    photo_completion: Option<PhotoCompletion>,
    preprocess: Option<Preprocess>,
    will_transmit: Option<WillTransmit>,
    benchmark_enabled: bool,
    benchmark: CaptureBenchmark,
    upload: Option<Texture>,
}

/// Everything a single frame needs, taken from the state in one lock.
struct Outgoing {
    consumers: Vec<Arc<dyn ImageConsumer>>,
    facing: CameraFacing,
    is_photo: bool,
    photo_completion: Option<PhotoCompletion>,
    will_transmit: Option<WillTransmit>,
    started: Option<Instant>,
}

/// Capture producer: turns frames from a capture callback into streamed
/// texture frames.
pub struct CameraSource {
    id: SourceId,
    ctx: Arc<GpuContext>,
    state: Mutex<CameraState>,
}

impl CameraSource {
    pub fn new(ctx: Arc<GpuContext>, facing: CameraFacing) -> Self {
        Self {
            id: SourceId::next(),
            ctx,
            state: Mutex::new(CameraState {
                consumers: ConsumerList::default(),
                facing,
                paused: false,
                need_photo: false,
                photo_completion: None,
                preprocess: None,
                will_transmit: None,
                benchmark_enabled: false,
                benchmark: CaptureBenchmark::default(),
                upload: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CameraState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn facing(&self) -> CameraFacing {
        self.lock().facing
    }

    /// Switch the camera side stamped on subsequent frames.
    pub fn set_facing(&self, facing: CameraFacing) {
        self.lock().facing = facing;
    }

    /// Paused sources drop every frame they are handed.
    pub fn set_paused(&self, paused: bool) {
        self.lock().paused = paused;
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    /// Mark the next transmitted frame as a photo.
    ///
    /// `completion` receives a GPU copy of that raw frame, or the error
    /// that kept it from being uploaded.
    pub fn capture_photo(&self, completion: Option<PhotoCompletion>) {
        let mut state = self.lock();
        state.need_photo = true;
        state.photo_completion = completion;
    }

    pub fn set_preprocess(&self, preprocess: Option<Preprocess>) {
        self.lock().preprocess = preprocess;
    }

    pub fn set_will_transmit(&self, will_transmit: Option<WillTransmit>) {
        self.lock().will_transmit = will_transmit;
    }

    /// Record how long each frame takes from arrival to the end of fan-out.
    pub fn set_benchmark(&self, enabled: bool) {
        self.lock().benchmark_enabled = enabled;
    }

    /// Average frame time, excluding the warm-up frames.
    pub fn average_frame_duration(&self) -> Duration {
        self.lock().benchmark.average()
    }

    pub fn reset_benchmark(&self) {
        self.lock().benchmark.reset();
    }

    /// Take what a frame needs, or `None` when it should be dropped.
    ///
    /// A pending photo request stays pending across dropped frames.
    fn begin(&self) -> Option<(Outgoing, Option<Preprocess>)> {
        let mut state = self.lock();
        if state.paused || state.consumers.is_empty() {
            trace!("Camera dropped a frame (paused: {})", state.paused);
            return None;
        }
        let is_photo = std::mem::take(&mut state.need_photo);
        let outgoing = Outgoing {
            consumers: state.consumers.snapshot(),
            facing: state.facing,
            is_photo,
            photo_completion: state.photo_completion.take(),
            will_transmit: state.will_transmit.clone(),
            started: state.benchmark_enabled.then(Instant::now),
        };
        Some((outgoing, state.preprocess.clone()))
    }

    fn upload(&self, frame: &VideoFrame) -> Result<Texture> {
        let rgba = frame.to_rgba()?;
        let size = Size::new(rgba.width, rgba.height);
        let cached = self.lock().upload.clone().filter(|t| t.size() == size);
        let texture = match cached {
            Some(texture) => texture,
            None => {
                let texture = Texture::new(&self.ctx, size, TextureRole::Upload, "camera frame")?;
                debug!("Camera allocated {} upload texture", size);
                self.lock().upload = Some(texture.clone());
                texture
            }
        };
        let expected = size.width as usize * size.height as usize * 4;
        texture.write_rgba(&self.ctx, &rgba.data[..expected.min(rgba.data.len())])?;
        Ok(texture)
    }

    /// Convert and upload a CPU frame, then fan it out.
    ///
    /// The upload texture is reused while the frame size is unchanged, so
    /// a consumer holding on to an earlier frame sees it overwritten.
    pub fn push_frame(&self, mut frame: VideoFrame, sample_time: Duration) -> Result<()> {
        let Some((outgoing, preprocess)) = self.begin() else {
            return Ok(());
        };
        if let Some(preprocess) = preprocess {
            preprocess(&mut frame);
        }

        match self.upload(&frame) {
            Ok(texture) => {
                self.transmit(outgoing, texture, sample_time, None);
                Ok(())
            }
            Err(e) => {
                warn!("Camera could not upload a frame: {}", e);
                if let Some(completion) = outgoing.photo_completion {
                    completion(CompletionInfo {
                        result: Err(CompletionError::Capture(e.to_string())),
                        sample_time: Some(sample_time),
                        facing: Some(outgoing.facing),
                        is_photo: outgoing.is_photo,
                    });
                }
                Err(e)
            }
        }
    }

    /// Fan out a texture the producer already owns. `retained` is kept
    /// alive alongside the texture until every consumer lets go of it.
    pub fn push_texture(&self, texture: Texture, sample_time: Duration, retained: Option<Arc<dyn Any + Send + Sync>>) {
        if let Some((outgoing, _)) = self.begin() {
            self.transmit(outgoing, texture, sample_time, retained);
        }
    }

    fn transmit(
        &self,
        outgoing: Outgoing,
        texture: Texture,
        sample_time: Duration,
        retained: Option<Arc<dyn Any + Send + Sync>>,
    ) {
        if let Some(completion) = outgoing.photo_completion {
            let copier = Filter::pass_through(self.ctx.clone(), true);
            let result = copier
                .filtered_texture(std::slice::from_ref(&texture))
                .ok_or_else(|| CompletionError::Capture("photo copy produced no texture".to_string()));
            completion(CompletionInfo {
                result,
                sample_time: Some(sample_time),
                facing: Some(outgoing.facing),
                is_photo: outgoing.is_photo,
            });
        }

        if let Some(will_transmit) = &outgoing.will_transmit {
            will_transmit(&texture, sample_time);
        }

        let mut frame = TextureFrame::streamed(texture, sample_time).with_facing(outgoing.facing);
        frame.is_photo = outgoing.is_photo;
        frame.retained = retained;
        for consumer in &outgoing.consumers {
            consumer.new_texture_available(&frame, self.id);
        }

        if let Some(started) = outgoing.started {
            self.lock().benchmark.record(started.elapsed());
        }
    }
}

impl ImageSource for CameraSource {
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

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.remove_all_consumers();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;
    use crate::sink::FrameSink;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn camera() -> CameraSource {
        CameraSource::new(Arc::new(GpuContext::headless()), CameraFacing::Back)
    }

    fn bgra(width: u32, height: u32) -> VideoFrame {
        VideoFrame::new(width, height, PixelFormat::Bgra)
    }

    #[test]
    fn frames_carry_time_and_facing() {
        let camera = camera();
        let sink = camera.add_consumer(FrameSink::new());

        camera.push_frame(bgra(8, 6), Duration::from_millis(40)).unwrap();

        let frame = sink.latest().unwrap();
        assert_eq!(frame.sample_time, Some(Duration::from_millis(40)));
        assert_eq!(frame.facing, Some(CameraFacing::Back));
        assert!(!frame.is_photo);
        assert_eq!(frame.texture.size(), Size::new(8, 6));
    }

    #[test]
    fn upload_texture_is_reused_per_size() {
        let camera = camera();
        let sink = camera.add_consumer(FrameSink::new());

        camera.push_frame(bgra(4, 4), Duration::ZERO).unwrap();
        let first = sink.latest().unwrap().texture;
        camera.push_frame(bgra(4, 4), Duration::from_millis(1)).unwrap();
        assert!(sink.latest().unwrap().texture.same_texture(&first));
        camera.push_frame(bgra(2, 4), Duration::from_millis(2)).unwrap();
        assert!(!sink.latest().unwrap().texture.same_texture(&first));
    }

    #[test]
    fn paused_camera_drops_frames() {
        let camera = camera();
        let sink = camera.add_consumer(FrameSink::new());
        camera.set_paused(true);
        camera.push_frame(bgra(2, 2), Duration::ZERO).unwrap();
        assert_eq!(sink.frames_received(), 0);

        camera.set_paused(false);
        camera.push_frame(bgra(2, 2), Duration::ZERO).unwrap();
        assert_eq!(sink.frames_received(), 1);
    }

    #[test]
    fn photo_marks_one_frame_and_completes_with_copy() {
        let camera = camera();
        let sink = camera.add_consumer(FrameSink::new());
        let completed = Arc::new(Mutex::new(None));
        let slot = completed.clone();
        camera.capture_photo(Some(Box::new(move |info: CompletionInfo| {
            *slot.lock().unwrap() = Some(info);
        })));

        camera.push_frame(bgra(3, 3), Duration::from_millis(5)).unwrap();
        assert!(sink.latest().unwrap().is_photo);

        let info = completed.lock().unwrap().take().unwrap();
        assert!(info.is_photo);
        let copy = info.result.unwrap();
        assert_eq!(copy.size(), Size::new(3, 3));
        assert!(!copy.same_texture(&sink.latest().unwrap().texture));

        camera.push_frame(bgra(3, 3), Duration::from_millis(6)).unwrap();
        assert!(!sink.latest().unwrap().is_photo);
    }

    #[test]
    fn failed_upload_reports_to_photo_completion() {
        let camera = camera();
        camera.add_consumer(FrameSink::new());
        let failures = Arc::new(AtomicUsize::new(0));
        let counter = failures.clone();
        camera.capture_photo(Some(Box::new(move |info: CompletionInfo| {
            assert!(matches!(info.result, Err(CompletionError::Capture(_))));
            counter.fetch_add(1, Ordering::SeqCst);
        })));

        let broken = VideoFrame::from_data(4, 4, PixelFormat::Bgra, vec![0; 3]);
        assert!(camera.push_frame(broken, Duration::ZERO).is_err());
        assert_eq!(failures.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn hooks_run_before_fan_out() {
        let camera = camera();
        let sink = camera.add_consumer(FrameSink::new());
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        camera.set_preprocess(Some(Arc::new(|frame: &mut VideoFrame| {
            frame.data.fill(255);
        })));
        camera.set_will_transmit(Some(Arc::new(move |texture: &Texture, _time: Duration| {
            assert_eq!(texture.size(), Size::new(2, 1));
            counter.fetch_add(1, Ordering::SeqCst);
        })));

        camera.push_frame(bgra(2, 1), Duration::ZERO).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(sink.frames_received(), 1);
    }

    #[test]
    fn benchmark_counts_frames() {
        let camera = camera();
        camera.add_consumer(FrameSink::new());
        camera.set_benchmark(true);
        for i in 0..7 {
            camera.push_frame(bgra(2, 2), Duration::from_millis(i)).unwrap();
        }
        assert_eq!(camera.lock().benchmark.frames(), 7);
        camera.reset_benchmark();
        assert_eq!(camera.average_frame_duration(), Duration::ZERO);
    }

    #[test]
    fn pushed_textures_keep_retained_handle() {
        let ctx = Arc::new(GpuContext::headless());
        let camera = CameraSource::new(ctx.clone(), CameraFacing::Front);
        let sink = camera.add_consumer(FrameSink::new());
        let texture = Texture::from_rgba(&ctx, 1, 1, &[0; 4], "owned").unwrap();
        let handle: Arc<dyn Any + Send + Sync> = Arc::new(7u32);

        camera.push_texture(texture.clone(), Duration::from_millis(3), Some(handle.clone()));

        let frame = sink.latest().unwrap();
        assert!(frame.texture.same_texture(&texture));
        assert!(Arc::ptr_eq(frame.retained.as_ref().unwrap(), &handle));
    }
}
