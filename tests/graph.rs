use shutter::filter::{Compute, Filter, FilterKind, KernelEncoder};
use shutter::gpu::KernelSource;
use shutter::sink::FrameSink;
use shutter::source::{CameraSource, StaticImageSource};
use shutter::{CameraFacing, GpuContext, ImageSource, Result, Size, Texture};
use std::sync::Arc;
use std::time::Duration;

const BLEND_KERNEL: &str = r#"
@group(0) @binding(0) var output_texture: texture_storage_2d<rgba8unorm, write>;
@group(0) @binding(1) var background: texture_2d<f32>;
@group(0) @binding(2) var foreground: texture_2d<f32>;

@compute @workgroup_size(16, 16)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let size = textureDimensions(output_texture);
    if (gid.x >= size.x || gid.y >= size.y) {
        return;
    }
    let a = textureLoad(background, vec2<i32>(gid.xy), 0);
    let b = textureLoad(foreground, vec2<i32>(gid.xy), 0);
    textureStore(output_texture, vec2<i32>(gid.xy), mix(a, b, b.a));
}
"#;

fn still(ctx: &GpuContext, width: u32, height: u32) -> StaticImageSource {
    StaticImageSource::new(ctx, &image::RgbaImage::new(width, height)).unwrap()
}

#[test]
fn two_input_filter_dispatches_once_per_complete_cycle() {
    let ctx = Arc::new(GpuContext::headless());
    let blend = Filter::compute(ctx.clone(), "blend", Compute::new(KernelSource::wgsl(BLEND_KERNEL), 2));
    assert!(!blend.is_inert());
    let sink = blend.add_consumer(FrameSink::new());

    let a = still(&ctx, 8, 8);
    let b = still(&ctx, 8, 8);
    a.add_consumer(blend.clone());
    b.add_consumer(blend.clone());
    assert_eq!(blend.sources(), vec![a.source_id(), b.source_id()]);

    a.transmit_texture();
    b.transmit_texture();
    assert_eq!(blend.stats().dispatched, 1);
    assert_eq!(sink.frames_received(), 1);

    a.transmit_texture();
    a.transmit_texture();
    assert_eq!(blend.stats().dispatched, 1);
    assert_eq!(blend.pending_inputs(), 1);

    // the repeated a occupies one slot, so the next pair adds a single dispatch
    a.transmit_texture();
    b.transmit_texture();
    assert_eq!(blend.stats().dispatched, 2);
    assert_eq!(blend.pending_inputs(), 0);

    a.transmit_texture();
    b.transmit_texture();
    a.transmit_texture();
    b.transmit_texture();
    assert_eq!(blend.stats().dispatched, 4);
    assert_eq!(blend.pending_inputs(), 0);
    assert_eq!(sink.frames_received(), 4);
    assert_eq!(blend.stats().dropped, 0);
}

#[test]
fn dropping_an_input_prunes_its_binding() {
    let ctx = Arc::new(GpuContext::headless());
    let blend = Filter::compute(ctx.clone(), "blend", Compute::new(KernelSource::wgsl(BLEND_KERNEL), 2));
    let a = still(&ctx, 4, 4);
    {
        let b = still(&ctx, 4, 4);
        a.add_consumer(blend.clone());
        b.add_consumer(blend.clone());
        assert_eq!(blend.sources().len(), 2);
    }
    assert_eq!(blend.sources(), vec![a.source_id()]);
}

#[test]
fn camera_frames_flow_through_a_chain() {
    let ctx = Arc::new(GpuContext::headless());
    let camera = CameraSource::new(ctx.clone(), CameraFacing::Front);
    let rotate = camera.add_consumer(Filter::rotate(ctx.clone(), 90.0, true));
    let copy = rotate.add_consumer(Filter::pass_through(ctx.clone(), true));
    let preview = copy.add_consumer(FrameSink::new());
    let recorder = copy.add_consumer(FrameSink::new());

    for i in 0..3u64 {
        let frame = shutter::frame::VideoFrame::new(16, 9, shutter::frame::PixelFormat::Bgra);
        camera.push_frame(frame, Duration::from_millis(33 * i)).unwrap();
    }

    for sink in [&preview, &recorder] {
        assert_eq!(sink.frames_received(), 3);
        let frame = sink.latest().unwrap();
        assert_eq!(frame.texture.size(), Size::new(9, 16));
        assert_eq!(frame.sample_time, Some(Duration::from_millis(66)));
        assert_eq!(frame.facing, Some(CameraFacing::Front));
    }
    assert!(preview
        .latest()
        .unwrap()
        .texture
        .same_texture(&recorder.latest().unwrap().texture));

    copy.remove_consumer(&*recorder);
    camera.push_frame(
        shutter::frame::VideoFrame::new(16, 9, shutter::frame::PixelFormat::Bgra),
        Duration::from_millis(99),
    )
    .unwrap();
    assert_eq!(preview.frames_received(), 4);
    assert_eq!(recorder.frames_received(), 3);
    assert_eq!(recorder.source_removals(), 1);
}

struct Halve;

impl KernelEncoder for Halve {
    fn output_size(&self, input: Size) -> Size {
        Size::new(input.width / 2, input.height / 2)
    }

    fn encode(
        &self,
        _ctx: &GpuContext,
        encoder: &mut wgpu::CommandEncoder,
        inputs: &[Texture],
        output: &Texture,
    ) -> Result<()> {
        encoder.copy_texture_to_texture(
            inputs[0].raw().as_image_copy(),
            output.raw().as_image_copy(),
            wgpu::Extent3d {
                width: output.size().width,
                height: output.size().height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }
}

#[test]
fn custom_encoder_controls_output_size() {
    let ctx = Arc::new(GpuContext::headless());
    let halve = Filter::custom(ctx.clone(), "halve", Arc::new(Halve));
    assert!(matches!(halve.kind(), FilterKind::Custom(_)));

    let output = halve
        .filtered_texture(&[Texture::from_rgba(&ctx, 8, 4, &[0; 128], "input").unwrap()])
        .unwrap();
    assert_eq!(output.size(), Size::new(4, 2));
}
