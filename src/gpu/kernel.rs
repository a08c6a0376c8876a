//! Compute kernels: source validation and pipeline construction.

use super::GpuContext;
use crate::error::{GraphError, Result};
use naga::front::glsl::{Frontend, Options};
use naga::valid::{Capabilities, ValidationFlags, Validator};
use naga::ShaderStage;
use std::borrow::Cow;
use tracing::{debug, info};

/// Edge length of a compute workgroup. Kernels must declare
/// `@workgroup_size(16, 16)`.
pub const WORKGROUP_SIZE: u32 = 16;

/// Copies input 0 to the output texture.
pub const PASS_THROUGH_KERNEL: &str = r#"
@group(0) @binding(0) var output_texture: texture_storage_2d<rgba8unorm, write>;
@group(0) @binding(1) var input_texture: texture_2d<f32>;

@compute @workgroup_size(16, 16)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let size = textureDimensions(output_texture);
    if (gid.x >= size.x || gid.y >= size.y) {
        return;
    }
    let color = textureLoad(input_texture, vec2<i32>(gid.xy), 0);
    textureStore(output_texture, vec2<i32>(gid.xy), color);
}
"#;

/// Rotates input 0 about its center by `params.angle` radians.
/// Pixels falling outside the source are transparent.
pub const ROTATE_KERNEL: &str = r#"
struct RotateParams {
    angle: f32,
    pad0: f32,
    pad1: f32,
    pad2: f32,
}

@group(0) @binding(0) var output_texture: texture_storage_2d<rgba8unorm, write>;
@group(0) @binding(1) var input_texture: texture_2d<f32>;
@group(1) @binding(0) var<uniform> params: RotateParams;

@compute @workgroup_size(16, 16)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let out_dims = textureDimensions(output_texture);
    if (gid.x >= out_dims.x || gid.y >= out_dims.y) {
        return;
    }
    let out_size = vec2<f32>(out_dims);
    let in_size = vec2<f32>(textureDimensions(input_texture));
    let centered = vec2<f32>(gid.xy) + vec2<f32>(0.5, 0.5) - out_size * 0.5;
    let c = cos(params.angle);
    let s = sin(params.angle);
    let src = vec2<f32>(c * centered.x + s * centered.y, -s * centered.x + c * centered.y) + in_size * 0.5;

    var color = vec4<f32>(0.0, 0.0, 0.0, 0.0);
    if (src.x >= 0.0 && src.y >= 0.0 && src.x < in_size.x && src.y < in_size.y) {
        color = textureLoad(input_texture, vec2<i32>(floor(src)), 0);
    }
    textureStore(output_texture, vec2<i32>(gid.xy), color);
}
"#;

/// Kernel source with language specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelSource {
    /// WGSL compute shader and the name of its entry point
    Wgsl { code: Cow<'static, str>, entry_point: String },
    /// GLSL compute shader; the entry point is always `main`
    Glsl(String),
}

impl KernelSource {
    /// WGSL source with the conventional `main` entry point.
    pub fn wgsl(code: impl Into<Cow<'static, str>>) -> Self {
        KernelSource::Wgsl {
            code: code.into(),
            entry_point: "main".to_string(),
        }
    }

    pub fn pass_through() -> Self {
        Self::wgsl(PASS_THROUGH_KERNEL)
    }

    pub fn rotate() -> Self {
        Self::wgsl(ROTATE_KERNEL)
    }

    /// Parse and validate the kernel, returning WGSL and its entry point.
    fn prepare(&self, name: &str) -> Result<(String, String)> {
        let build_error = |reason: String| GraphError::KernelBuild {
            name: name.to_string(),
            reason,
        };

        let (module, wgsl, entry_point) = match self {
            KernelSource::Wgsl { code, entry_point } => {
                let module = naga::front::wgsl::parse_str(code)
                    .map_err(|e| build_error(format!("WGSL parse error: {}", e)))?;
                (module, code.to_string(), entry_point.clone())
            }
            KernelSource::Glsl(glsl) => {
                let mut frontend = Frontend::default();
                let options = Options::from(ShaderStage::Compute);
                let module = frontend
                    .parse(&options, glsl)
                    .map_err(|e| build_error(format!("GLSL parse error: {:?}", e)))?;
                (module, String::new(), "main".to_string())
            }
        };

        let has_entry = module
            .entry_points
            .iter()
            .any(|ep| ep.name == entry_point && ep.stage == ShaderStage::Compute);
        if !has_entry {
            return Err(build_error(format!("no compute entry point named `{}`", entry_point)));
        }

        let mut validator = Validator::new(ValidationFlags::all(), Capabilities::all());
        let info = validator
            .validate(&module)
            .map_err(|e| build_error(format!("validation error: {:?}", e)))?;

        let wgsl = if wgsl.is_empty() {
            naga::back::wgsl::write_string(&module, &info, naga::back::wgsl::WriterFlags::empty())
                .map_err(|e| build_error(format!("WGSL generation error: {:?}", e)))?
        } else {
            wgsl
        };
        Ok((wgsl, entry_point))
    }
}

/// A compiled compute pipeline together with its bind group layouts.
#[derive(Debug)]
pub struct KernelPipeline {
    name: String,
    pipeline: wgpu::ComputePipeline,
    texture_layout: wgpu::BindGroupLayout,
    parameter_layout: Option<wgpu::BindGroupLayout>,
    input_count: usize,
}

impl KernelPipeline {
    /// Build the pipeline for a kernel reading `input_count` textures and,
    /// when `with_parameters` is set, one uniform buffer in group 1.
    pub fn build(
        ctx: &GpuContext,
        name: &str,
        source: &KernelSource,
        input_count: usize,
        with_parameters: bool,
    ) -> Result<Self> {
        let (wgsl, entry_point) = source.prepare(name)?;
        let device = &ctx.device;
        // wgpu checks the kernel's bindings against the layouts only at
        // pipeline creation; capture that instead of the default panic.
        let scope = device.push_error_scope(wgpu::ErrorFilter::Validation);

        let mut entries = vec![wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::StorageTexture {
                access: wgpu::StorageTextureAccess::WriteOnly,
                format: wgpu::TextureFormat::Rgba8Unorm,
                view_dimension: wgpu::TextureViewDimension::D2,
            },
            count: None,
        }];
        for i in 0..input_count {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: i as u32 + 1,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            });
        }

        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(&format!("{} textures", name)),
            entries: &entries,
        });

        let parameter_layout = with_parameters.then(|| {
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(&format!("{} parameters", name)),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                }],
            })
        });

        let mut layouts = vec![&texture_layout];
        if let Some(layout) = &parameter_layout {
            layouts.push(layout);
        }
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&format!("{} layout", name)),
            bind_group_layouts: &layouts,
            immediate_size: 0,
        });

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(name),
            source: wgpu::ShaderSource::Wgsl(Cow::Owned(wgsl)),
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(name),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: Some(&entry_point),
            compilation_options: Default::default(),
            cache: None,
        });

        if let Some(error) = pollster::block_on(scope.pop()) {
            return Err(GraphError::KernelBuild {
                name: name.to_string(),
                reason: error.to_string(),
            });
        }

        info!("Built compute kernel `{}` ({} inputs)", name, input_count);
        Ok(Self {
            name: name.to_string(),
            pipeline,
            texture_layout,
            parameter_layout,
            input_count,
        })
    }

    pub fn input_count(&self) -> usize {
        self.input_count
    }

    pub fn uses_parameters(&self) -> bool {
        self.parameter_layout.is_some()
    }

    /// Record one dispatch writing `output` from `inputs`.
    pub fn encode(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        output: &wgpu::TextureView,
        inputs: &[&wgpu::TextureView],
        parameters: Option<&wgpu::Buffer>,
        workgroups: (u32, u32),
    ) -> Result<()> {
        if inputs.len() != self.input_count {
            return Err(GraphError::InputCountMismatch {
                name: self.name.clone(),
                expected: self.input_count,
                actual: inputs.len(),
            });
        }

        let mut entries = vec![wgpu::BindGroupEntry {
            binding: 0,
            resource: wgpu::BindingResource::TextureView(output),
        }];
        for (i, view) in inputs.iter().enumerate() {
            entries.push(wgpu::BindGroupEntry {
                binding: i as u32 + 1,
                resource: wgpu::BindingResource::TextureView(view),
            });
        }
        let texture_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("{} textures", self.name)),
            layout: &self.texture_layout,
            entries: &entries,
        });

        let parameter_group = match (&self.parameter_layout, parameters) {
            (Some(layout), Some(buffer)) => Some(device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(&format!("{} parameters", self.name)),
                layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buffer.as_entire_binding(),
                }],
            })),
            (Some(_), None) => {
                return Err(GraphError::KernelBuild {
                    name: self.name.clone(),
                    reason: "parameter buffer missing".to_string(),
                })
            }
            (None, _) => None,
        };

        debug!("Dispatching `{}` with {}x{} workgroups", self.name, workgroups.0, workgroups.1);
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(&format!("{} encoder", self.name)),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &texture_group, &[]);
        if let Some(group) = &parameter_group {
            pass.set_bind_group(1, group, &[]);
        }
        pass.dispatch_workgroups(workgroups.0, workgroups.1, 1);
        Ok(())
    }
}

/// Workgroup grid covering `width` x `height` pixels.
pub fn workgroup_count(width: u32, height: u32) -> (u32, u32) {
    (width.div_ceil(WORKGROUP_SIZE), height.div_ceil(WORKGROUP_SIZE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_kernels_validate() {
        assert!(KernelSource::pass_through().prepare("pass").is_ok());
        assert!(KernelSource::rotate().prepare("rotate").is_ok());
    }

    #[test]
    fn unknown_entry_point_is_rejected() {
        let source = KernelSource::Wgsl {
            code: Cow::Borrowed(PASS_THROUGH_KERNEL),
            entry_point: "missingKernel".to_string(),
        };
        let err = source.prepare("broken").unwrap_err();
        assert!(matches!(err, GraphError::KernelBuild { .. }));
    }

    #[test]
    fn invalid_wgsl_is_rejected() {
        let err = KernelSource::wgsl("fn main( {").prepare("garbage").unwrap_err();
        assert!(err.to_string().contains("garbage"));
    }

    #[test]
    fn glsl_compute_is_converted() {
        let glsl = r#"
            #version 450
            layout(local_size_x = 16, local_size_y = 16) in;
            layout(set = 0, binding = 0, rgba8) uniform writeonly image2D outputImage;
            void main() {
                imageStore(outputImage, ivec2(gl_GlobalInvocationID.xy), vec4(1.0));
            }
        "#;
        let (wgsl, entry) = KernelSource::Glsl(glsl.to_string()).prepare("fill").unwrap();
        assert_eq!(entry, "main");
        assert!(wgsl.contains("textureStore"));
    }

    #[test]
    fn workgroups_round_up() {
        assert_eq!(workgroup_count(16, 16), (1, 1));
        assert_eq!(workgroup_count(17, 1), (2, 1));
        assert_eq!(workgroup_count(1920, 1080), (120, 68));
    }

    #[test]
    fn pipeline_builds_on_headless_device() {
        let ctx = GpuContext::headless();
        let kernel = KernelPipeline::build(&ctx, "rotate", &KernelSource::rotate(), 1, true).unwrap();
        assert_eq!(kernel.input_count(), 1);
        assert!(kernel.uses_parameters());
    }

    #[test]
    fn binding_mismatch_fails_the_build() {
        let ctx = GpuContext::headless();
        // the rotate kernel reads a uniform the layout does not provide
        let err = KernelPipeline::build(&ctx, "rotate", &KernelSource::rotate(), 1, false).unwrap_err();
        assert!(matches!(err, GraphError::KernelBuild { .. }));

        let err = KernelPipeline::build(&ctx, "copy", &KernelSource::pass_through(), 0, false).unwrap_err();
        assert!(matches!(err, GraphError::KernelBuild { .. }));
    }
}
