//! YAML pipeline descriptions and the linear filter chains built from them.
//!
//! ```yaml
//! synchronous: false
//! filters:
//!   - type: rotate
//!     angle: 90
//!     fit_size: true
//!   - type: pass_through
//!     create_texture: true
//!   - type: kernel
//!     path: shaders/invert.wgsl
//!     entry_point: main
//!     inputs: 1
//! ```

use crate::error::{GraphError, Result};
use crate::filter::{Compute, Filter};
use crate::gpu::{GpuContext, KernelSource};
use crate::graph::ImageSource;
use crate::sink::FrameSink;
use crate::source::StaticImageSource;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

fn default_fit_size() -> bool {
    true
}

fn default_entry_point() -> String {
    "main".to_string()
}

fn default_inputs() -> usize {
    1
}

/// One filter of a chain.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilterConfig {
    PassThrough {
        #[serde(default)]
        create_texture: bool,
    },
    Rotate {
        /// Degrees, counter-clockwise
        angle: f32,
        #[serde(default = "default_fit_size")]
        fit_size: bool,
    },
    /// Compute kernel loaded from a file. Files ending in `.glsl` or
    /// `.comp` are GLSL, anything else is WGSL. `inputs` is the number of
    /// textures the kernel reads; the head of a chain takes one per image.
    Kernel {
        path: PathBuf,
        #[serde(default = "default_entry_point")]
        entry_point: String,
        #[serde(default = "default_inputs")]
        inputs: usize,
    },
}

impl FilterConfig {
    fn build(&self, ctx: &Arc<GpuContext>, base_dir: &Path) -> Result<Arc<Filter>> {
        let filter = match self {
            FilterConfig::PassThrough { create_texture } => Filter::pass_through(ctx.clone(), *create_texture),
            FilterConfig::Rotate { angle, fit_size } => Filter::rotate(ctx.clone(), *angle, *fit_size),
            FilterConfig::Kernel {
                path,
                entry_point,
                inputs,
            } => {
                let path = base_dir.join(path);
                let code = fs::read_to_string(&path)?;
                let is_glsl = matches!(path.extension().and_then(|e| e.to_str()), Some("glsl" | "comp"));
                let source = if is_glsl {
                    KernelSource::Glsl(code)
                } else {
                    KernelSource::Wgsl {
                        code: code.into(),
                        entry_point: entry_point.clone(),
                    }
                };
                let name = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("kernel")
                    .to_string();
                Filter::compute(ctx.clone(), name, Compute::new(source, *inputs))
            }
        };
        Ok(filter)
    }
}

/// A whole pipeline: filters linked in order.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PipelineConfig {
    /// Block on every dispatch
    #[serde(default)]
    pub synchronous: bool,
    #[serde(default)]
    pub filters: Vec<FilterConfig>,
    /// Directory kernel paths are resolved against
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl PipelineConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Read a pipeline file; kernel paths become relative to its directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = Self::from_yaml(&fs::read_to_string(path)?)?;
        config.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        info!("Loaded pipeline {:?} ({} filters)", path, config.filters.len());
        Ok(config)
    }

    /// Create every filter and link them head to tail. An empty pipeline
    /// becomes a single forwarding pass-through.
    pub fn build_chain(&self, ctx: &Arc<GpuContext>) -> Result<FilterChain> {
        let filters = if self.filters.is_empty() {
            vec![Filter::pass_through(ctx.clone(), false)]
        } else {
            self.filters
                .iter()
                .map(|config| config.build(ctx, &self.base_dir))
                .collect::<Result<Vec<_>>>()?
        };

        for pair in filters.windows(2) {
            pair[0].add_consumer(pair[1].clone());
        }
        for filter in &filters {
            filter.set_run_synchronously(self.synchronous);
        }
        Ok(FilterChain { filters })
    }
}

/// Filters linked one after another.
pub struct FilterChain {
    filters: Vec<Arc<Filter>>,
}

impl FilterChain {
    /// First filter; sources attach here.
    pub fn head(&self) -> &Arc<Filter> {
        &self.filters[0]
    }

    /// Last filter; sinks attach here.
    pub fn tail(&self) -> &Arc<Filter> {
        &self.filters[self.filters.len() - 1]
    }

    pub fn filters(&self) -> &[Arc<Filter>] {
        &self.filters
    }

    /// Push still images through the whole chain once, synchronously,
    /// and read the tail's output back.
    pub fn process_images(&self, ctx: &GpuContext, images: &[image::RgbaImage]) -> Result<image::RgbaImage> {
        if images.is_empty() {
            return Err(GraphError::Config("at least one input image is required".to_string()));
        }
        for filter in &self.filters {
            filter.set_run_synchronously(true);
        }
        let sources = images
            .iter()
            .map(|image| -> Result<StaticImageSource> {
                let source = StaticImageSource::new(ctx, image)?;
                source.add_consumer(self.head().clone());
                Ok(source)
            })
            .collect::<Result<Vec<_>>>()?;
        let sink = self.tail().add_consumer(FrameSink::new());

        for source in &sources {
            source.transmit_texture();
        }
        self.tail().remove_consumer(&*sink);

        if sink.frames_received() == 0 {
            return Err(GraphError::NoOutput(self.tail().name().to_string()));
        }
        sink.snapshot(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_filter_type() {
        let yaml = r#"
synchronous: true
filters:
  - type: rotate
    angle: 90
  - type: pass_through
    create_texture: true
  - type: kernel
    path: invert.comp
"#;
        let config = PipelineConfig::from_yaml(yaml).unwrap();
        assert!(config.synchronous);
        assert_eq!(
            config.filters,
            vec![
                FilterConfig::Rotate { angle: 90.0, fit_size: true },
                FilterConfig::PassThrough { create_texture: true },
                FilterConfig::Kernel {
                    path: PathBuf::from("invert.comp"),
                    entry_point: "main".to_string(),
                    inputs: 1,
                },
            ]
        );
    }

    #[test]
    fn unknown_filter_type_is_rejected() {
        let err = PipelineConfig::from_yaml("filters:\n  - type: blur\n").unwrap_err();
        assert!(matches!(err, GraphError::Yaml(_)));
    }

    #[test]
    fn chain_links_filters_in_order() {
        let ctx = Arc::new(GpuContext::headless());
        let config = PipelineConfig {
            filters: vec![
                FilterConfig::Rotate { angle: 90.0, fit_size: true },
                FilterConfig::PassThrough { create_texture: true },
            ],
            ..Default::default()
        };
        let chain = config.build_chain(&ctx).unwrap();

        assert_eq!(chain.filters().len(), 2);
        assert_eq!(chain.tail().sources(), vec![chain.head().source_id()]);
        assert_eq!(chain.head().consumers().len(), 1);
    }

    #[test]
    fn missing_kernel_file_fails_the_build() {
        let ctx = Arc::new(GpuContext::headless());
        let config = PipelineConfig {
            filters: vec![FilterConfig::Kernel {
                path: PathBuf::from("/nonexistent/kernel.wgsl"),
                entry_point: "main".to_string(),
                inputs: 1,
            }],
            ..Default::default()
        };
        assert!(matches!(config.build_chain(&ctx), Err(GraphError::Io(_))));
    }

    #[test]
    fn one_shot_runs_whole_chain() {
        let ctx = Arc::new(GpuContext::headless());
        let config = PipelineConfig {
            filters: vec![
                FilterConfig::Rotate { angle: 90.0, fit_size: true },
                FilterConfig::PassThrough { create_texture: true },
            ],
            ..Default::default()
        };
        let chain = config.build_chain(&ctx).unwrap();

        let output = chain.process_images(&ctx, &[image::RgbaImage::new(6, 2)]).unwrap();
        assert_eq!(output.dimensions(), (2, 6));
        assert!(chain.tail().consumers().is_empty());
    }

    #[test]
    fn multi_input_kernel_takes_one_image_per_input() {
        let dir = std::env::temp_dir().join(format!("shutter-config-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("add.wgsl"),
            r#"
@group(0) @binding(0) var output_texture: texture_storage_2d<rgba8unorm, write>;
@group(0) @binding(1) var first: texture_2d<f32>;
@group(0) @binding(2) var second: texture_2d<f32>;

@compute @workgroup_size(16, 16)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let color = textureLoad(first, vec2<i32>(gid.xy), 0) + textureLoad(second, vec2<i32>(gid.xy), 0);
    textureStore(output_texture, vec2<i32>(gid.xy), color);
}
"#,
        )
        .unwrap();
        fs::write(dir.join("pipeline.yaml"), "filters:\n  - type: kernel\n    path: add.wgsl\n    inputs: 2\n").unwrap();

        let ctx = Arc::new(GpuContext::headless());
        let chain = PipelineConfig::load(dir.join("pipeline.yaml"))
            .unwrap()
            .build_chain(&ctx)
            .unwrap();
        assert!(!chain.head().is_inert());

        let images = [image::RgbaImage::new(4, 3), image::RgbaImage::new(4, 3)];
        let output = chain.process_images(&ctx, &images).unwrap();
        assert_eq!(output.dimensions(), (4, 3));
        assert_eq!(chain.head().stats().dispatched, 1);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn empty_pipeline_forwards() {
        let ctx = Arc::new(GpuContext::headless());
        let chain = PipelineConfig::default().build_chain(&ctx).unwrap();
        let output = chain.process_images(&ctx, &[image::RgbaImage::new(3, 3)]).unwrap();
        assert_eq!(output.dimensions(), (3, 3));
    }
}
