//! Entry points into the graph: still images and live capture.

mod camera;
mod static_image;

pub use camera::{CameraSource, PhotoCompletion, Preprocess, WillTransmit};
pub use static_image::StaticImageSource;
