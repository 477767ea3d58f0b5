pub mod aperture;
pub mod background;
pub mod consts;
pub mod error;
pub mod extract;
pub mod filter;
pub mod flags;
pub mod image;
pub mod knobs;

pub use error::{Result, SiriusError};
pub use image::{ImageView, NoiseKind, PixelData};
