mod device;
mod image;
mod status;

pub use device::*;
pub use image::*;
pub use status::*;
