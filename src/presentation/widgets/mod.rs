mod image_state;

pub use image_state::ImageLoader;
