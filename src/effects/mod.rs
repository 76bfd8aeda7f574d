pub mod encoder;
pub mod palette;
