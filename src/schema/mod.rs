pub mod codebook;
pub mod record;
pub mod story;
