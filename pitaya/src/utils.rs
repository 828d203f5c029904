/// Preprocessing of captured images into model input.
pub mod image;
/// A scripted serial peer for exercising links without hardware.
pub mod scripted;
/// Test helpers.
pub mod tests;
