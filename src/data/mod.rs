//! Record types and training-data loading.

pub mod dataloader;
pub mod example;
pub mod prediction;

pub use dataloader::*;
pub use example::*;
pub use prediction::*;
