pub mod bar;
pub mod merge;
pub mod normalizer;
pub mod transform;

// Re-export the core bar types for convenient access (e.g. `use crate::market_data::Bar`).
pub use bar::{Bar, ChannelKey, PartialBar};
pub use merge::BarMerger;
pub use normalizer::normalize;
pub use transform::transform_bars;
