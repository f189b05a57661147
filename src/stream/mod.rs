pub mod dispatcher;
pub mod multiplexer;

pub use dispatcher::{BarCallback, ResetCallback};
pub use multiplexer::{ChannelSummary, Multiplexer, StreamSettings};
