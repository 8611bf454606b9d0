mod stage;
mod tracker;

pub use stage::{ProcessingStage, UnknownStage};
pub use tracker::StageTracker;
