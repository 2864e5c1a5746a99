pub mod evaluation;
pub mod graph;
pub mod merge;

pub use evaluation::*;
pub use graph::*;
pub use merge::*;
