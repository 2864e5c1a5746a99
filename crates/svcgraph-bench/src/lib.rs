pub mod builder;
pub mod context;
pub mod dataset;
pub mod generators;
pub mod invariants;
pub mod pipeline;
pub mod snippet;
pub mod strategy;
pub mod task;

pub use builder::*;
pub use context::{resolve_host, ContextOracle, Corpus, MaskedRegion, Scope, Slot, SlotKind};
pub use dataset::*;
pub use invariants::{contains_token, RejectReason};
pub use pipeline::*;
pub use snippet::*;
pub use strategy::*;
pub use task::*;
