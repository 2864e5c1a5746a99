pub mod address;
pub mod code_scan;
pub mod collector;
pub mod contract;
pub mod file_collect;
pub mod language;
pub mod manifest;
pub mod scanner;

pub use address::*;
pub use code_scan::*;
pub use collector::*;
pub use contract::*;
pub use file_collect::*;
pub use language::*;
pub use manifest::{scan_compose, scan_dockerfile, scan_kubernetes, ManifestKind, ManifestScanner};
pub use scanner::*;
