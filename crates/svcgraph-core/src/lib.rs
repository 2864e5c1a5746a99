pub mod annotation;
pub mod config_manager;
pub mod edge;
pub mod error;
pub mod node;
pub mod scan;
pub mod traits;
pub mod types;

pub use annotation::*;
pub use config_manager::*;
pub use edge::*;
pub use error::*;
pub use node::*;
pub use scan::*;
pub use traits::*;
pub use types::*;
