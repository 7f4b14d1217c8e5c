// crates/core/src/lib.rs
pub mod artifacts;
pub mod config;
pub mod error;
pub mod temp_config;
pub mod tool;
pub mod types;

pub use artifacts::*;
pub use config::*;
pub use error::*;
pub use temp_config::*;
pub use tool::*;
pub use types::*;
