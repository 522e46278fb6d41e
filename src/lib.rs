pub mod callback;
pub mod defaultlogger;
pub mod logging;
pub mod utils;

pub mod build;
pub mod catalog;
pub mod config;
pub mod elements;
pub mod linker;
pub mod partition;
pub mod pbfformat;
pub mod pilestore;
pub mod resolve;

pub use build::{run_build, BuildReport};
pub use config::BuildOptions;
pub use utils::{Error, Result};
