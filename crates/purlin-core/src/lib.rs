pub mod checklist;
pub mod config;
pub mod critic;
pub mod directives;
pub mod drift;
pub mod error;
pub mod feature;
pub mod gate;
pub mod graph;
pub mod io;
pub mod lifecycle;
pub mod paths;
pub mod policy;
pub mod report;
pub mod traceability;
pub mod types;
pub mod vcs;

pub use error::{PurlinError, Result};
