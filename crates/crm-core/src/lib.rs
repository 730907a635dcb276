pub mod action;
pub mod config;
pub mod controller;
pub mod digest;
pub mod document;
pub mod engine;
pub mod error;
pub mod functions;
pub mod graph;
pub mod io;
pub mod key;
pub mod runtime;
pub mod simulate;
pub mod synapse;
pub mod throttle;
pub mod timer;
pub mod types;

pub use error::{CrmError, Result};
