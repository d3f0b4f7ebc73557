#![forbid(unsafe_code)]

pub mod audit;
pub mod config;
pub mod logging;
pub mod overlay;
pub mod package;
pub mod pipeline;
pub mod repair;
pub mod repath;
pub mod scan;
pub mod source_index;
pub mod unify;
