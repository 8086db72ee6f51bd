//! Attribute pipeline.
//!
//! Turns a directory record into the attribute values a real SP would pass
//! to the application, through one pluggable record filter.

pub mod filter;
pub mod pipeline;

pub use filter::filter_by_name;
pub use pipeline::{AttributePipeline, PreparedAttributes};
