extern crate serde;
extern crate serde_json;

extern crate itertools;
#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate tracing;
extern crate tracing_subscriber;
extern crate uuid;

pub mod abstract_source;
pub mod config;
pub mod error;
pub mod hierarchy;
pub mod logging;
pub mod pipeline;

pub use error::{HierarchyError, Result};
