pub mod adk_adapter;
pub mod registry;

pub use registry::{AdapterSettings, FrameworkAdapter, FrameworkRegistry};
