//! Service container: installed interfaces, lifecycle, and stats monitoring.

pub mod container;
pub mod interface;
pub mod monitor;

pub use container::{Container, ErrorHooks};
pub use interface::{DefaultInterface, Interface, MethodHandler};
pub use monitor::Monitor;
