//! Hardware access
//!
//! Resource string parsing, backends that enumerate and open resources, and
//! the [`ResourceManager`] the instrument wrappers are constructed from.

pub mod address;
pub mod backend;
pub mod manager;

pub use address::{serial_resource_name, ResourceAddress};
pub use backend::{Backend, MockBackend, SystemBackend};
pub use manager::ResourceManager;
