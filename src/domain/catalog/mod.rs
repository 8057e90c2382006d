// ============================================================================
// Catalog Domain - license service definitions
// ============================================================================

pub mod value_objects;
pub mod errors;
pub mod service;

pub use value_objects::*;
pub use errors::*;
pub use service::*;
