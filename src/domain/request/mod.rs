// ============================================================================
// Request Domain - license calculation requests and their lifecycle
// ============================================================================
//
// - Value objects (RequestStatus, UsageParams, SupportCoefficient, lines)
// - Commands (RequestCommand)
// - Errors (RequestError)
// - Aggregate (LicenseRequest, RequestOperation, Transition)
// - Command handler (RequestCommandHandler, the lifecycle controller)
//
// ============================================================================

pub mod value_objects;
pub mod commands;
pub mod errors;
pub mod aggregate;
pub mod command_handler;

pub use value_objects::*;
pub use commands::*;
pub use errors::*;
pub use aggregate::*;
pub use command_handler::*;
