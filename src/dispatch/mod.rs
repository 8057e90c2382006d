// ============================================================================
// Cost Dispatcher - outbound pricing tasks and inbound results
// ============================================================================

pub mod actor;
pub mod auth;
pub mod ingest;
pub mod pricer;
pub mod task;

pub use actor::{DispatchActor, DispatchBatch, DispatchStats, GetDispatchStats};
pub use auth::{Authenticator, CallbackTarget, SharedSecretAuthenticator, CALLBACK_KEY_HEADER};
pub use ingest::CallbackIngestor;
pub use pricer::{DispatchError, HttpPricer, Pricer};
pub use task::{PricingTask, TaskFactory};
