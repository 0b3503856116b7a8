//! # usecase-runtime
//!
//! A client-side execution runtime for declarative integrations: a *profile*
//! declares named use cases with typed inputs and outputs, a provider's
//! *map* translates them into concrete HTTP calls, and this crate turns the
//! pair into a single `perform` invocation with provider selection,
//! credential resolution, input/result validation, and a per-use-case
//! failure policy (retry, backoff, circuit breaking, provider failover).
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use usecase_runtime::{PerformOptions, UseCaseRuntime};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Configuration is discovered from superface/super.json.
//!     let runtime = UseCaseRuntime::builder().build()?;
//!
//!     let result = runtime
//!         .perform(
//!             "starwars/character-information",
//!             "RetrieveCharacterInformation",
//!             serde_json::json!({"characterName": "Luke Skywalker"}),
//!             PerformOptions::default(),
//!         )
//!         .await?;
//!     println!("{result}");
//!
//!     Ok(())
//! }
//! ```
//!
//! The profile/map parser, the shape validator, and the map interpreter are
//! external collaborators plugged in through the builder; the runtime
//! consumes their parsed documents and drives the pipeline around them.

// Core modules
pub mod ast;
pub mod bind;
pub mod cache;
pub mod cancel;
pub mod config;
pub mod error;
pub mod events;
pub mod exec;
pub mod http;
pub mod interpret;
pub mod logging;
pub mod policy;
pub mod profile;
pub mod registry;
pub mod security;
pub mod time;
pub mod validate;

// Re-exports for convenience
pub use ast::{MapDocument, ProfileDocument, ProviderJson, UseCaseDefinition};
pub use bind::BoundProfileProvider;
pub use cancel::{Cancellation, CancellationSource};
pub use config::{normalize, NormalizedDocument, ProfileId, ProfileVersion, RetryPolicyConfig};
pub use error::{ErrorKind, ErrorReport, PerformError};
pub use events::{EventBus, EventFilter, FetchHook, PerformHook};
pub use exec::{PerformOptions, UseCaseRuntime, UseCaseRuntimeBuilder};
pub use http::{FetchRequest, HttpClient, HttpResponse};
pub use interpret::{InterpretParams, MapInterpreter};
pub use logging::LoggingHook;
pub use profile::{Profile, UseCase};
pub use registry::{BindRequest, BindResponse, HttpRegistryClient, RegistryClient};
pub use security::{SecurityConfiguration, SecurityScheme, SecurityValues};
pub use validate::{ValidationIssues, Validator};
