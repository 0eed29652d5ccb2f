//! # Lineage - FamilySearch REST client plumbing
//!
//! Lineage is the transport core of a FamilySearch API client, built on top
//! of `reqwest`. It owns the access token, retries transient failures and
//! throttled calls, and maps response bodies onto objects whose accessors can
//! be extended at runtime.
//!
//! ## Quick Start
//!
//! ```no_run
//! use lineage::{AuthGrant, Client, Environment, Kind};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), lineage::Error> {
//!     let client = Client::builder()
//!         .environment(Environment::Sandbox)
//!         .app_key("MY-APP-KEY")
//!         .timeout(Duration::from_secs(30))
//!         .build()?;
//!
//!     client
//!         .acquire_token(AuthGrant::Password {
//!             username: "user".into(),
//!             password: "secret".into(),
//!         })
//!         .await?;
//!
//!     let response = client
//!         .get("/platform/tree/persons/KWQS-BBQ", &Kind::PERSON_RESPONSE)
//!         .await?;
//!     println!("Person: {:?}", response.get("person"));
//!     println!("Request took {:?} over {} attempt(s)", response.latency, response.attempts);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Token lifecycle** - password, authorization code and interactive grants, expiry, persistence
//! - **Retry policy** - idempotent calls survive transient failures, throttled calls honor `Retry-After`
//! - **Response mapping** - raw payload kept verbatim, accessors attached per response kind
//! - **Extensible accessors** - register new accessors at runtime, they apply to every later response
//! - **Change objects** - create, update and delete with delta or full updates
//! - **Automatic logging** - structured logging with `tracing` for observability
//!
//! ## Error Handling
//!
//! Errors keep the transport detail, including the raw body of failed calls:
//!
//! ```no_run
//! use lineage::{Client, Error, Kind};
//!
//! # async fn example() -> Result<(), Error> {
//! # let client = Client::builder().build()?;
//! match client.get("/platform/users/current", &Kind::USER_RESPONSE).await {
//!     Ok(response) => println!("User: {:?}", response.get("user")),
//!     Err(Error::AuthRequired) => eprintln!("Sign in first"),
//!     Err(Error::ThrottledExhausted { attempts, throttle_hint, .. }) => {
//!         eprintln!("Still throttled after {} attempts ({:?})", attempts, throttle_hint);
//!     }
//!     Err(Error::MalformedResponse { raw_response, serde_error, .. }) => {
//!         eprintln!("Unreadable body: {} ({})", raw_response, serde_error);
//!     }
//!     Err(e) => eprintln!("Failed with status {:?}: {}", e.status(), e),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Extending responses
//!
//! ```
//! use lineage::{ConvenienceRegistry, Kind};
//!
//! let registry = ConvenienceRegistry::global();
//! registry.register(&Kind::PERSON, "is_living", |person| person.get("living").cloned());
//! assert!(registry.accessor_names(&Kind::PERSON).contains(&"is_living".to_string()));
//! ```
//!
//! ## Retries
//!
//! ```no_run
//! use lineage::{Backoff, Client};
//! use std::time::Duration;
//!
//! # fn example() -> Result<(), lineage::Error> {
//! let client = Client::builder()
//!     .max_retries(3)
//!     .backoff(Backoff::Exponential {
//!         initial: Duration::from_millis(200),
//!         max: Duration::from_secs(10),
//!         jitter: true,
//!     })
//!     .build()?;
//! # Ok(())
//! # }
//! ```

mod builtins;
mod client;
mod config;
mod environment;
mod error;
pub mod lifecycle;
pub mod mapper;
pub mod metadata;
pub mod rate_limit;
pub mod registry;
mod response;
pub mod retry;
pub mod token;
pub mod token_store;
pub mod transport;

pub use client::{AttemptEvent, AttemptObserver, Client, ClientBuilder, FS_JSON};
pub use config::Config;
pub use environment::Environment;
pub use error::{Error, Result};
pub use lifecycle::{ChangeObject, DeleteOptions, Endpoint, LifecycleState, SaveOptions, UpdateMode};
pub use mapper::{MappedObject, ResponseMapper};
pub use rate_limit::{ThrottleConfig, ThrottleHint};
pub use registry::{Accessor, ConvenienceRegistry, Kind};
pub use response::{MappedResponse, Response};
pub use retry::{Backoff, RetryPolicy};
pub use token::{AccessToken, AuthGrant, InteractiveFlow, TokenManager, TokenSource};
pub use token_store::{FileTokenStore, MemoryTokenStore, TokenStore};
