//! Client core for a Drupal Services REST endpoint.
//!
//! # Overview
//! Mirrors remote resources (content records, user accounts) as typed
//! entities with a load/save/remove lifecycle, manages the authenticated
//! session, and optionally persists responses or entities in a local
//! key-value store.
//!
//! # Design
//! - `ServicesClient` builds `HttpRequest` values and parses `HttpResponse`
//!   values without touching the network. A `Transport` performs the actual
//!   round-trip, so the whole lifecycle can run against a scripted
//!   `RecordingTransport`.
//! - `Services` is the explicit context passed to every operation: config,
//!   transport, persistence and the current session.
//! - Public operations never return errors. Failures are logged through
//!   `tracing` and reported as `None`.
//!
//! ```no_run
//! use drupal_services::prelude::*;
//! use drupal_services::{Entity, Node, Services, ServicesConfig};
//!
//! # async fn run() {
//! let services = Services::new(ServicesConfig::new("https://example.com/rest"));
//! let mut node = Entity::<Node>::with_id("42");
//! if node.load(&services).await.is_some() {
//!     node.title.push_str(" (edited)");
//!     node.save(&services).await;
//! }
//! # }
//! ```

pub mod cache;
pub mod client;
pub mod config;
pub mod cookie;
pub mod entity;
pub mod error;
pub mod http;
pub mod locator;
pub mod query;
pub mod services;
pub mod session;
pub mod store;
pub mod transport;
pub mod types;

pub use cache::{CacheStrategy, Clock, ManualClock, SystemClock};
pub use client::ServicesClient;
pub use config::ServicesConfig;
pub use cookie::{Cookie, CookieJar, CookieOptions};
pub use entity::{Entity, EntityState, Fetched, Loadable, Loaded, Removable, Resource, Saveable};
pub use error::{ApiError, StoreError};
pub use http::{HttpMethod, HttpRequest, HttpResponse, ResponseEncoding};
pub use locator::{Locate, ResourceLocator, Target};
pub use query::{Query, QueryStyle};
pub use services::{Api, Services, ServicesBuilder};
pub use session::{Credentials, Session, SessionContext, SessionManager};
pub use store::{FileStore, KeyValueStore, MemoryStore};
pub use transport::{HttpTransport, LoadingIndicator, RecordingTransport, Transport};
pub use types::{EntityId, Node, User};

/// The lifecycle capability traits.
pub mod prelude {
    pub use crate::entity::{Loadable, Removable, Saveable};
}
