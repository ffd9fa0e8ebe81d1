//! Core domain for the Git webhook proxy.
//!
//! This crate contains every domain concept shared by the proxy: the raw
//! repository locator extracted from a webhook, the canonical mirror key it is
//! normalised into, the error taxonomy, and the [`MirrorStore`] port that the
//! infrastructure layer implements. Infrastructure crates implement the traits
//! defined here; they never add domain rules.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//! It defines *what* is needed; infrastructure crates define *how* to supply it.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`RepositoryLocator`, `CanonicalMirrorKey`, `RequestId`) |
//! | [`locator`] | Locator normalisation (`canonicalize`) and HTTP→SCP locator conversion |
//! | [`store`] | The [`MirrorStore`] port and [`MirrorOperation`] |
//! | [`errors`] | Parse, store, and mirror-sync error types |

pub mod errors;
pub mod identifiers;
pub mod locator;
pub mod store;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use errors::{MirrorSyncError, ParseError, StoreError};
pub use identifiers::{CanonicalMirrorKey, RepositoryLocator, RequestId};
pub use locator::{canonicalize, scp_locator_from_http};
pub use store::{MirrorOperation, MirrorStore};
