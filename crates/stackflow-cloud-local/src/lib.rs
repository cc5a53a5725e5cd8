//! Local provider for StackFlow
//!
//! Implements `ResourceProvider` against a simulated AWS-like account kept
//! in a directory (by default `.stackflow/cloud` of the project). Ids, ARNs
//! and output attributes take the real service's shape, references between
//! objects are checked, and deleting an object that another one still uses
//! fails the way the real API does.
//!
//! # Example
//!
//! ```ignore
//! use stackflow_cloud::ResourceProvider;
//! use stackflow_cloud_local::LocalProvider;
//!
//! let provider = LocalProvider::new(".stackflow/cloud", "ap-south-1")
//!     .with_account_id("865742897250");
//!
//! let auth = provider.check_auth().await?;
//! assert!(auth.authenticated);
//! ```

pub mod account;
pub mod error;
pub mod provider;
pub mod synth;

pub use account::{AccountDocument, LocalAccount, LocalObject};
pub use error::{LocalError, Result};
pub use provider::{DEFAULT_ACCOUNT_ID, LocalProvider};
