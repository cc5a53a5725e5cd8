//! StackFlow convergence engine
//!
//! Turns a stack instance into converged remote state through a
//! `ResourceProvider`, recording what it did in a `StateStore`.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                  StackFlow CLI                   │
//! │             (stack plan/up/destroy)              │
//! └─────────────────┬───────────────────────────────┘
//!                   │ StackInstance
//! ┌─────────────────▼───────────────────────────────┐
//! │                stackflow-cloud                   │
//! │  ┌──────────┐ ┌────────────┐ ┌──────────────┐   │
//! │  │  Graph   │ │ Reconciler │ │   Resolver   │   │
//! │  │ schedule │ │  (digests) │ │ refs/secrets │   │
//! │  └──────────┘ └────────────┘ └──────────────┘   │
//! │  ┌──────────────────────┐ ┌──────────────────┐  │
//! │  │ trait ResourceProvider│ │ trait StateStore │  │
//! │  └──────────────────────┘ └──────────────────┘  │
//! └───────┬──────────────────────────┬──────────────┘
//!         │                          │
//! ┌───────▼───────────┐   ┌──────────▼───────────┐
//! │ stackflow-cloud-  │   │ .stackflow/state/    │
//! │ local (simulated) │   │ {project}-{stack}    │
//! └───────────────────┘   └──────────────────────┘
//! ```

pub mod action;
pub mod digest;
pub mod engine;
pub mod error;
pub mod graph;
pub mod provider;
pub mod reconciler;
pub mod resolver;
pub mod state;

// Re-exports
pub use action::{
    Action, ActionType, ApplyResult, ApplyStatus, NodeOutcome, NodeReport, Plan, PlanSummary,
};
pub use digest::{InputDigest, PropertyDigest};
pub use engine::{CancelHandle, Engine, RefreshReport};
pub use error::{CloudError, ProviderError, ProviderErrorKind, Result};
pub use graph::ResourceGraph;
pub use provider::{
    AuthStatus, ProviderResult, RemoteObject, ResourceProvider, ResourceRequest, RetryConfig,
    Retryable,
};
pub use reconciler::{Decision, Desired, reconcile};
pub use resolver::{OutputTable, ResolveMode, Resolver, SecretContext, ensure_secret_properties};
pub use state::{
    DeposedObject, FileStateStore, MemoryStateStore, RemoteState, ResourceState, StateLock,
    StateStore,
};
