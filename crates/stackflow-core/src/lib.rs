//! StackFlow core
//!
//! Resource model, resource-type catalog, secret handle validation, KDL
//! parsing and per-stack template instantiation. Nothing in this crate talks
//! to a provider.

pub mod builder;
pub mod catalog;
pub mod error;
pub mod loader;
pub mod model;
pub mod params;
pub mod parser;
pub mod secret;
pub mod template;

pub use builder::StackBuilder;
pub use catalog::{Catalog, Mutability, PropertyKind, PropertySchema, ResourceSchema};
pub use error::{FlowError, Result};
pub use loader::{LoadedProject, load_project, project_root_of};
pub use model::*;
pub use params::{Cidr, validate_namespaces, validate_parameters};
pub use parser::{parse_project, parse_project_file, parse_template};
pub use template::{TemplateProcessor, Variables, instantiate, instantiate_file, stack_variables};
