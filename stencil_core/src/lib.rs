//! `stencil_core` renders provisioning scripts and tabular reports from
//! infrastructure inventory, exposing only a curated macro surface to
//! template authors.
//!
//! ## Pipeline
//!
//! ```text
//! RenderRequest + Template
//!   → Scope (one per render: mode, principal, bound host, caches, report buffer)
//!   → minijinja Environment (macro surface, loader macros, report macros)
//!   → Resource loader (search → prefetch → authorization → projection → limit → batches)
//!   → Report builder (csv | txt | yaml | json | html)
//! ```
//!
//! ## Modules
//!
//! - [`config`] loads `stencil.toml`.
//! - [`search`] parses the query language accepted by the loader macros.
//! - [`loader`] plans authorized, batched queries against an [`InventoryStore`].
//! - [`host`] reads parameters and the ENC document of the bound host.
//! - [`report`] accumulates rows and serializes them.
//! - [`memory`] is an in-memory inventory loaded from JSON, YAML or TOML.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use stencil_core::MemoryInventory;
//! use stencil_core::Principal;
//! use stencil_core::RenderRequest;
//! use stencil_core::Renderer;
//! use stencil_core::StatusRegistry;
//! use stencil_core::StencilConfig;
//! use stencil_core::Template;
//!
//! let inventory = Arc::new(MemoryInventory::from_path(Path::new("inventory.yaml")).unwrap());
//! let renderer = Renderer::new(
//! 	inventory.collaborators(StatusRegistry::global()),
//! 	StencilConfig::default(),
//! );
//!
//! let template = Template::new("motd", "Hosts: {% for h in load_hosts() %}{{ h.name }} {% endfor %}");
//! let output = renderer
//! 	.render(&template, RenderRequest::new(Principal::new("admin")))
//! 	.unwrap();
//! println!("{}", output.text);
//! ```

pub use config::*;
pub use dns::*;
pub use error::*;
pub use host::EncStep;
pub use inputs::*;
pub use inventory::*;
pub use loader::*;
pub use macros::Collaborators;
pub use macros::MacroContext;
pub use memory::*;
pub use objects::*;
pub use renderer::*;
pub use report::*;
pub use scope::*;
pub use search::*;
pub use statuses::*;

pub mod config;
pub mod dns;
#[allow(unused_assignments)]
mod error;
pub mod host;
mod inputs;
mod inventory;
pub mod loader;
pub mod macros;
pub mod memory;
pub mod names;
mod objects;
mod renderer;
pub mod report;
mod scope;
pub mod search;
mod statuses;

#[cfg(test)]
mod __fixtures;
