//! Process-wide registry of host status kinds.
//!
//! The sorted status list is computed on first use and never invalidated.
//! Install a custom registry with [`StatusRegistry::install_global`] before
//! the first render; afterwards the built-in registry is locked in.

use std::sync::Arc;
use std::sync::OnceLock;

/// Status kinds every installation provides.
pub const BUILTIN_STATUSES: &[&str] = &["Build", "Configuration"];

static GLOBAL_REGISTRY: OnceLock<Arc<StatusRegistry>> = OnceLock::new();

#[derive(Debug, Default)]
pub struct StatusRegistry {
	kinds: Vec<String>,
	sorted: OnceLock<Vec<String>>,
}

impl StatusRegistry {
	pub fn new<I, S>(kinds: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self {
			kinds: kinds.into_iter().map(Into::into).collect(),
			sorted: OnceLock::new(),
		}
	}

	/// The registry shared by every render in this process.
	pub fn global() -> Arc<StatusRegistry> {
		GLOBAL_REGISTRY
			.get_or_init(|| Arc::new(StatusRegistry::new(BUILTIN_STATUSES.iter().copied())))
			.clone()
	}

	/// Install the process-wide registry. Returns the rejected registry if one
	/// is already installed.
	pub fn install_global(registry: StatusRegistry) -> Result<(), Arc<StatusRegistry>> {
		GLOBAL_REGISTRY.set(Arc::new(registry))
	}

	/// Status names sorted alphabetically, without duplicates.
	pub fn sorted(&self) -> &[String] {
		self.sorted.get_or_init(|| {
			let mut names = self.kinds.clone();
			names.sort();
			names.dedup();
			names
		})
	}

	pub fn find(&self, name: &str) -> Option<&str> {
		self.sorted()
			.iter()
			.find(|kind| kind.as_str() == name)
			.map(String::as_str)
	}
}
