//! Authorized, filtered, batched access to inventory collections.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::Authorizer;
use crate::InventoryStore;
use crate::Principal;
use crate::Record;
use crate::ResourceKind;
use crate::Scope;
use crate::SearchQuery;
use crate::StencilError;
use crate::StencilResult;

/// Row cap applied in preview mode when the caller does not set a limit.
pub const PREVIEW_LIMIT: usize = 10;
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Authorization decision attached to every query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Permission {
	/// Only rows the principal holds this permission for are returned.
	Required(String),
	/// Explicit opt-out. Every row is returned.
	Unchecked,
}

impl Permission {
	pub fn required(name: impl Into<String>) -> Self {
		Self::Required(name.into())
	}
}

/// What a loader call asks for. Built by the loader macros from template
/// keyword arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceQuerySpec {
	pub kind: ResourceKind,
	pub search: String,
	pub includes: Vec<String>,
	pub preload: Vec<String>,
	pub joins: Vec<String>,
	pub select: Vec<String>,
	pub permission: Option<Permission>,
	pub limit: Option<usize>,
	pub batch_size: usize,
}

impl ResourceQuerySpec {
	pub fn new(kind: ResourceKind) -> Self {
		Self {
			kind,
			search: String::new(),
			includes: Vec::new(),
			preload: Vec::new(),
			joins: Vec::new(),
			select: Vec::new(),
			permission: None,
			limit: None,
			batch_size: DEFAULT_BATCH_SIZE,
		}
	}

	#[must_use]
	pub fn search(mut self, search: impl Into<String>) -> Self {
		self.search = search.into();
		self
	}

	#[must_use]
	pub fn includes<I, S>(mut self, associations: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.includes = associations.into_iter().map(Into::into).collect();
		self
	}

	#[must_use]
	pub fn preload<I, S>(mut self, associations: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.preload = associations.into_iter().map(Into::into).collect();
		self
	}

	#[must_use]
	pub fn joins<I, S>(mut self, associations: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.joins = associations.into_iter().map(Into::into).collect();
		self
	}

	#[must_use]
	pub fn select<I, S>(mut self, columns: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.select = columns.into_iter().map(Into::into).collect();
		self
	}

	#[must_use]
	pub fn permission(mut self, permission: Permission) -> Self {
		self.permission = Some(permission);
		self
	}

	#[must_use]
	pub fn limit(mut self, limit: usize) -> Self {
		self.limit = Some(limit);
		self
	}

	#[must_use]
	pub fn batch_size(mut self, batch_size: usize) -> Self {
		self.batch_size = batch_size;
		self
	}
}

/// Row visibility check for one principal and permission.
#[derive(Clone)]
pub struct AuthorizationFilter {
	pub principal: Principal,
	pub permission: String,
	authorizer: Arc<dyn Authorizer>,
}

impl fmt::Debug for AuthorizationFilter {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("AuthorizationFilter")
			.field("principal", &self.principal)
			.field("permission", &self.permission)
			.finish_non_exhaustive()
	}
}

impl AuthorizationFilter {
	pub fn allows(&self, record: &Record) -> bool {
		self.authorizer
			.can_view(&self.principal, &self.permission, record)
	}
}

/// A validated query handed to [`InventoryStore::fetch_batch`].
#[derive(Debug, Clone)]
pub struct QueryPlan {
	pub kind: ResourceKind,
	pub search: SearchQuery,
	/// `includes` and `preload` merged, in request order, without duplicates.
	pub prefetch: Vec<String>,
	/// Associations available to the predicate and projection but not
	/// attached to returned rows.
	pub joins: Vec<String>,
	/// `None` when the query opted out of authorization.
	pub authorization: Option<AuthorizationFilter>,
	/// Selected columns. Empty keeps every column.
	pub projection: Vec<String>,
	/// Effective limit after preview defaults.
	pub limit: Option<usize>,
	pub batch_size: usize,
}

impl QueryPlan {
	/// Whether a fully loaded row passes the predicate and authorization.
	pub fn matches(&self, record: &Record) -> bool {
		self.search.matches(record)
			&& self
				.authorization
				.as_ref()
				.is_none_or(|filter| filter.allows(record))
	}
}

/// Validate `spec` and return a lazy cursor over its batches. Nothing is
/// fetched until the cursor is pulled.
pub fn load(
	scope: &Scope,
	store: Arc<dyn InventoryStore>,
	authorizer: Arc<dyn Authorizer>,
	spec: ResourceQuerySpec,
) -> StencilResult<BatchCursor> {
	let permission = spec
		.permission
		.ok_or_else(|| StencilError::MissingPermission(spec.kind.to_string()))?;

	if spec.batch_size == 0 {
		return Err(StencilError::InvalidBatchSize);
	}

	let mut prefetch: Vec<String> = Vec::new();
	for association in spec.includes.iter().chain(&spec.preload) {
		check_association(spec.kind, association)?;
		if !prefetch.contains(association) {
			prefetch.push(association.clone());
		}
	}
	for association in &spec.joins {
		check_association(spec.kind, association)?;
	}

	let search = SearchQuery::parse(&spec.search)?;
	let authorization = match permission {
		Permission::Required(permission) => {
			Some(AuthorizationFilter {
				principal: scope.principal().clone(),
				permission,
				authorizer,
			})
		}
		Permission::Unchecked => None,
	};

	let limit = match spec.limit {
		Some(limit) => Some(limit),
		None if scope.is_preview() => Some(PREVIEW_LIMIT),
		None => None,
	};

	let plan = QueryPlan {
		kind: spec.kind,
		search,
		prefetch,
		joins: spec.joins,
		authorization,
		projection: spec.select,
		limit,
		batch_size: spec.batch_size,
	};

	debug!(
		kind = %plan.kind,
		search = %spec.search,
		limit = ?plan.limit,
		batch_size = plan.batch_size,
		"planned resource query"
	);

	Ok(BatchCursor::new(store, plan))
}

fn check_association(kind: ResourceKind, association: &str) -> StencilResult<()> {
	if kind.association(association).is_some() {
		return Ok(());
	}

	Err(StencilError::UnknownAssociation {
		kind: kind.to_string(),
		association: association.to_string(),
	})
}

/// Forward-only, lazy iterator of record batches. Consumed once.
pub struct BatchCursor {
	store: Arc<dyn InventoryStore>,
	plan: QueryPlan,
	after: Option<u64>,
	remaining: Option<usize>,
	done: bool,
}

impl fmt::Debug for BatchCursor {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("BatchCursor")
			.field("plan", &self.plan)
			.field("after", &self.after)
			.field("remaining", &self.remaining)
			.field("done", &self.done)
			.finish_non_exhaustive()
	}
}

impl BatchCursor {
	fn new(store: Arc<dyn InventoryStore>, plan: QueryPlan) -> Self {
		let remaining = plan.limit;
		Self {
			store,
			plan,
			after: None,
			remaining,
			done: false,
		}
	}

	pub fn plan(&self) -> &QueryPlan {
		&self.plan
	}

	/// Flatten batches into single records.
	pub fn records(self) -> Records {
		Records {
			cursor: self,
			current: Vec::new().into_iter(),
		}
	}
}

impl Iterator for BatchCursor {
	type Item = StencilResult<Vec<Record>>;

	fn next(&mut self) -> Option<Self::Item> {
		if self.done {
			return None;
		}

		let size = self
			.remaining
			.map_or(self.plan.batch_size, |remaining| remaining.min(self.plan.batch_size));
		if size == 0 {
			self.done = true;
			return None;
		}

		let mut batch = match self.store.fetch_batch(&self.plan, self.after, size) {
			Ok(batch) => batch,
			Err(error) => {
				self.done = true;
				return Some(Err(error));
			}
		};
		batch.truncate(size);

		debug!(
			kind = %self.plan.kind,
			after = ?self.after,
			requested = size,
			received = batch.len(),
			"fetched batch"
		);

		if batch.len() < size {
			self.done = true;
		}

		let last = batch.last()?;
		self.after = Some(last.id);
		if let Some(remaining) = self.remaining.as_mut() {
			*remaining -= batch.len();
		}

		Some(Ok(batch))
	}
}

/// Record-at-a-time view over a [`BatchCursor`].
#[derive(Debug)]
pub struct Records {
	cursor: BatchCursor,
	current: std::vec::IntoIter<Record>,
}

impl Iterator for Records {
	type Item = StencilResult<Record>;

	fn next(&mut self) -> Option<Self::Item> {
		loop {
			if let Some(record) = self.current.next() {
				return Some(Ok(record));
			}

			match self.cursor.next()? {
				Ok(batch) => self.current = batch.into_iter(),
				Err(error) => return Some(Err(error)),
			}
		}
	}
}

/// One loader macro: name, resource kind and the permission it checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderEntry {
	pub macro_name: &'static str,
	pub kind: ResourceKind,
	pub permission: &'static str,
}

pub const LOADERS: &[LoaderEntry] = &[
	LoaderEntry {
		macro_name: "load_hosts",
		kind: ResourceKind::Host,
		permission: "view_hosts",
	},
	LoaderEntry {
		macro_name: "load_organizations",
		kind: ResourceKind::Organization,
		permission: "view_organizations",
	},
	LoaderEntry {
		macro_name: "load_locations",
		kind: ResourceKind::Location,
		permission: "view_locations",
	},
	LoaderEntry {
		macro_name: "load_operating_systems",
		kind: ResourceKind::OperatingSystem,
		permission: "view_operatingsystems",
	},
	LoaderEntry {
		macro_name: "load_subnets",
		kind: ResourceKind::Subnet,
		permission: "view_subnets",
	},
	LoaderEntry {
		macro_name: "load_smart_proxies",
		kind: ResourceKind::SmartProxy,
		permission: "view_smart_proxies",
	},
	LoaderEntry {
		macro_name: "load_user_groups",
		kind: ResourceKind::UserGroup,
		permission: "view_usergroups",
	},
	LoaderEntry {
		macro_name: "load_host_groups",
		kind: ResourceKind::HostGroup,
		permission: "view_hostgroups",
	},
	LoaderEntry {
		macro_name: "load_domains",
		kind: ResourceKind::Domain,
		permission: "view_domains",
	},
	LoaderEntry {
		macro_name: "load_realms",
		kind: ResourceKind::Realm,
		permission: "view_realms",
	},
	LoaderEntry {
		macro_name: "load_users",
		kind: ResourceKind::User,
		permission: "view_users",
	},
];

impl LoaderEntry {
	pub fn spec(&self) -> ResourceQuerySpec {
		ResourceQuerySpec::new(self.kind).permission(Permission::required(self.permission))
	}
}
