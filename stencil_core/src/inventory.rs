//! Read-only contracts for the collaborators a render consumes: the inventory
//! store, the entities it returns, authorization, settings and plugins.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use derive_more::Deref;
use derive_more::Display;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::StencilResult;
use crate::loader::QueryPlan;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Identity under which a template is rendered. Every authorization check
/// made by the resource loader is made for this principal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deref, Display, Deserialize)]
#[serde(transparent)]
pub struct Principal(String);

impl Principal {
	pub fn new(login: impl Into<String>) -> Self {
		Self(login.into())
	}
}

/// Resource types reachable through the loader macros.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
	Host,
	Organization,
	Location,
	OperatingSystem,
	Subnet,
	SmartProxy,
	UserGroup,
	HostGroup,
	Domain,
	Realm,
	User,
}

/// A named association from one resource kind to related data. Associations
/// with a `target` resolve to records of that kind; the rest are embedded
/// data already carried in the record's fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Association {
	pub name: &'static str,
	pub target: Option<ResourceKind>,
	/// Whether the association holds a collection rather than one record.
	pub many: bool,
}

const fn linked(name: &'static str, target: ResourceKind) -> Association {
	Association {
		name,
		target: Some(target),
		many: false,
	}
}

const fn linked_many(name: &'static str, target: ResourceKind) -> Association {
	Association {
		name,
		target: Some(target),
		many: true,
	}
}

const fn embedded(name: &'static str) -> Association {
	Association {
		name,
		target: None,
		many: false,
	}
}

const HOST_ASSOCIATIONS: &[Association] = &[
	linked("domain", ResourceKind::Domain),
	linked("subnet", ResourceKind::Subnet),
	linked("subnet6", ResourceKind::Subnet),
	linked("hostgroup", ResourceKind::HostGroup),
	linked("operatingsystem", ResourceKind::OperatingSystem),
	linked("organization", ResourceKind::Organization),
	linked("location", ResourceKind::Location),
	linked("realm", ResourceKind::Realm),
	linked("owner", ResourceKind::User),
	linked("puppet_proxy", ResourceKind::SmartProxy),
	embedded("interfaces"),
	embedded("puppetclasses"),
	embedded("host_statuses"),
	embedded("fact_names"),
	embedded("kernel_release"),
];

const SUBNET_ASSOCIATIONS: &[Association] = &[
	linked_many("domains", ResourceKind::Domain),
	linked_many("organizations", ResourceKind::Organization),
	linked_many("locations", ResourceKind::Location),
	linked("dhcp", ResourceKind::SmartProxy),
	linked("tftp", ResourceKind::SmartProxy),
	linked("dns", ResourceKind::SmartProxy),
];

const HOST_GROUP_ASSOCIATIONS: &[Association] = &[
	linked("parent", ResourceKind::HostGroup),
	linked("domain", ResourceKind::Domain),
	linked("subnet", ResourceKind::Subnet),
	linked("operatingsystem", ResourceKind::OperatingSystem),
	linked_many("organizations", ResourceKind::Organization),
	linked_many("locations", ResourceKind::Location),
	embedded("puppetclasses"),
];

const DOMAIN_ASSOCIATIONS: &[Association] = &[
	linked_many("subnets", ResourceKind::Subnet),
	linked("dns", ResourceKind::SmartProxy),
];

const USER_ASSOCIATIONS: &[Association] = &[
	linked_many("usergroups", ResourceKind::UserGroup),
	linked_many("organizations", ResourceKind::Organization),
	linked_many("locations", ResourceKind::Location),
	embedded("roles"),
	embedded("ssh_keys"),
];

const USER_GROUP_ASSOCIATIONS: &[Association] = &[linked_many("users", ResourceKind::User)];

const TAXONOMY_ASSOCIATIONS: &[Association] = &[
	linked("parent", ResourceKind::Location),
	linked_many("domains", ResourceKind::Domain),
	linked_many("subnets", ResourceKind::Subnet),
];

const ORGANIZATION_ASSOCIATIONS: &[Association] = &[
	linked("parent", ResourceKind::Organization),
	linked_many("domains", ResourceKind::Domain),
	linked_many("subnets", ResourceKind::Subnet),
];

const OPERATING_SYSTEM_ASSOCIATIONS: &[Association] = &[embedded("media"), embedded("architectures")];

const REALM_ASSOCIATIONS: &[Association] = &[linked("realm_proxy", ResourceKind::SmartProxy)];

const SMART_PROXY_ASSOCIATIONS: &[Association] = &[embedded("features")];

impl ResourceKind {
	pub const ALL: [ResourceKind; 11] = [
		ResourceKind::Host,
		ResourceKind::Organization,
		ResourceKind::Location,
		ResourceKind::OperatingSystem,
		ResourceKind::Subnet,
		ResourceKind::SmartProxy,
		ResourceKind::UserGroup,
		ResourceKind::HostGroup,
		ResourceKind::Domain,
		ResourceKind::Realm,
		ResourceKind::User,
	];

	/// Collection tag, also used as the fixture section name.
	pub fn tag(self) -> &'static str {
		match self {
			Self::Host => "hosts",
			Self::Organization => "organizations",
			Self::Location => "locations",
			Self::OperatingSystem => "operating_systems",
			Self::Subnet => "subnets",
			Self::SmartProxy => "smart_proxies",
			Self::UserGroup => "user_groups",
			Self::HostGroup => "host_groups",
			Self::Domain => "domains",
			Self::Realm => "realms",
			Self::User => "users",
		}
	}

	/// Entity class name, as reported in wrong-kind errors.
	pub fn class_name(self) -> &'static str {
		match self {
			Self::Host => "Host",
			Self::Organization => "Organization",
			Self::Location => "Location",
			Self::OperatingSystem => "Operatingsystem",
			Self::Subnet => "Subnet",
			Self::SmartProxy => "SmartProxy",
			Self::UserGroup => "Usergroup",
			Self::HostGroup => "Hostgroup",
			Self::Domain => "Domain",
			Self::Realm => "Realm",
			Self::User => "User",
		}
	}

	pub fn associations(self) -> &'static [Association] {
		match self {
			Self::Host => HOST_ASSOCIATIONS,
			Self::Organization => ORGANIZATION_ASSOCIATIONS,
			Self::Location => TAXONOMY_ASSOCIATIONS,
			Self::OperatingSystem => OPERATING_SYSTEM_ASSOCIATIONS,
			Self::Subnet => SUBNET_ASSOCIATIONS,
			Self::SmartProxy => SMART_PROXY_ASSOCIATIONS,
			Self::UserGroup => USER_GROUP_ASSOCIATIONS,
			Self::HostGroup => HOST_GROUP_ASSOCIATIONS,
			Self::Domain => DOMAIN_ASSOCIATIONS,
			Self::Realm => REALM_ASSOCIATIONS,
			Self::User => USER_ASSOCIATIONS,
		}
	}

	pub fn association(self, name: &str) -> Option<&'static Association> {
		self.associations().iter().find(|a| a.name == name)
	}
}

impl fmt::Display for ResourceKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.tag())
	}
}

/// One entity row produced by the resource loader.
#[derive(Clone)]
pub struct Record {
	pub id: u64,
	pub kind: ResourceKind,
	pub name: String,
	/// Column values, possibly narrowed by a `select` projection. Columns
	/// taken from joined associations are keyed `association.column`.
	pub fields: BTreeMap<String, JsonValue>,
	/// Parameters assigned directly to this entity (no inheritance).
	pub parameters: BTreeMap<String, JsonValue>,
	/// Associations loaded through `includes`/`preload`.
	pub associations: BTreeMap<String, Vec<Record>>,
	/// Host facet for rows of kind [`ResourceKind::Host`].
	pub host: Option<Arc<dyn HostEntity>>,
}

impl fmt::Debug for Record {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Record")
			.field("id", &self.id)
			.field("kind", &self.kind)
			.field("name", &self.name)
			.field("fields", &self.fields)
			.field("parameters", &self.parameters)
			.field("associations", &self.associations)
			.finish_non_exhaustive()
	}
}

impl Record {
	pub fn new(id: u64, kind: ResourceKind, name: impl Into<String>) -> Self {
		Self {
			id,
			kind,
			name: name.into(),
			fields: BTreeMap::new(),
			parameters: BTreeMap::new(),
			associations: BTreeMap::new(),
			host: None,
		}
	}

	#[must_use]
	pub fn with_field(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
		self.fields.insert(key.into(), value.into());
		self
	}

	#[must_use]
	pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
		self.parameters.insert(key.into(), value.into());
		self
	}

	#[must_use]
	pub fn with_host(mut self, host: Arc<dyn HostEntity>) -> Self {
		self.host = Some(host);
		self
	}

	/// Look up a column. `id` and `name` are always present; dotted keys
	/// reach into loaded associations when no projected column matches.
	pub fn attribute(&self, key: &str) -> Option<JsonValue> {
		match key {
			"id" => return Some(JsonValue::from(self.id)),
			"name" => return Some(JsonValue::from(self.name.clone())),
			_ => {}
		}

		if let Some(value) = self.fields.get(key) {
			return Some(value.clone());
		}

		let (association, column) = key.split_once('.')?;
		let related = self.associations.get(association)?;
		match related.as_slice() {
			[single] => single.attribute(column),
			many => {
				let values: Vec<JsonValue> =
					many.iter().filter_map(|r| r.attribute(column)).collect();
				Some(JsonValue::Array(values))
			}
		}
	}

	/// A parameter set directly on this entity.
	pub fn parameter(&self, name: &str) -> Option<&JsonValue> {
		self.parameters.get(name)
	}

	/// Keep only the selected columns. `id` and `name` always survive.
	pub fn project(&mut self, columns: &[String]) {
		let mut projected = BTreeMap::new();
		for column in columns {
			if column == "id" || column == "name" {
				continue;
			}
			if let Some(value) = self.attribute(column) {
				projected.insert(column.clone(), value);
			}
		}
		self.fields = projected;
	}
}

/// A host status value: numeric code plus human readable label.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HostStatus {
	pub code: i64,
	pub label: String,
}

/// Accessors the host facet needs from a host entity. Inherited parameter
/// resolution happens behind [`HostEntity::host_param`].
pub trait HostEntity: Send + Sync + fmt::Debug {
	fn name(&self) -> &str;
	/// Inherited parameter value, resolved by the inventory model.
	fn host_param(&self, name: &str) -> Option<JsonValue>;
	/// All parameters visible to the host, keyed by name, with raw values.
	fn params(&self) -> BTreeMap<String, JsonValue>;
	fn puppetclasses(&self) -> Vec<String>;
	fn root_pass(&self) -> Option<String>;
	fn grub_pass(&self) -> Option<String>;
	/// The ENC document for this host.
	fn info(&self) -> JsonValue;
	fn kernel_release(&self) -> Option<String>;
	fn uptime_seconds(&self) -> Option<u64>;
	fn fact(&self, name: &str) -> Option<JsonValue>;
	fn status(&self, status_name: &str) -> Option<HostStatus>;
	fn pxe_kernel_options(&self) -> Result<Vec<String>, BoxError>;
	/// A plain attribute such as `ip`, `mac` or `domain_name`.
	fn attribute(&self, key: &str) -> Option<JsonValue>;

	fn memory(&self) -> Option<u64> {
		None
	}

	fn sockets(&self) -> Option<u64> {
		None
	}

	fn cores(&self) -> Option<u64> {
		None
	}

	fn is_virtual(&self) -> Option<bool> {
		None
	}
}

/// Decides row visibility for the authorization step of the loader.
pub trait Authorizer: Send + Sync {
	fn can_view(&self, principal: &Principal, permission: &str, record: &Record) -> bool;
}

/// Read-only query contract of the persistence layer. Implementations return
/// up to `size` rows of `plan.kind` with ids greater than `after`, in id
/// order, filtered by the plan's predicate and authorization, with prefetch
/// directives resolved and projection applied.
pub trait InventoryStore: Send + Sync {
	fn fetch_batch(
		&self,
		plan: &QueryPlan,
		after: Option<u64>,
		size: usize,
	) -> StencilResult<Vec<Record>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingType {
	Boolean,
	Integer,
	String,
	Array,
	Hash,
}

/// A stored global setting and its declared type.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Setting {
	pub value: JsonValue,
	#[serde(rename = "type")]
	pub kind: SettingType,
}

impl Setting {
	pub fn new(value: impl Into<JsonValue>, kind: SettingType) -> Self {
		Self {
			value: value.into(),
			kind,
		}
	}

	/// Whether the stored value counts as unset.
	pub fn is_blank(&self) -> bool {
		match &self.value {
			JsonValue::Null => true,
			JsonValue::String(s) => s.trim().is_empty(),
			JsonValue::Array(items) => items.is_empty(),
			JsonValue::Object(map) => map.is_empty(),
			JsonValue::Bool(b) => !b,
			JsonValue::Number(_) => false,
		}
	}
}

pub trait SettingsProvider: Send + Sync {
	fn setting(&self, name: &str) -> Option<Setting>;
}

pub trait PluginRegistry: Send + Sync {
	fn is_present(&self, name: &str) -> bool;
}
