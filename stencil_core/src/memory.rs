//! Reference inventory held in memory and loaded from a fixture document.
//!
//! ```yaml
//! principals:
//!   admin: { admin: true }
//!   viewer: { permissions: [view_hosts] }
//! settings:
//!   foreman_url: { value: "https://foreman.example.com", type: string }
//! records:
//!   hosts:
//!     - id: 1
//!       name: web1.example.com
//!       fields: { ip: 10.0.0.1 }
//!       associations: { subnet: [10] }
//!       host: { params: { ntp_server: ntp.example.com } }
//!   subnets:
//!     - { id: 10, name: web, parameters: { mtu: 9000 } }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::Authorizer;
use crate::BoxError;
use crate::Collaborators;
use crate::DnsResolver;
use crate::HostEntity;
use crate::HostStatus;
use crate::InventoryStore;
use crate::PluginRegistry;
use crate::Principal;
use crate::QueryPlan;
use crate::Record;
use crate::ResourceKind;
use crate::Setting;
use crate::SettingsProvider;
use crate::StatusRegistry;
use crate::StencilError;
use crate::StencilResult;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PrincipalFixture {
	/// Administrators pass every permission check.
	pub admin: bool,
	pub permissions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DnsEntry {
	pub name: String,
	pub address: IpAddr,
}

/// Host facet of a host record.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HostFixture {
	/// Effective parameters after inheritance.
	pub params: BTreeMap<String, JsonValue>,
	pub puppetclasses: Vec<String>,
	pub root_pass: Option<String>,
	pub grub_pass: Option<String>,
	/// ENC document. Defaults to `{ parameters, classes }` built from
	/// `params` and `puppetclasses`.
	pub enc: Option<JsonValue>,
	pub kernel_release: Option<String>,
	pub uptime_seconds: Option<u64>,
	pub facts: BTreeMap<String, JsonValue>,
	pub statuses: BTreeMap<String, HostStatus>,
	pub pxe_kernel_options: Vec<String>,
	/// Makes PXE kernel option derivation fail with this message.
	pub pxe_error: Option<String>,
	pub memory: Option<u64>,
	pub sockets: Option<u64>,
	pub cores: Option<u64>,
	#[serde(rename = "virtual")]
	pub is_virtual: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordFixture {
	pub id: u64,
	pub name: String,
	#[serde(default)]
	pub fields: BTreeMap<String, JsonValue>,
	#[serde(default)]
	pub parameters: BTreeMap<String, JsonValue>,
	/// Association name to the ids of related records.
	#[serde(default)]
	pub associations: BTreeMap<String, Vec<u64>>,
	#[serde(default)]
	pub host: Option<HostFixture>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct InventoryFixture {
	pub principals: BTreeMap<String, PrincipalFixture>,
	pub settings: BTreeMap<String, Setting>,
	pub plugins: Vec<String>,
	/// Registered host status kinds. Empty means the built-in kinds.
	pub statuses: Vec<String>,
	pub dns: Vec<DnsEntry>,
	/// Records keyed by collection tag, e.g. `hosts` or `host_groups`.
	pub records: BTreeMap<String, Vec<RecordFixture>>,
}

/// A host built from a [`HostFixture`].
#[derive(Debug, Clone)]
pub struct MemoryHost {
	name: String,
	fields: BTreeMap<String, JsonValue>,
	facet: HostFixture,
}

impl MemoryHost {
	pub fn new(
		name: impl Into<String>,
		fields: BTreeMap<String, JsonValue>,
		facet: HostFixture,
	) -> Self {
		Self {
			name: name.into(),
			fields,
			facet,
		}
	}
}

impl HostEntity for MemoryHost {
	fn name(&self) -> &str {
		&self.name
	}

	fn host_param(&self, name: &str) -> Option<JsonValue> {
		self.facet.params.get(name).cloned()
	}

	fn params(&self) -> BTreeMap<String, JsonValue> {
		self.facet.params.clone()
	}

	fn puppetclasses(&self) -> Vec<String> {
		self.facet.puppetclasses.clone()
	}

	fn root_pass(&self) -> Option<String> {
		self.facet.root_pass.clone()
	}

	fn grub_pass(&self) -> Option<String> {
		self.facet.grub_pass.clone()
	}

	fn info(&self) -> JsonValue {
		if let Some(enc) = &self.facet.enc {
			return enc.clone();
		}

		serde_json::json!({
			"parameters": self.facet.params,
			"classes": self.facet.puppetclasses,
		})
	}

	fn kernel_release(&self) -> Option<String> {
		self.facet.kernel_release.clone()
	}

	fn uptime_seconds(&self) -> Option<u64> {
		self.facet.uptime_seconds
	}

	fn fact(&self, name: &str) -> Option<JsonValue> {
		self.facet.facts.get(name).cloned()
	}

	fn status(&self, status_name: &str) -> Option<HostStatus> {
		self.facet.statuses.get(status_name).cloned()
	}

	fn pxe_kernel_options(&self) -> Result<Vec<String>, BoxError> {
		match &self.facet.pxe_error {
			Some(message) => Err(message.clone().into()),
			None => Ok(self.facet.pxe_kernel_options.clone()),
		}
	}

	fn attribute(&self, key: &str) -> Option<JsonValue> {
		if key == "name" {
			return Some(JsonValue::String(self.name.clone()));
		}
		self.fields.get(key).cloned()
	}

	fn memory(&self) -> Option<u64> {
		self.facet.memory
	}

	fn sockets(&self) -> Option<u64> {
		self.facet.sockets
	}

	fn cores(&self) -> Option<u64> {
		self.facet.cores
	}

	fn is_virtual(&self) -> Option<bool> {
		self.facet.is_virtual
	}
}

/// In-memory implementation of every collaborator a render reads from.
#[derive(Debug, Default)]
pub struct MemoryInventory {
	principals: BTreeMap<String, PrincipalFixture>,
	settings: BTreeMap<String, Setting>,
	plugins: Vec<String>,
	statuses: Vec<String>,
	dns: Vec<DnsEntry>,
	/// Records per kind, in id order.
	records: BTreeMap<ResourceKind, Vec<Record>>,
	/// Raw association ids per record.
	links: BTreeMap<(ResourceKind, u64), BTreeMap<String, Vec<u64>>>,
	fetches: AtomicUsize,
}

impl MemoryInventory {
	pub fn new() -> Self {
		Self::default()
	}

	/// Load a fixture, choosing the parser from the file extension.
	pub fn from_path(path: &Path) -> StencilResult<Self> {
		let content = fs::read_to_string(path)?;
		let format = path
			.extension()
			.and_then(|ext| ext.to_str())
			.unwrap_or_default();

		Self::from_str(&content, format, &path.display().to_string())
	}

	/// Parse fixture `content` in `format` (`json`, `yaml`, `yml` or `toml`).
	pub fn from_str(content: &str, format: &str, path_display: &str) -> StencilResult<Self> {
		let fixture_error = |reason: String| {
			StencilError::FixtureParse {
				path: path_display.to_string(),
				reason,
			}
		};

		let fixture: InventoryFixture = match format {
			"json" => serde_json::from_str(content).map_err(|e| fixture_error(e.to_string()))?,
			"yaml" | "yml" => {
				serde_yaml_ng::from_str(content).map_err(|e| fixture_error(e.to_string()))?
			}
			"toml" => toml::from_str(content).map_err(|e| fixture_error(e.to_string()))?,
			other => return Err(StencilError::UnsupportedFixtureFormat(other.to_string())),
		};

		Self::from_fixture(fixture).map_err(fixture_error)
	}

	pub fn from_fixture(fixture: InventoryFixture) -> Result<Self, String> {
		let mut inventory = Self {
			principals: fixture.principals,
			settings: fixture.settings,
			plugins: fixture.plugins,
			statuses: fixture.statuses,
			dns: fixture.dns,
			..Self::default()
		};

		for (tag, records) in fixture.records {
			let kind = ResourceKind::ALL
				.into_iter()
				.find(|kind| kind.tag() == tag)
				.ok_or_else(|| format!("unknown record collection `{tag}`"))?;

			for record in records {
				inventory.insert_fixture(kind, record);
			}
		}

		Ok(inventory)
	}

	fn insert_fixture(&mut self, kind: ResourceKind, fixture: RecordFixture) {
		let mut record = Record::new(fixture.id, kind, fixture.name);
		record.fields = fixture.fields;
		record.parameters = fixture.parameters;
		if kind == ResourceKind::Host {
			let facet = fixture.host.unwrap_or_default();
			let host: Arc<dyn HostEntity> =
				Arc::new(MemoryHost::new(record.name.clone(), record.fields.clone(), facet));
			record.host = Some(host);
		}

		self.links.insert((kind, record.id), fixture.associations);
		self.insert(record);
	}

	/// Add a record, keeping id order. Replaces a record with the same id.
	pub fn insert(&mut self, record: Record) {
		let records = self.records.entry(record.kind).or_default();
		match records.binary_search_by_key(&record.id, |existing| existing.id) {
			Ok(index) => records[index] = record,
			Err(index) => records.insert(index, record),
		}
	}

	/// Link `record` of `kind` to `targets` through `association`.
	pub fn link(&mut self, kind: ResourceKind, id: u64, association: &str, targets: Vec<u64>) {
		self.links
			.entry((kind, id))
			.or_default()
			.insert(association.to_string(), targets);
	}

	pub fn grant(&mut self, principal: &str, permissions: &[&str]) {
		let entry = self.principals.entry(principal.to_string()).or_default();
		entry
			.permissions
			.extend(permissions.iter().map(ToString::to_string));
	}

	pub fn grant_admin(&mut self, principal: &str) {
		self.principals.entry(principal.to_string()).or_default().admin = true;
	}

	pub fn set_setting(&mut self, name: &str, setting: Setting) {
		self.settings.insert(name.to_string(), setting);
	}

	pub fn add_plugin(&mut self, name: &str) {
		self.plugins.push(name.to_string());
	}

	pub fn add_dns_entry(&mut self, name: &str, address: IpAddr) {
		self.dns.push(DnsEntry {
			name: name.to_string(),
			address,
		});
	}

	/// Registered status kinds, if the fixture declares any.
	pub fn status_registry(&self) -> Option<StatusRegistry> {
		if self.statuses.is_empty() {
			return None;
		}
		Some(StatusRegistry::new(self.statuses.iter().cloned()))
	}

	/// Host facet of the host record named `name`.
	pub fn host(&self, name: &str) -> Option<Arc<dyn HostEntity>> {
		self.records
			.get(&ResourceKind::Host)?
			.iter()
			.find(|record| record.name == name)
			.and_then(|record| record.host.clone())
	}

	pub fn records(&self, kind: ResourceKind) -> &[Record] {
		self.records.get(&kind).map_or(&[], Vec::as_slice)
	}

	/// Number of batches served so far.
	pub fn fetch_count(&self) -> usize {
		self.fetches.load(Ordering::Relaxed)
	}

	/// Bundle this inventory as every collaborator of a renderer.
	pub fn collaborators(self: &Arc<Self>, statuses: Arc<StatusRegistry>) -> Collaborators {
		Collaborators {
			store: self.clone(),
			authorizer: self.clone(),
			settings: self.clone(),
			plugins: self.clone(),
			resolver: self.clone(),
			statuses,
		}
	}

	fn related(&self, kind: ResourceKind, id: u64, association: &str) -> Vec<Record> {
		let Some(target) = kind
			.association(association)
			.and_then(|association| association.target)
		else {
			return Vec::new();
		};
		let Some(ids) = self
			.links
			.get(&(kind, id))
			.and_then(|links| links.get(association))
		else {
			return Vec::new();
		};

		let candidates = self.records(target);
		ids.iter()
			.filter_map(|id| {
				candidates
					.binary_search_by_key(id, |record| record.id)
					.ok()
					.map(|index| candidates[index].clone())
			})
			.collect()
	}
}

impl InventoryStore for MemoryInventory {
	fn fetch_batch(
		&self,
		plan: &QueryPlan,
		after: Option<u64>,
		size: usize,
	) -> StencilResult<Vec<Record>> {
		self.fetches.fetch_add(1, Ordering::Relaxed);

		let mut batch = Vec::with_capacity(size);
		for stored in self.records(plan.kind) {
			if batch.len() == size {
				break;
			}
			if after.is_some_and(|after| stored.id <= after) {
				continue;
			}

			let mut record = stored.clone();
			for association in plan.prefetch.iter().chain(&plan.joins) {
				let related = self.related(plan.kind, record.id, association);
				record.associations.insert(association.clone(), related);
			}

			if !plan.matches(&record) {
				continue;
			}

			if !plan.projection.is_empty() {
				record.project(&plan.projection);
			}
			for association in &plan.joins {
				if !plan.prefetch.contains(association) {
					record.associations.remove(association);
				}
			}

			batch.push(record);
		}

		Ok(batch)
	}
}

impl Authorizer for MemoryInventory {
	fn can_view(&self, principal: &Principal, permission: &str, _record: &Record) -> bool {
		self.principals
			.get(principal.as_str())
			.is_some_and(|entry| entry.admin || entry.permissions.iter().any(|p| p == permission))
	}
}

impl SettingsProvider for MemoryInventory {
	fn setting(&self, name: &str) -> Option<Setting> {
		self.settings.get(name).cloned()
	}
}

impl PluginRegistry for MemoryInventory {
	fn is_present(&self, name: &str) -> bool {
		self.plugins.iter().any(|plugin| plugin == name)
	}
}

impl DnsResolver for MemoryInventory {
	fn reverse(&self, address: IpAddr) -> Result<String, BoxError> {
		self.dns
			.iter()
			.find(|entry| entry.address == address)
			.map(|entry| entry.name.clone())
			.ok_or_else(|| format!("no PTR record for {address}").into())
	}

	fn forward(&self, name: &str) -> Result<IpAddr, BoxError> {
		self.dns
			.iter()
			.find(|entry| entry.name == name)
			.map(|entry| entry.address)
			.ok_or_else(|| format!("no address record for {name}").into())
	}
}
