//! The operations a template can call. Each validates its own arguments and
//! fails with a specific [`StencilError`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::warn;
use url::Url;

use crate::Authorizer;
use crate::BatchCursor;
use crate::DnsResolver;
use crate::Entity;
use crate::HostEntity;
use crate::InventoryStore;
use crate::PluginRegistry;
use crate::Record;
use crate::ReportCell;
use crate::ReportFormat;
use crate::ResourceKind;
use crate::ResourceQuerySpec;
use crate::Scope;
use crate::SettingType;
use crate::SettingsProvider;
use crate::StatusRegistry;
use crate::StencilConfig;
use crate::StencilError;
use crate::StencilResult;
use crate::TemplateInput;
use crate::dns::PendingLookups;
use crate::dns::lookup_with_timeout;
use crate::inputs::resolve_input;
use crate::loader;
use crate::names;

/// Setting holding the base URL of unattended template links.
pub const UNATTENDED_URL_SETTING: &str = "unattended_url";
/// Setting holding the public URL of the management server.
pub const SERVER_URL_SETTING: &str = "foreman_url";

/// External services a render reads from.
#[derive(Clone)]
pub struct Collaborators {
	pub store: Arc<dyn InventoryStore>,
	pub authorizer: Arc<dyn Authorizer>,
	pub settings: Arc<dyn SettingsProvider>,
	pub plugins: Arc<dyn PluginRegistry>,
	pub resolver: Arc<dyn DnsResolver>,
	pub statuses: Arc<StatusRegistry>,
}

impl fmt::Debug for Collaborators {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Collaborators")
			.field("statuses", &self.statuses)
			.finish_non_exhaustive()
	}
}

/// Everything the macro surface of one render can reach.
#[derive(Debug)]
pub struct MacroContext {
	scope: Arc<Scope>,
	collaborators: Collaborators,
	config: Arc<StencilConfig>,
	inputs: Vec<TemplateInput>,
	user_values: BTreeMap<String, String>,
	report_format: Option<ReportFormat>,
	lookups: PendingLookups,
}

impl MacroContext {
	pub fn new(scope: Arc<Scope>, collaborators: Collaborators, config: Arc<StencilConfig>) -> Self {
		Self {
			scope,
			collaborators,
			config,
			inputs: Vec::new(),
			user_values: BTreeMap::new(),
			report_format: None,
			lookups: PendingLookups::default(),
		}
	}

	#[must_use]
	pub fn with_inputs(
		mut self,
		inputs: Vec<TemplateInput>,
		user_values: BTreeMap<String, String>,
	) -> Self {
		self.inputs = inputs;
		self.user_values = user_values;
		self
	}

	#[must_use]
	pub fn with_report_format(mut self, format: Option<ReportFormat>) -> Self {
		self.report_format = format;
		self
	}

	pub fn scope(&self) -> &Arc<Scope> {
		&self.scope
	}

	pub fn global_setting(
		&self,
		name: &str,
		default: Option<JsonValue>,
	) -> StencilResult<Option<JsonValue>> {
		if self.scope.safemode() && !self.config.allows_global_setting(name) {
			return Err(StencilError::FilteredGlobalSettingAccessed(name.to_string()));
		}

		let setting = self
			.collaborators
			.settings
			.setting(name)
			.ok_or_else(|| StencilError::UnknownGlobalSetting(name.to_string()))?;

		if setting.kind != SettingType::Boolean && setting.is_blank() {
			return Ok(default);
		}

		Ok(Some(setting.value))
	}

	pub fn plugin_present(&self, name: &str) -> bool {
		self.collaborators.plugins.is_present(name)
	}

	/// A parameter set directly on the subnet, without inheritance.
	pub fn subnet_param(
		&self,
		subnet: Option<&Entity>,
		name: &str,
	) -> StencilResult<Option<JsonValue>> {
		Ok(validate_subnet(subnet)?.parameter(name).cloned())
	}

	pub fn subnet_has_param(&self, subnet: Option<&Entity>, name: &str) -> StencilResult<bool> {
		Ok(validate_subnet(subnet)?.parameter(name).is_some())
	}

	pub fn all_host_statuses(&self) -> &[String] {
		self.collaborators.statuses.sorted()
	}

	/// Status name to numeric status for every registered status kind.
	pub fn all_host_statuses_hash(
		&self,
		host: Option<&Entity>,
	) -> StencilResult<BTreeMap<String, Option<i64>>> {
		let host = require_entity_host(host)?;
		Ok(self
			.all_host_statuses()
			.iter()
			.map(|name| (name.clone(), host.status(name).map(|status| status.code)))
			.collect())
	}

	pub fn host_status(&self, host: Option<&Entity>, name: &str) -> StencilResult<Option<String>> {
		let registry = &self.collaborators.statuses;
		let Some(status) = registry.find(name) else {
			return Err(StencilError::UnknownHostStatus {
				status: name.to_string(),
				statuses: registry.sorted().join(","),
			});
		};

		let host = require_entity_host(host)?;
		Ok(host.status(status).map(|status| status.label))
	}

	/// Kernel options for PXE boot. Derivation failures are logged and
	/// render as an empty string.
	pub fn pxe_kernel_options(&self) -> String {
		let Some(host) = self.scope.host() else {
			return String::new();
		};

		match host.pxe_kernel_options() {
			Ok(options) => options.join(" "),
			Err(error) => {
				warn!(host = host.name(), %error, "unable to build PXE kernel options");
				String::new()
			}
		}
	}

	pub fn dns_lookup(&self, query: &str) -> StencilResult<String> {
		lookup_with_timeout(
			self.collaborators.resolver.clone(),
			query,
			self.config.dns.timeout(),
			&self.lookups,
		)
	}

	/// `<scheme>://<host>[:<port>]/unattended/template/<template>/<hostgroup>`
	/// on the server named by the `unattended_url` setting.
	pub fn default_template_url(&self, template: &str, hostgroup: &str) -> StencilResult<String> {
		let mut url = self.setting_url(UNATTENDED_URL_SETTING)?;
		url.set_query(None);
		url.set_fragment(None);
		url.path_segments_mut()
			.map_err(|()| {
				StencilError::InvalidUrl {
					setting: UNATTENDED_URL_SETTING.to_string(),
					reason: "the URL cannot be a base".to_string(),
				}
			})?
			.clear()
			.extend(["unattended", "template", template, hostgroup]);

		Ok(url.to_string())
	}

	pub fn foreman_server_url(&self) -> StencilResult<String> {
		let setting = self
			.collaborators
			.settings
			.setting(SERVER_URL_SETTING)
			.ok_or_else(|| StencilError::UnknownGlobalSetting(SERVER_URL_SETTING.to_string()))?;

		Ok(match setting.value {
			JsonValue::String(value) => value,
			other => other.to_string(),
		})
	}

	pub fn foreman_server_fqdn(&self) -> StencilResult<Option<String>> {
		let url = self.setting_url(SERVER_URL_SETTING)?;
		Ok(url.host_str().map(ToString::to_string))
	}

	fn setting_url(&self, setting: &str) -> StencilResult<Url> {
		let value = self
			.collaborators
			.settings
			.setting(setting)
			.ok_or_else(|| StencilError::UnknownGlobalSetting(setting.to_string()))?;
		let text = value.value.as_str().unwrap_or_default();

		Url::parse(text).map_err(|error| {
			StencilError::InvalidUrl {
				setting: setting.to_string(),
				reason: error.to_string(),
			}
		})
	}

	pub fn preview(&self) -> bool {
		self.scope.is_preview()
	}

	pub fn template_name(&self) -> &str {
		self.scope.template_name()
	}

	/// The report format requested for this render, if any.
	pub fn report_format(&self) -> Option<ReportFormat> {
		self.report_format
	}

	pub fn host_kernel_release(&self, host: Option<&Entity>) -> StencilResult<Option<String>> {
		Ok(optional_host(host)?.and_then(|host| host.kernel_release()))
	}

	pub fn host_uptime_seconds(&self, host: Option<&Entity>) -> StencilResult<Option<u64>> {
		Ok(optional_host(host)?.and_then(|host| host.uptime_seconds()))
	}

	pub fn host_memory(&self, host: Option<&Entity>) -> StencilResult<Option<u64>> {
		Ok(optional_host(host)?.and_then(|host| host.memory()))
	}

	pub fn host_sockets(&self, host: Option<&Entity>) -> StencilResult<Option<u64>> {
		Ok(optional_host(host)?.and_then(|host| host.sockets()))
	}

	pub fn host_cores(&self, host: Option<&Entity>) -> StencilResult<Option<u64>> {
		Ok(optional_host(host)?.and_then(|host| host.cores()))
	}

	pub fn host_virtual(&self, host: Option<&Entity>) -> StencilResult<Option<bool>> {
		Ok(optional_host(host)?.and_then(|host| host.is_virtual()))
	}

	pub fn input(&self, name: &str) -> StencilResult<JsonValue> {
		resolve_input(&self.scope, &self.inputs, &self.user_values, name)
	}

	pub fn load(&self, spec: ResourceQuerySpec) -> StencilResult<BatchCursor> {
		loader::load(
			&self.scope,
			self.collaborators.store.clone(),
			self.collaborators.authorizer.clone(),
			spec,
		)
	}

	pub fn report_headers(&self, labels: Vec<String>) -> StencilResult<()> {
		self.scope.with_report(|report| report.set_headers(labels))
	}

	pub fn report_row(&self, row: Vec<(String, ReportCell)>) -> StencilResult<()> {
		self.scope.with_report(|report| report.add_row(row))
	}

	/// Serialize the report buffer. `format` falls back to the requested
	/// format, then to the configured default.
	pub fn report_render(&self, format: Option<&str>) -> StencilResult<String> {
		let report = self.scope.with_report(|report| report.clone())?;
		let title = self.scope.template_name();
		match format {
			Some(tag) => report.render_tag(tag, title),
			None => {
				let format = self
					.report_format
					.unwrap_or(self.config.report.default_format);
				report.render(format, title)
			}
		}
	}
}

fn validate_subnet(entity: Option<&Entity>) -> StencilResult<&Record> {
	match entity {
		Some(Entity::Record(record)) if record.kind == ResourceKind::Subnet => Ok(record),
		Some(other) => {
			Err(StencilError::WrongSubnet {
				object_name: other.name().to_string(),
				object_class: other.class_name().to_string(),
			})
		}
		None => {
			Err(StencilError::WrongSubnet {
				object_name: String::new(),
				object_class: "none".to_string(),
			})
		}
	}
}

fn require_entity_host(entity: Option<&Entity>) -> StencilResult<&Arc<dyn HostEntity>> {
	optional_host(entity)?.ok_or(StencilError::HostUnknown)
}

/// The host facet of `entity`. An absent entity stays absent; an entity of
/// another kind is an error.
fn optional_host(entity: Option<&Entity>) -> StencilResult<Option<&Arc<dyn HostEntity>>> {
	let Some(entity) = entity else {
		return Ok(None);
	};

	entity.host().map(Some).ok_or_else(|| {
		StencilError::WrongEntity {
			expected: ResourceKind::Host.class_name().to_string(),
			object_name: entity.name().to_string(),
			object_class: entity.class_name().to_string(),
		}
	})
}

/// Prefix every line of `text` with `count` spaces, keeping line
/// terminators. No prefix follows a final terminator.
pub fn indent(count: usize, text: &str, skip_first_line: bool) -> String {
	let prefix = " ".repeat(count);
	let mut output = String::with_capacity(text.len());
	for (index, line) in text.split_inclusive('\n').enumerate() {
		if index > 0 || !skip_first_line {
			output.push_str(&prefix);
		}
		output.push_str(line);
	}

	output
}

/// Shell snippet writing `content` to `path` with a heredoc.
pub fn save_to_file(path: &str, content: &str) -> String {
	format!("cat << EOF > {path}\n{content}EOF")
}

pub fn rand_hex(n: usize) -> String {
	names::random_hex(n)
}

pub fn rand_name() -> String {
	names::random_name()
}

pub fn mac_name(mac_address: &str) -> StencilResult<String> {
	names::mac_name(mac_address)
}
