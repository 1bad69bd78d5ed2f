use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::ReportFormat;
use crate::StencilError;
use crate::StencilResult;

/// Supported config file locations in discovery order (highest precedence
/// first).
pub const CONFIG_FILE_CANDIDATES: [&str; 3] =
	["stencil.toml", ".stencil.toml", ".config/stencil.toml"];

/// Default DNS lookup timeout in seconds.
pub const DEFAULT_DNS_TIMEOUT_SECS: u64 = 5;

/// Global settings that templates may read while safe mode rendering is
/// enabled, unless `allowed_global_settings` overrides the list.
pub const DEFAULT_ALLOWED_GLOBAL_SETTINGS: &[&str] = &[
	"administrator",
	"dns_timeout",
	"foreman_url",
	"host_power_status",
	"ignore_puppet_facts_for_provisioning",
	"manage_puppetca",
	"outofsync_interval",
	"puppet_interval",
	"root_pass",
	"ssl_ca_file",
	"token_duration",
	"unattended_url",
	"update_ip_from_built_request",
	"use_shortname_for_vms",
];

/// Configuration loaded from a `stencil.toml` file.
///
/// ```toml
/// safemode_render = true
/// allowed_global_settings = ["foreman_url", "unattended_url"]
///
/// [dns]
/// timeout_secs = 5
///
/// [report]
/// default_format = "csv"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct StencilConfig {
	/// Restrict `global_setting` to the allow-list below.
	#[serde(default = "default_safemode_render")]
	pub safemode_render: bool,
	/// Setting names readable from templates in safe mode.
	#[serde(default = "default_allowed_global_settings")]
	pub allowed_global_settings: Vec<String>,
	#[serde(default)]
	pub dns: DnsConfig,
	#[serde(default)]
	pub report: ReportConfig,
}

impl Default for StencilConfig {
	fn default() -> Self {
		Self {
			safemode_render: default_safemode_render(),
			allowed_global_settings: default_allowed_global_settings(),
			dns: DnsConfig::default(),
			report: ReportConfig::default(),
		}
	}
}

/// `[dns]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct DnsConfig {
	/// Upper bound for a single `dns_lookup` call.
	#[serde(default = "default_dns_timeout_secs")]
	pub timeout_secs: u64,
}

impl DnsConfig {
	pub fn timeout(&self) -> Duration {
		Duration::from_secs(self.timeout_secs)
	}
}

impl Default for DnsConfig {
	fn default() -> Self {
		Self {
			timeout_secs: default_dns_timeout_secs(),
		}
	}
}

/// `[report]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportConfig {
	/// Format used by `report_render()` when neither the template nor the
	/// render request picks one.
	#[serde(default)]
	pub default_format: ReportFormat,
}

fn default_safemode_render() -> bool {
	true
}

fn default_allowed_global_settings() -> Vec<String> {
	DEFAULT_ALLOWED_GLOBAL_SETTINGS
		.iter()
		.map(ToString::to_string)
		.collect()
}

fn default_dns_timeout_secs() -> u64 {
	DEFAULT_DNS_TIMEOUT_SECS
}

impl StencilConfig {
	/// Resolve the config path from known discovery candidates.
	#[must_use]
	pub fn resolve_path(root: &Path) -> Option<PathBuf> {
		CONFIG_FILE_CANDIDATES
			.iter()
			.map(|candidate| root.join(candidate))
			.find(|path| path.is_file())
	}

	/// Load the config from the first discovered config file at `root`.
	/// Returns `None` if no config file exists.
	pub fn load(root: &Path) -> StencilResult<Option<StencilConfig>> {
		let Some(config_path) = Self::resolve_path(root) else {
			return Ok(None);
		};

		Self::from_file(&config_path).map(Some)
	}

	/// Parse an explicit config file.
	pub fn from_file(path: &Path) -> StencilResult<StencilConfig> {
		let content = std::fs::read_to_string(path)?;
		Self::from_toml(&content)
	}

	pub fn from_toml(content: &str) -> StencilResult<StencilConfig> {
		toml::from_str(content).map_err(|e| StencilError::ConfigParse(e.to_string()))
	}

	/// Whether `name` may be read through `global_setting` in safe mode.
	pub fn allows_global_setting(&self, name: &str) -> bool {
		self.allowed_global_settings.iter().any(|allowed| allowed == name)
	}
}
