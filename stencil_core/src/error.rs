use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum StencilError {
	#[error(transparent)]
	#[diagnostic(code(stencil::io_error))]
	Io(#[from] std::io::Error),

	#[error("this template requires a host, but none is bound to the rendering scope")]
	#[diagnostic(
		code(stencil::host_unknown),
		help("render the template for a specific host")
	)]
	HostUnknown,

	#[error("parameter `{name}` is not defined for host `{host}`")]
	#[diagnostic(
		code(stencil::host_param_undefined),
		help("use `host_param` with a default value for optional parameters")
	)]
	HostParamUndefined { name: String, host: String },

	#[error("ENC path `{path}` is undefined for host `{host}`: missing step `{step}`")]
	#[diagnostic(code(stencil::host_enc_param_undefined))]
	HostEncParamUndefined {
		path: String,
		step: String,
		host: String,
	},

	#[error("`{object_name}` is a {object_class}, but a subnet was expected")]
	#[diagnostic(code(stencil::wrong_subnet))]
	WrongSubnet {
		object_name: String,
		object_class: String,
	},

	#[error("`{object_name}` is a {object_class}, but a {expected} was expected")]
	#[diagnostic(code(stencil::wrong_entity))]
	WrongEntity {
		expected: String,
		object_name: String,
		object_class: String,
	},

	#[error("unknown host status `{status}`")]
	#[diagnostic(code(stencil::unknown_host_status), help("valid statuses: {statuses}"))]
	UnknownHostStatus { status: String, statuses: String },

	#[error("input `{0}` is not defined for this template")]
	#[diagnostic(
		code(stencil::undefined_input),
		help("declare the input on the template before referencing it")
	)]
	UndefinedInput(String),

	#[error("required input `{0}` has no value")]
	#[diagnostic(code(stencil::required_input_missing), help("pass it with `--input {0}=VALUE`"))]
	RequiredInputMissing(String),

	#[error("global setting `{0}` is not accessible in safe mode")]
	#[diagnostic(
		code(stencil::filtered_global_setting),
		help("add the setting to `allowed_global_settings` in stencil.toml")
	)]
	FilteredGlobalSettingAccessed(String),

	#[error("unknown global setting `{0}`")]
	#[diagnostic(code(stencil::unknown_global_setting))]
	UnknownGlobalSetting(String),

	#[error("invalid search syntax at offset {offset}: {reason}")]
	#[diagnostic(code(stencil::invalid_search_syntax))]
	InvalidSearchSyntax { offset: usize, reason: String },

	#[error("no permission decision for `{0}` resources")]
	#[diagnostic(
		code(stencil::missing_permission),
		help("set a required permission or opt out explicitly with `Permission::Unchecked`")
	)]
	MissingPermission(String),

	#[error("batch size must be greater than zero")]
	#[diagnostic(code(stencil::invalid_batch_size))]
	InvalidBatchSize,

	#[error("unknown association `{association}` for `{kind}` resources")]
	#[diagnostic(code(stencil::unknown_association))]
	UnknownAssociation { kind: String, association: String },

	#[error("DNS lookup for `{query}` failed: {reason}")]
	#[diagnostic(code(stencil::dns_resolution))]
	DnsResolution { query: String, reason: String },

	#[error("DNS lookup for `{query}` timed out after {timeout_ms}ms")]
	#[diagnostic(
		code(stencil::dns_timeout),
		help("increase `[dns] timeout_secs` in stencil.toml")
	)]
	DnsTimeout { query: String, timeout_ms: u128 },

	#[error("invalid MAC address: `{0}`")]
	#[diagnostic(
		code(stencil::invalid_mac_address),
		help("use six colon-separated hexadecimal octets, e.g. `00:11:22:33:44:55`")
	)]
	InvalidMacAddress(String),

	#[error("invalid URL in setting `{setting}`: {reason}")]
	#[diagnostic(code(stencil::invalid_url))]
	InvalidUrl { setting: String, reason: String },

	#[error("the rendering scope for `{0}` is closed")]
	#[diagnostic(code(stencil::scope_closed))]
	ScopeClosed(String),

	#[error("template rendering failed: {0}")]
	#[diagnostic(code(stencil::template_render))]
	TemplateRender(String),

	#[error("failed to serialize report as {format}: {reason}")]
	#[diagnostic(code(stencil::report_serialize))]
	ReportSerialize { format: String, reason: String },

	#[error("inventory store failure: {0}")]
	#[diagnostic(code(stencil::inventory_store))]
	InventoryStore(String),

	#[error("failed to parse config file: {0}")]
	#[diagnostic(
		code(stencil::config_parse),
		help("check that stencil.toml is valid TOML with optional [dns] and [report] sections")
	)]
	ConfigParse(String),

	#[error("failed to load inventory fixture `{path}`: {reason}")]
	#[diagnostic(code(stencil::fixture_parse))]
	FixtureParse { path: String, reason: String },

	#[error("unsupported fixture format: `{0}`")]
	#[diagnostic(
		code(stencil::unsupported_format),
		help("supported formats: json, yaml, yml, toml")
	)]
	UnsupportedFixtureFormat(String),
}

pub type StencilResult<T> = Result<T, StencilError>;
pub type AnyError = Box<dyn std::error::Error>;
pub type AnyEmptyResult = Result<(), AnyError>;
pub type AnyResult<T> = Result<T, AnyError>;
