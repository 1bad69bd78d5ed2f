use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::Value as JsonValue;
use serde_json::json;

use super::*;

pub const ADMIN: &str = "admin";
pub const VIEWER: &str = "viewer";

pub fn host_facet() -> HostFixture {
	let mut params = BTreeMap::new();
	params.insert("ntp_server".to_string(), json!("ntp.example.com"));
	params.insert("enable_epel".to_string(), json!("yes"));
	params.insert("use_proxy".to_string(), json!("off"));
	params.insert("disabled_flag".to_string(), json!(false));
	params.insert("empty_param".to_string(), JsonValue::Null);

	let mut statuses = BTreeMap::new();
	statuses.insert(
		"Build".to_string(),
		HostStatus {
			code: 0,
			label: "Installed".to_string(),
		},
	);

	HostFixture {
		params,
		puppetclasses: vec!["ntp".to_string(), "motd".to_string()],
		root_pass: Some("$5$salt$hash".to_string()),
		grub_pass: Some("$6$salt$grub".to_string()),
		enc: Some(json!({
			"parameters": {
				"owner_email": "root@example.com",
				"foreman_interfaces": [{ "identifier": "eth0", "ip": "10.0.0.1" }],
			},
			"classes": ["ntp"],
		})),
		kernel_release: Some("6.1.0".to_string()),
		uptime_seconds: Some(3600),
		statuses,
		pxe_kernel_options: vec!["nomodeset".to_string(), "quiet".to_string()],
		memory: Some(4096),
		sockets: Some(1),
		cores: Some(4),
		is_virtual: Some(true),
		..HostFixture::default()
	}
}

/// Two hosts, one subnet, one host group and a small directory.
pub fn inventory() -> MemoryInventory {
	let mut inventory = MemoryInventory::new();
	inventory.grant_admin(ADMIN);
	inventory.grant(VIEWER, &["view_hosts"]);

	for (id, name, ip, facet) in [
		(1, "web1.example.com", "10.0.0.1", host_facet()),
		(2, "db1.example.com", "10.0.0.2", HostFixture::default()),
	] {
		let mut fields = BTreeMap::new();
		fields.insert("ip".to_string(), json!(ip));
		let host: Arc<dyn HostEntity> = Arc::new(MemoryHost::new(name, fields, facet));
		inventory.insert(
			Record::new(id, ResourceKind::Host, name)
				.with_field("ip", ip)
				.with_host(host),
		);
		inventory.link(ResourceKind::Host, id, "subnet", vec![10]);
	}

	inventory.insert(
		Record::new(10, ResourceKind::Subnet, "web")
			.with_field("network", "10.0.0.0")
			.with_parameter("mtu", 9000),
	);
	inventory.insert(Record::new(20, ResourceKind::HostGroup, "base").with_field("title", "base/web"));

	inventory.set_setting(
		"foreman_url",
		Setting::new("https://foreman.example.com", SettingType::String),
	);
	inventory.set_setting(
		"unattended_url",
		Setting::new("http://foreman.example.com:8000", SettingType::String),
	);
	inventory.set_setting("administrator", Setting::new("", SettingType::String));
	inventory.set_setting("dns_timeout", Setting::new(json!([]), SettingType::Array));
	inventory.set_setting("root_pass", Setting::new("changeme", SettingType::String));
	inventory.set_setting("safemode_render", Setting::new(false, SettingType::Boolean));
	inventory.add_plugin("remote_execution");
	inventory.add_dns_entry("web1.example.com", IpAddr::from([10, 0, 0, 1]));

	inventory
}

/// `count` hosts with ids `1..=count`, visible to [`ADMIN`].
pub fn bulk_inventory(count: u64) -> MemoryInventory {
	let mut inventory = MemoryInventory::new();
	inventory.grant_admin(ADMIN);
	for id in 1..=count {
		inventory.insert(Record::new(id, ResourceKind::Host, format!("host-{id:05}")));
	}
	inventory
}

pub fn statuses() -> Arc<StatusRegistry> {
	Arc::new(StatusRegistry::new(["Configuration", "Build", "Execution"]))
}

pub fn renderer_for(inventory: MemoryInventory) -> (Arc<MemoryInventory>, Renderer) {
	renderer_with_config(inventory, StencilConfig::default())
}

pub fn renderer_with_config(
	inventory: MemoryInventory,
	config: StencilConfig,
) -> (Arc<MemoryInventory>, Renderer) {
	let inventory = Arc::new(inventory);
	let renderer = Renderer::new(inventory.collaborators(statuses()), config);
	(inventory, renderer)
}

pub fn admin_request() -> RenderRequest {
	RenderRequest::new(Principal::new(ADMIN))
}

/// A request bound to `web1.example.com`.
pub fn host_request(inventory: &MemoryInventory) -> RenderRequest {
	let host = inventory.host("web1.example.com");
	let request = admin_request();
	match host {
		Some(host) => request.with_host(host),
		None => request,
	}
}

pub fn bound_scope(inventory: &MemoryInventory) -> Scope {
	Scope::bind(
		RenderMode::Normal,
		Principal::new(ADMIN),
		inventory.host("web1.example.com"),
	)
}

pub fn macro_context(inventory: MemoryInventory, scope: Scope) -> MacroContext {
	let inventory = Arc::new(inventory);
	MacroContext::new(
		Arc::new(scope),
		inventory.collaborators(statuses()),
		Arc::new(StencilConfig::default()),
	)
}

pub fn render(renderer: &Renderer, source: &str, request: RenderRequest) -> StencilResult<String> {
	let template = Template::new("test", source);
	renderer.render(&template, request).map(|output| output.text)
}

pub fn render_report(
	renderer: &Renderer,
	source: &str,
	request: RenderRequest,
) -> StencilResult<RenderOutput> {
	let template = Template::new("Host report", source).with_kind(TemplateKind::Report);
	renderer.render(&template, request)
}

pub fn row(pairs: &[(&str, &str)]) -> Vec<(String, ReportCell)> {
	pairs
		.iter()
		.map(|(key, value)| ((*key).to_string(), ReportCell::from(*value)))
		.collect()
}

/// Resolver that answers after `delay`.
pub struct SlowResolver {
	pub delay: Duration,
}

impl DnsResolver for SlowResolver {
	fn reverse(&self, _address: IpAddr) -> Result<String, BoxError> {
		thread::sleep(self.delay);
		Ok("slow.example.com".to_string())
	}

	fn forward(&self, _name: &str) -> Result<IpAddr, BoxError> {
		thread::sleep(self.delay);
		Ok(IpAddr::from([127, 0, 0, 1]))
	}
}

/// Store whose every batch fails.
pub struct FailingStore;

impl InventoryStore for FailingStore {
	fn fetch_batch(
		&self,
		_plan: &QueryPlan,
		_after: Option<u64>,
		_size: usize,
	) -> StencilResult<Vec<Record>> {
		Err(StencilError::InventoryStore("connection reset".to_string()))
	}
}

pub const YAML_FIXTURE: &str = r#"
principals:
  admin: { admin: true }
  viewer: { permissions: [view_hosts] }
settings:
  foreman_url: { value: "https://foreman.example.com", type: string }
plugins: [remote_execution]
statuses: [Build, Configuration]
dns:
  - { name: web1.example.com, address: 10.0.0.1 }
records:
  hosts:
    - id: 1
      name: web1.example.com
      fields: { ip: 10.0.0.1 }
      associations: { subnet: [10] }
      host:
        params: { ntp_server: ntp.example.com }
        virtual: false
  subnets:
    - { id: 10, name: web, parameters: { mtu: 9000 } }
"#;
