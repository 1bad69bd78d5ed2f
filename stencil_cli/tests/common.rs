use assert_cmd::Command;
use insta_cmd::get_cargo_bin;

pub fn stencil_cmd() -> Command {
	let mut cmd = Command::new(get_cargo_bin("stencil"));
	cmd.env("NO_COLOR", "1");
	cmd.env_remove("STENCIL_LOG");
	cmd.env_remove("STENCIL_PRINCIPAL");
	cmd
}

pub const INVENTORY: &str = r#"
principals:
  admin: { admin: true }
  viewer: { permissions: [view_hosts] }
settings:
  foreman_url: { value: "https://foreman.example.com", type: string }
  unattended_url: { value: "http://foreman.example.com:8000", type: string }
  safemode_render: { value: true, type: boolean }
plugins: [remote_execution]
statuses: [Configuration, Build, Execution]
records:
  hosts:
    - id: 1
      name: web1.example.com
      fields: { ip: 10.0.0.1 }
      associations: { subnet: [10] }
      host:
        params: { ntp_server: ntp.example.com, enable_epel: "yes" }
        grub_pass: "$1$salt$hash"
    - id: 2
      name: db1.example.com
      fields: { ip: 10.0.0.2 }
  subnets:
    - { id: 10, name: web, parameters: { mtu: 9000 } }
"#;
