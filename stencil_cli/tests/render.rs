mod common;

use std::path::Path;
use std::path::PathBuf;

use predicates::prelude::PredicateBooleanExt;
use rstest::rstest;
use serde_json::Value;
use stencil_core::AnyEmptyResult;
use stencil_core::AnyResult;

fn write_fixture(dir: &Path, template: &str) -> AnyResult<(PathBuf, PathBuf)> {
	let inventory = dir.join("inventory.yaml");
	let template_path = dir.join("template.j2");
	std::fs::write(&inventory, common::INVENTORY)?;
	std::fs::write(&template_path, template)?;
	Ok((inventory, template_path))
}

#[test]
fn render_binds_a_host() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	let (inventory, template) = write_fixture(
		tmp.path(),
		"{{ host.name }} {{ host_param('ntp_server') }} {{ host_param_true('enable_epel') }}",
	)?;

	common::stencil_cmd()
		.arg("render")
		.arg(&template)
		.arg("--inventory")
		.arg(&inventory)
		.arg("--host")
		.arg("web1.example.com")
		.arg("--path")
		.arg(tmp.path())
		.assert()
		.success()
		.stdout("web1.example.com ntp.example.com true");

	Ok(())
}

#[test]
fn render_report_as_json() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	let (inventory, template) = write_fixture(
		tmp.path(),
		"{% for h in load_hosts() %}{{ report_row(name=h.name, ip=h.ip) }}{% endfor %}{{ \
		 report_render() }}",
	)?;

	let output = common::stencil_cmd()
		.arg("render")
		.arg(&template)
		.arg("--inventory")
		.arg(&inventory)
		.arg("--kind")
		.arg("report")
		.arg("--format")
		.arg("json")
		.arg("--path")
		.arg(tmp.path())
		.output()?;

	assert!(output.status.success());
	let rows: Value = serde_json::from_slice(&output.stdout)?;
	assert_eq!(
		rows,
		serde_json::json!([
			{ "name": "web1.example.com", "ip": "10.0.0.1" },
			{ "name": "db1.example.com", "ip": "10.0.0.2" },
		])
	);

	Ok(())
}

#[test]
fn render_report_defaults_to_csv() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	let (inventory, template) = write_fixture(
		tmp.path(),
		"{{ report_row(name='a', ip='10.0.0.1') }}{{ report_row(name='b') }}{{ report_render() }}",
	)?;

	common::stencil_cmd()
		.arg("render")
		.arg(&template)
		.arg("--inventory")
		.arg(&inventory)
		.arg("--kind")
		.arg("report")
		.arg("--path")
		.arg(tmp.path())
		.assert()
		.success()
		.stdout("name,ip\na,10.0.0.1\nb\n");

	Ok(())
}

#[test]
fn render_preview_uses_placeholders() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	let (inventory, template) = write_fixture(tmp.path(), "{{ input('os') }}")?;

	common::stencil_cmd()
		.arg("render")
		.arg(&template)
		.arg("--inventory")
		.arg(&inventory)
		.arg("--require-input")
		.arg("os")
		.arg("--preview")
		.arg("--path")
		.arg(tmp.path())
		.assert()
		.success()
		.stdout("$USER_INPUT[os]");

	common::stencil_cmd()
		.arg("render")
		.arg(&template)
		.arg("--inventory")
		.arg(&inventory)
		.arg("--input")
		.arg("os=debian")
		.arg("--path")
		.arg(tmp.path())
		.assert()
		.success()
		.stdout("debian");

	Ok(())
}

#[test]
fn render_fails_on_missing_required_input() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	let (inventory, template) = write_fixture(tmp.path(), "{{ input('os') }}")?;

	common::stencil_cmd()
		.arg("render")
		.arg(&template)
		.arg("--inventory")
		.arg(&inventory)
		.arg("--require-input")
		.arg("os")
		.arg("--path")
		.arg(tmp.path())
		.assert()
		.code(2)
		.stdout("")
		.stderr(predicates::str::contains("required input `os` has no value"));

	Ok(())
}

#[rstest]
#[case::admin("admin", "web|xx")]
#[case::viewer("viewer", "|xx")]
#[case::stranger("nobody", "|")]
fn render_authorizes_as_the_principal(
	#[case] principal: &str,
	#[case] expected: &str,
) -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	let (inventory, template) = write_fixture(
		tmp.path(),
		"{% for s in load_subnets() %}{{ s.name }}{% endfor %}|{% for h in load_hosts() %}x{% \
		 endfor %}",
	)?;

	common::stencil_cmd()
		.arg("render")
		.arg(&template)
		.arg("--inventory")
		.arg(&inventory)
		.arg("--principal")
		.arg(principal)
		.arg("--path")
		.arg(tmp.path())
		.assert()
		.success()
		.stdout(expected.to_string());

	Ok(())
}

#[test]
fn render_rejects_unknown_hosts() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	let (inventory, template) = write_fixture(tmp.path(), "{{ host.name }}")?;

	common::stencil_cmd()
		.arg("render")
		.arg(&template)
		.arg("--inventory")
		.arg(&inventory)
		.arg("--host")
		.arg("ghost.example.com")
		.arg("--path")
		.arg(tmp.path())
		.assert()
		.code(2)
		.stderr(predicates::str::contains("error:").and(predicates::str::contains("ghost.example.com")));

	Ok(())
}

#[test]
fn render_filters_settings_in_safe_mode() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	let (inventory, template) = write_fixture(tmp.path(), "{{ global_setting('safemode_render') }}")?;

	common::stencil_cmd()
		.arg("render")
		.arg(&template)
		.arg("--inventory")
		.arg(&inventory)
		.arg("--path")
		.arg(tmp.path())
		.assert()
		.code(2)
		.stderr(predicates::str::contains("not accessible in safe mode"));

	std::fs::write(tmp.path().join("stencil.toml"), "safemode_render = false\n")?;
	common::stencil_cmd()
		.arg("render")
		.arg(&template)
		.arg("--inventory")
		.arg(&inventory)
		.arg("--path")
		.arg(tmp.path())
		.assert()
		.success()
		.stdout("true");

	Ok(())
}

#[test]
fn render_emits_kickstart_options() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	let (inventory, template) =
		write_fixture(tmp.path(), "bootloader {{ grub_pass() }} {{ ks_console() }}")?;

	common::stencil_cmd()
		.arg("render")
		.arg(&template)
		.arg("--inventory")
		.arg(&inventory)
		.arg("--host")
		.arg("web1.example.com")
		.arg("--grub")
		.arg("--port")
		.arg("0")
		.arg("--baud")
		.arg("9600")
		.arg("--path")
		.arg(tmp.path())
		.assert()
		.success()
		.stdout("bootloader --md5pass=$1$salt$hash console=ttyS0,9600");

	Ok(())
}

#[test]
fn render_verbose_logs_to_stderr() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	let (inventory, template) =
		write_fixture(tmp.path(), "{% for h in load_hosts() %}{{ h.name }};{% endfor %}")?;

	common::stencil_cmd()
		.arg("--verbose")
		.arg("render")
		.arg(&template)
		.arg("--inventory")
		.arg(&inventory)
		.arg("--path")
		.arg(tmp.path())
		.assert()
		.success()
		.stdout("web1.example.com;db1.example.com;")
		.stderr(predicates::str::contains("planned resource query"));

	Ok(())
}

#[test]
fn loaders_lists_every_macro() {
	common::stencil_cmd()
		.arg("loaders")
		.assert()
		.success()
		.stdout(predicates::str::contains("load_hosts").and(predicates::str::contains("view_hosts")))
		.stdout(predicates::str::contains("load_host_groups"));
}

#[test]
fn statuses_reads_the_inventory() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	let (inventory, _) = write_fixture(tmp.path(), "")?;

	common::stencil_cmd()
		.arg("statuses")
		.arg("--inventory")
		.arg(&inventory)
		.assert()
		.success()
		.stdout("Build\nConfiguration\nExecution\n");

	common::stencil_cmd()
		.arg("statuses")
		.assert()
		.success()
		.stdout("Build\nConfiguration\n");

	Ok(())
}

#[test]
fn render_resolves_through_the_system_when_asked() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	let (inventory, template) = write_fixture(tmp.path(), "{{ dns_lookup('localhost') }}")?;

	common::stencil_cmd()
		.arg("render")
		.arg(&template)
		.arg("--inventory")
		.arg(&inventory)
		.arg("--path")
		.arg(tmp.path())
		.assert()
		.code(2)
		.stderr(predicates::str::contains("no address record for localhost"));

	common::stencil_cmd()
		.arg("render")
		.arg(&template)
		.arg("--inventory")
		.arg(&inventory)
		.arg("--system-dns")
		.arg("--path")
		.arg(tmp.path())
		.assert()
		.success()
		.stdout(predicates::str::is_match(r"^(127\.0\.0\.1|::1)$")?);

	Ok(())
}
