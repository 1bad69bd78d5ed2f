use std::path::PathBuf;

use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use stencil_core::ReportFormat;
use stencil_core::TemplateKind;

#[derive(Parser)]
#[command(
	author,
	version,
	about = "Render provisioning templates and reports from inventory data.",
	long_about = "stencil renders provisioning scripts and tabular reports from an inventory \
	              fixture.\n\nTemplates call a curated set of macros: host parameters, \
	              settings, batched resource loaders and a report builder.\n\nQuick start:\n  \
	              stencil render kickstart.j2 --inventory inventory.yaml --host web1\n  stencil \
	              render hosts.j2 --inventory inventory.yaml --kind report --format json\n  \
	              stencil loaders     List the loader macros\n  stencil statuses    List \
	              host status kinds"
)]
pub struct StencilCli {
	#[command(subcommand)]
	pub command: Option<Commands>,

	/// Directory searched for `stencil.toml`.
	#[arg(long, short, global = true)]
	pub path: Option<PathBuf>,

	/// Enable verbose output.
	#[arg(long, short, global = true, default_value_t = false)]
	pub verbose: bool,

	/// Disable colored output.
	#[arg(long, global = true, default_value_t = false)]
	pub no_color: bool,
}

#[derive(Subcommand)]
pub enum Commands {
	/// Render a template against an inventory fixture.
	///
	/// The rendered text is written to stdout. Macro failures exit with a
	/// non-zero status and a diagnostic on stderr.
	Render(RenderArgs),
	/// List the loader macros with their resource kind and permission.
	Loaders,
	/// List the registered host status kinds in sorted order.
	///
	/// Uses the statuses declared by `--inventory` when given, the built-in
	/// kinds otherwise.
	Statuses {
		/// Inventory fixture (JSON, YAML or TOML).
		#[arg(long, short)]
		inventory: Option<PathBuf>,
	},
}

#[derive(Debug, clap::Args)]
pub struct RenderArgs {
	/// Template file to render.
	pub template: PathBuf,

	/// Inventory fixture (JSON, YAML or TOML).
	#[arg(long, short)]
	pub inventory: PathBuf,

	/// Bind the render to this host.
	#[arg(long)]
	pub host: Option<String>,

	/// Render a preview: inputs become placeholders and loaders are capped.
	#[arg(long, default_value_t = false)]
	pub preview: bool,

	/// Principal the render is authorized as.
	#[arg(long, default_value = "admin", env = "STENCIL_PRINCIPAL")]
	pub principal: String,

	/// Template kind. Report templates get the report macros.
	#[arg(long, value_enum, default_value_t = KindArg::Provisioning)]
	pub kind: KindArg,

	/// Report format used by `report_render()` without an explicit format.
	#[arg(long, value_enum)]
	pub format: Option<FormatArg>,

	/// User input value as `NAME=VALUE`. May be repeated.
	#[arg(long = "input", value_name = "NAME=VALUE", value_parser = parse_input)]
	pub inputs: Vec<(String, String)>,

	/// Declare a required user input. May be repeated.
	#[arg(long = "require-input", value_name = "NAME")]
	pub required_inputs: Vec<String>,

	/// Emit the GRUB password in `grub_pass()`.
	#[arg(long, default_value_t = false)]
	pub grub: bool,

	/// Serial console port for `ks_console()`.
	#[arg(long)]
	pub port: Option<u32>,

	/// Serial console baud rate for `ks_console()`.
	#[arg(long)]
	pub baud: Option<u32>,

	/// Resolve `dns_lookup()` through the system resolver instead of the
	/// inventory's DNS table.
	#[arg(long, default_value_t = false)]
	pub system_dns: bool,

	/// Explicit config file. Overrides discovery under `--path`.
	#[arg(long)]
	pub config: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
	/// Provisioning script: the base and host macros only.
	Provisioning,
	/// Report: adds `report_headers`, `report_row` and `report_render`.
	Report,
}

impl From<KindArg> for TemplateKind {
	fn from(value: KindArg) -> Self {
		match value {
			KindArg::Provisioning => TemplateKind::Provisioning,
			KindArg::Report => TemplateKind::Report,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FormatArg {
	Csv,
	/// Same output as `csv`.
	Txt,
	Yaml,
	Json,
	/// A standalone HTML table.
	Html,
}

impl From<FormatArg> for ReportFormat {
	fn from(value: FormatArg) -> Self {
		match value {
			FormatArg::Csv => ReportFormat::Csv,
			FormatArg::Txt => ReportFormat::Txt,
			FormatArg::Yaml => ReportFormat::Yaml,
			FormatArg::Json => ReportFormat::Json,
			FormatArg::Html => ReportFormat::Html,
		}
	}
}

fn parse_input(value: &str) -> Result<(String, String), String> {
	let (name, input) = value
		.split_once('=')
		.ok_or_else(|| format!("expected NAME=VALUE, got `{value}`"))?;
	if name.trim().is_empty() {
		return Err(format!("input name is empty in `{value}`"));
	}

	Ok((name.trim().to_string(), input.to_string()))
}
