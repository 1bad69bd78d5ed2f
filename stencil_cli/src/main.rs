use std::path::Path;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use clap::Parser;
use owo_colors::OwoColorize;
use stencil_cli::Commands;
use stencil_cli::RenderArgs;
use stencil_cli::StencilCli;
use stencil_core::LOADERS;
use stencil_core::MemoryInventory;
use stencil_core::Principal;
use stencil_core::RenderRequest;
use stencil_core::Renderer;
use stencil_core::ScopeVariables;
use stencil_core::StatusRegistry;
use stencil_core::StencilConfig;
use stencil_core::StencilError;
use stencil_core::SystemResolver;
use stencil_core::Template;
use stencil_core::TemplateInput;
use tracing_subscriber::EnvFilter;

static USE_COLOR: AtomicBool = AtomicBool::new(true);

/// Environment variable holding a `tracing` filter directive.
const LOG_ENV: &str = "STENCIL_LOG";

fn color_enabled() -> bool {
	USE_COLOR.load(Ordering::Relaxed)
}

/// Apply ANSI color codes only when color is enabled.
macro_rules! colored {
	($text:expr,red) => {
		if color_enabled() {
			format!("{}", $text.red())
		} else {
			format!("{}", $text)
		}
	};
	($text:expr,bold) => {
		if color_enabled() {
			format!("{}", $text.bold())
		} else {
			format!("{}", $text)
		}
	};
}

fn main() {
	let args = StencilCli::parse();

	// Respect NO_COLOR env var and --no-color flag.
	let use_color = !args.no_color && std::env::var_os("NO_COLOR").is_none();
	if !use_color {
		USE_COLOR.store(false, Ordering::Relaxed);
	}

	miette::set_hook(Box::new(move |_| {
		Box::new(
			miette::MietteHandlerOpts::new()
				.color(use_color)
				.unicode(use_color)
				.build(),
		)
	}))
	.ok();

	init_logging(args.verbose, use_color);

	let result = match &args.command {
		Some(Commands::Render(render)) => run_render(&args, render),
		Some(Commands::Loaders) => run_loaders(),
		Some(Commands::Statuses { inventory }) => run_statuses(inventory.as_deref()),
		None => {
			eprintln!("No subcommand specified. Run `stencil --help` for usage.");
			process::exit(1);
		}
	};

	if let Err(e) = result {
		match e.downcast::<StencilError>() {
			Ok(stencil_err) => {
				let report: miette::Report = (*stencil_err).into();
				eprintln!("{report:?}");
			}
			Err(e) => {
				eprintln!("{} {e}", colored!("error:", red));
			}
		}
		process::exit(2);
	}
}

/// Logs go to stderr so rendered output on stdout stays clean.
fn init_logging(verbose: bool, use_color: bool) {
	let default_directive = if verbose { "stencil_core=debug" } else { "warn" };
	let filter =
		EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_directive));

	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.with_ansi(use_color)
		.with_target(verbose)
		.init();
}

fn resolve_root(args: &StencilCli) -> PathBuf {
	args.path
		.clone()
		.unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

fn load_config(args: &StencilCli, render: &RenderArgs) -> Result<StencilConfig, StencilError> {
	if let Some(path) = &render.config {
		return StencilConfig::from_file(path);
	}

	let root = resolve_root(args);
	if let Some(path) = StencilConfig::resolve_path(&root) {
		tracing::debug!(path = %path.display(), "using config file");
	}
	Ok(StencilConfig::load(&root)?.unwrap_or_default())
}

/// Install the inventory's status kinds as the process-wide registry.
fn install_statuses(inventory: &MemoryInventory) -> Arc<StatusRegistry> {
	if let Some(registry) = inventory.status_registry() {
		if StatusRegistry::install_global(registry).is_err() {
			tracing::debug!("status registry already installed");
		}
	}

	StatusRegistry::global()
}

fn run_render(args: &StencilCli, render: &RenderArgs) -> Result<(), Box<dyn std::error::Error>> {
	let config = load_config(args, render)?;
	let inventory = Arc::new(MemoryInventory::from_path(&render.inventory)?);
	let statuses = install_statuses(&inventory);

	let source = std::fs::read_to_string(&render.template)?;
	let name = render
		.template
		.file_stem()
		.and_then(|stem| stem.to_str())
		.unwrap_or("template")
		.to_string();

	let mut inputs: Vec<TemplateInput> = render
		.required_inputs
		.iter()
		.map(|input| TemplateInput::user(input.as_str()).required())
		.collect();
	for (input, _) in &render.inputs {
		if !inputs.iter().any(|declared| declared.name == *input) {
			inputs.push(TemplateInput::user(input.as_str()));
		}
	}

	let template = Template::new(name, source)
		.with_kind(render.kind.into())
		.with_inputs(inputs);

	let mut request = RenderRequest::new(Principal::new(render.principal.as_str())).with_variables(
		ScopeVariables {
			grub: render.grub,
			port: render.port,
			baud: render.baud,
		},
	);
	if render.preview {
		request = request.preview();
	}
	if let Some(host_name) = &render.host {
		let host = inventory
			.host(host_name)
			.ok_or_else(|| format!("host `{host_name}` is not in the inventory"))?;
		request = request.with_host(host);
	}
	if let Some(format) = render.format {
		request = request.with_report_format(format.into());
	}
	for (input, value) in &render.inputs {
		request = request.with_input(input.as_str(), value.as_str());
	}

	let mut collaborators = inventory.collaborators(statuses);
	if render.system_dns {
		collaborators.resolver = Arc::new(SystemResolver::new());
	}
	let renderer = Renderer::new(collaborators, config);
	let output = renderer.render(&template, request)?;
	print!("{}", output.text);

	Ok(())
}

fn run_loaders() -> Result<(), Box<dyn std::error::Error>> {
	println!("{}", colored!("Loader macros:", bold));
	for entry in LOADERS {
		println!("  {:<24} {:<20} {}", entry.macro_name, entry.kind.tag(), entry.permission);
	}

	Ok(())
}

fn run_statuses(inventory: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
	let statuses = match inventory {
		Some(path) => install_statuses(&MemoryInventory::from_path(path)?),
		None => StatusRegistry::global(),
	};

	for status in statuses.sorted() {
		println!("{status}");
	}

	Ok(())
}
