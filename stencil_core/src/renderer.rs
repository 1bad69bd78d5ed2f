//! One render: bind a scope, expose the macro surface to minijinja, execute
//! the template, close the scope.

use std::collections::BTreeMap;
use std::sync::Arc;

use minijinja::Environment;
use minijinja::Error;
use minijinja::ErrorKind;
use minijinja::value::Kwargs;
use minijinja::value::Rest;
use minijinja::value::Value;
use minijinja::value::ValueKind;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::Collaborators;
use crate::CursorObject;
use crate::EncStep;
use crate::Entity;
use crate::HostEntity;
use crate::HostObject;
use crate::LOADERS;
use crate::LoaderEntry;
use crate::MacroContext;
use crate::Principal;
use crate::RenderMode;
use crate::ReportBuffer;
use crate::ReportFormat;
use crate::ResourceQuerySpec;
use crate::Scope;
use crate::ScopeVariables;
use crate::StencilConfig;
use crate::StencilError;
use crate::StencilResult;
use crate::TemplateInput;
use crate::host;
use crate::json_value;
use crate::macros;
use crate::report_cell;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TemplateKind {
	#[default]
	Provisioning,
	/// Report templates additionally get `report_headers`, `report_row`,
	/// `report_render` and `report_format`.
	Report,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
	pub name: String,
	pub source: String,
	pub kind: TemplateKind,
	pub inputs: Vec<TemplateInput>,
}

impl Template {
	pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			source: source.into(),
			kind: TemplateKind::Provisioning,
			inputs: Vec::new(),
		}
	}

	#[must_use]
	pub fn with_kind(mut self, kind: TemplateKind) -> Self {
		self.kind = kind;
		self
	}

	#[must_use]
	pub fn with_inputs(mut self, inputs: Vec<TemplateInput>) -> Self {
		self.inputs = inputs;
		self
	}
}

/// Who renders, for which host, and with which values.
#[derive(Debug, Clone)]
pub struct RenderRequest {
	pub mode: RenderMode,
	pub principal: Principal,
	pub host: Option<Arc<dyn HostEntity>>,
	pub variables: ScopeVariables,
	pub user_inputs: BTreeMap<String, String>,
	pub report_format: Option<ReportFormat>,
}

impl RenderRequest {
	pub fn new(principal: Principal) -> Self {
		Self {
			mode: RenderMode::Normal,
			principal,
			host: None,
			variables: ScopeVariables::default(),
			user_inputs: BTreeMap::new(),
			report_format: None,
		}
	}

	#[must_use]
	pub fn preview(mut self) -> Self {
		self.mode = RenderMode::Preview;
		self
	}

	#[must_use]
	pub fn with_host(mut self, host: Arc<dyn HostEntity>) -> Self {
		self.host = Some(host);
		self
	}

	#[must_use]
	pub fn with_variables(mut self, variables: ScopeVariables) -> Self {
		self.variables = variables;
		self
	}

	#[must_use]
	pub fn with_input(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.user_inputs.insert(name.into(), value.into());
		self
	}

	#[must_use]
	pub fn with_report_format(mut self, format: ReportFormat) -> Self {
		self.report_format = Some(format);
		self
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOutput {
	pub text: String,
	/// Report rows and headers accumulated during the render.
	pub report: ReportBuffer,
}

#[derive(Debug, Clone)]
pub struct Renderer {
	collaborators: Collaborators,
	config: Arc<StencilConfig>,
}

impl Renderer {
	pub fn new(collaborators: Collaborators, config: StencilConfig) -> Self {
		Self {
			collaborators,
			config: Arc::new(config),
		}
	}

	pub fn config(&self) -> &StencilConfig {
		&self.config
	}

	/// Render `template` once. A macro failure surfaces as its own error;
	/// any other engine failure surfaces as [`StencilError::TemplateRender`].
	pub fn render(&self, template: &Template, request: RenderRequest) -> StencilResult<RenderOutput> {
		let host_value = request
			.host
			.clone()
			.map_or_else(|| Value::from(()), HostObject::value);
		let scope = Arc::new(
			Scope::bind(request.mode, request.principal, request.host)
				.with_template_name(&template.name)
				.with_safemode(self.config.safemode_render)
				.with_variables(request.variables),
		);

		let context = Arc::new(
			MacroContext::new(scope.clone(), self.collaborators.clone(), self.config.clone())
				.with_inputs(template.inputs.clone(), request.user_inputs)
				.with_report_format(request.report_format),
		);

		debug!(template = %template.name, mode = ?scope.mode(), "rendering template");

		let environment = build_environment(&context, template.kind);
		let result = environment.render_str(&template.source, minijinja::context! { host => host_value });
		scope.close();

		if let Some(failure) = scope.take_failure() {
			return Err(failure);
		}

		let text = result.map_err(|e| StencilError::TemplateRender(e.to_string()))?;
		Ok(RenderOutput {
			text,
			report: scope.report(),
		})
	}
}

trait RecordFailure<T> {
	/// Record a macro failure on the scope, then hand minijinja an error to
	/// unwind with.
	fn or_fail(self, scope: &Scope) -> Result<T, Error>;
}

impl<T> RecordFailure<T> for StencilResult<T> {
	fn or_fail(self, scope: &Scope) -> Result<T, Error> {
		self.map_err(|error| {
			let engine_error = Error::new(ErrorKind::InvalidOperation, error.to_string());
			scope.record_failure(error);
			engine_error
		})
	}
}

fn optional(value: Option<JsonValue>) -> Value {
	value.as_ref().map_or_else(|| Value::from(()), json_value)
}

fn to_json(value: &Value) -> JsonValue {
	serde_json::to_value(value).unwrap_or(JsonValue::Null)
}

fn entity(value: Option<&Value>) -> Option<Entity> {
	value.and_then(Entity::from_value)
}

/// A loader argument given as one name or a list of names.
fn name_list(value: Option<Value>) -> Result<Vec<String>, Error> {
	let Some(value) = value else {
		return Ok(Vec::new());
	};

	match value.kind() {
		ValueKind::None | ValueKind::Undefined => Ok(Vec::new()),
		ValueKind::String => Ok(vec![value.to_string()]),
		_ => Ok(value.try_iter()?.map(|item| item.to_string()).collect()),
	}
}

fn loader_spec(entry: &LoaderEntry, kwargs: &Kwargs) -> Result<ResourceQuerySpec, Error> {
	let mut spec = entry.spec();
	if let Some(search) = kwargs.get::<Option<String>>("search")? {
		spec = spec.search(search);
	}
	spec = spec
		.includes(name_list(kwargs.get("includes")?)?)
		.preload(name_list(kwargs.get("preload")?)?)
		.joins(name_list(kwargs.get("joins")?)?)
		.select(name_list(kwargs.get("select")?)?);
	if let Some(batch) = kwargs.get::<Option<usize>>("batch")? {
		spec = spec.batch_size(batch);
	}
	if let Some(limit) = kwargs.get::<Option<usize>>("limit")? {
		spec = spec.limit(limit);
	}
	kwargs.assert_all_used()?;

	Ok(spec)
}

fn enc_step(value: &Value) -> EncStep {
	if value.kind() == ValueKind::Number {
		if let Ok(index) = usize::try_from(value.clone()) {
			return EncStep::Index(index);
		}
	}

	EncStep::Key(value.to_string())
}

/// A host group argument of `default_template_url`: its title when loaded,
/// otherwise its string form.
fn hostgroup_title(value: &Value) -> String {
	match Entity::from_value(value) {
		Some(Entity::Record(record)) => {
			record
				.fields
				.get("title")
				.and_then(JsonValue::as_str)
				.map_or_else(|| record.name.clone(), ToString::to_string)
		}
		_ => value.to_string(),
	}
}

fn build_environment(context: &Arc<MacroContext>, kind: TemplateKind) -> Environment<'static> {
	let mut env = Environment::new();
	env.set_keep_trailing_newline(true);
	env.set_formatter(|out, state, value| {
		if value.is_none() {
			return Ok(());
		}
		if value.kind() == ValueKind::Bool {
			out.write_str(if value.is_true() { "true" } else { "false" })?;
			return Ok(());
		}
		minijinja::escape_formatter(out, state, value)
	});

	register_base_macros(&mut env, context);
	register_host_macros(&mut env, context);
	register_loaders(&mut env, context);
	if kind == TemplateKind::Report {
		register_report_macros(&mut env, context);
	}

	env
}

#[allow(clippy::too_many_lines)]
fn register_base_macros(env: &mut Environment<'static>, context: &Arc<MacroContext>) {
	let ctx = context.clone();
	env.add_function(
		"global_setting",
		move |name: String, default: Option<Value>| {
			ctx.global_setting(&name, default.as_ref().map(to_json))
				.map(optional)
				.or_fail(ctx.scope())
		},
	);

	let ctx = context.clone();
	env.add_function("plugin_present", move |name: String| ctx.plugin_present(&name));

	let ctx = context.clone();
	env.add_function("subnet_param", move |subnet: Value, name: String| {
		ctx.subnet_param(entity(Some(&subnet)).as_ref(), &name)
			.map(optional)
			.or_fail(ctx.scope())
	});

	let ctx = context.clone();
	env.add_function("subnet_has_param", move |subnet: Value, name: String| {
		ctx.subnet_has_param(entity(Some(&subnet)).as_ref(), &name)
			.or_fail(ctx.scope())
	});

	let ctx = context.clone();
	env.add_function("all_host_statuses", move || {
		Value::from_serialize(ctx.all_host_statuses())
	});

	let ctx = context.clone();
	env.add_function("all_host_statuses_hash", move |host: Option<Value>| {
		ctx.all_host_statuses_hash(entity(host.as_ref()).as_ref())
			.map(Value::from_serialize)
			.or_fail(ctx.scope())
	});

	let ctx = context.clone();
	env.add_function("host_status", move |host: Option<Value>, name: String| {
		ctx.host_status(entity(host.as_ref()).as_ref(), &name)
			.map(Value::from)
			.or_fail(ctx.scope())
	});

	let ctx = context.clone();
	env.add_function("pxe_kernel_options", move || ctx.pxe_kernel_options());

	env.add_function(
		"indent",
		|count: usize, text: String, skip: Option<bool>, kwargs: Kwargs| {
			let skip_first_line = match kwargs.get::<Option<bool>>("skip_first_line")? {
				Some(value) => value,
				None => skip.unwrap_or(false),
			};
			kwargs.assert_all_used()?;
			Ok::<_, Error>(macros::indent(count, &text, skip_first_line))
		},
	);

	env.add_function("save_to_file", |path: String, content: String| {
		macros::save_to_file(&path, &content)
	});

	let ctx = context.clone();
	env.add_function("dns_lookup", move |query: String| {
		ctx.dns_lookup(&query).or_fail(ctx.scope())
	});

	env.add_function("rand_hex", |n: usize| macros::rand_hex(n));
	env.add_function("rand_name", macros::rand_name);

	let ctx = context.clone();
	env.add_function("mac_name", move |mac: String| {
		macros::mac_name(&mac).or_fail(ctx.scope())
	});

	let ctx = context.clone();
	env.add_function(
		"default_template_url",
		move |template: Value, hostgroup: Value| {
			ctx.default_template_url(&template.to_string(), &hostgroup_title(&hostgroup))
				.or_fail(ctx.scope())
		},
	);

	let ctx = context.clone();
	env.add_function("foreman_server_url", move || {
		ctx.foreman_server_url().or_fail(ctx.scope())
	});

	let ctx = context.clone();
	env.add_function("foreman_server_fqdn", move || {
		ctx.foreman_server_fqdn()
			.map(Value::from)
			.or_fail(ctx.scope())
	});

	let ctx = context.clone();
	env.add_function("preview", move || ctx.preview());

	let ctx = context.clone();
	env.add_function("template_name", move || ctx.template_name().to_string());

	let ctx = context.clone();
	env.add_function("input", move |name: String| {
		ctx.input(&name)
			.map(|value| json_value(&value))
			.or_fail(ctx.scope())
	});

	let ctx = context.clone();
	env.add_function("host_kernel_release", move |host: Option<Value>| {
		ctx.host_kernel_release(entity(host.as_ref()).as_ref())
			.map(Value::from)
			.or_fail(ctx.scope())
	});

	let ctx = context.clone();
	env.add_function("host_uptime_seconds", move |host: Option<Value>| {
		ctx.host_uptime_seconds(entity(host.as_ref()).as_ref())
			.map(Value::from)
			.or_fail(ctx.scope())
	});

	let ctx = context.clone();
	env.add_function("host_memory", move |host: Option<Value>| {
		ctx.host_memory(entity(host.as_ref()).as_ref())
			.map(Value::from)
			.or_fail(ctx.scope())
	});

	let ctx = context.clone();
	env.add_function("host_sockets", move |host: Option<Value>| {
		ctx.host_sockets(entity(host.as_ref()).as_ref())
			.map(Value::from)
			.or_fail(ctx.scope())
	});

	let ctx = context.clone();
	env.add_function("host_cores", move |host: Option<Value>| {
		ctx.host_cores(entity(host.as_ref()).as_ref())
			.map(Value::from)
			.or_fail(ctx.scope())
	});

	let ctx = context.clone();
	env.add_function("host_virtual", move |host: Option<Value>| {
		ctx.host_virtual(entity(host.as_ref()).as_ref())
			.map(Value::from)
			.or_fail(ctx.scope())
	});
}

fn register_host_macros(env: &mut Environment<'static>, context: &Arc<MacroContext>) {
	let scope = context.scope().clone();
	env.add_function("host_param", move |name: String, default: Option<Value>| {
		host::host_param(&scope, &name, default.as_ref().map(to_json))
			.map(optional)
			.or_fail(&scope)
	});

	let scope = context.scope().clone();
	env.add_function("host_param_or_fail", move |name: String| {
		host::host_param_or_fail(&scope, &name)
			.map(optional)
			.or_fail(&scope)
	});

	let scope = context.scope().clone();
	env.add_function("host_param_true", move |name: String| {
		host::host_param_true(&scope, &name).or_fail(&scope)
	});

	let scope = context.scope().clone();
	env.add_function("host_param_false", move |name: String| {
		host::host_param_false(&scope, &name).or_fail(&scope)
	});

	let scope = context.scope().clone();
	env.add_function("host_enc", move |path: Rest<Value>| {
		let steps: Vec<EncStep> = path.iter().map(enc_step).collect();
		host::host_enc(&scope, &steps)
			.map(|value| json_value(&value))
			.or_fail(&scope)
	});

	let scope = context.scope().clone();
	env.add_function("host_puppet_classes", move || {
		host::host_puppet_classes(&scope).or_fail(&scope)
	});

	let scope = context.scope().clone();
	env.add_function("root_pass", move || {
		host::root_pass(&scope)
			.map(Value::from)
			.or_fail(&scope)
	});

	let scope = context.scope().clone();
	env.add_function("grub_pass", move || host::grub_pass(&scope).or_fail(&scope));

	let scope = context.scope().clone();
	env.add_function("ks_console", move || host::ks_console(&scope));
}

/// One loader macro per [`LOADERS`] entry.
fn register_loaders(env: &mut Environment<'static>, context: &Arc<MacroContext>) {
	for entry in LOADERS {
		let entry = *entry;
		let ctx = context.clone();
		env.add_function(entry.macro_name, move |kwargs: Kwargs| {
			let spec = loader_spec(&entry, &kwargs)?;
			let cursor = ctx.load(spec).or_fail(ctx.scope())?;
			Ok::<_, Error>(CursorObject::value(cursor, ctx.scope().clone()))
		});
	}
}

fn register_report_macros(env: &mut Environment<'static>, context: &Arc<MacroContext>) {
	let ctx = context.clone();
	env.add_function("report_headers", move |labels: Rest<Value>| {
		let labels = labels.iter().map(|label| report_cell(label).to_string()).collect();
		ctx.report_headers(labels)
			.map(|()| String::new())
			.or_fail(ctx.scope())
	});

	let ctx = context.clone();
	env.add_function("report_row", move |row: Option<Value>, kwargs: Kwargs| {
		let mut cells = Vec::new();
		let row = row.filter(|row| !row.is_none() && !row.is_undefined());
		if let Some(row) = &row {
			if row.kind() != ValueKind::Map {
				return Err::<String, _>(StencilError::WrongEntity {
					expected: "mapping".to_string(),
					object_name: row.to_string(),
					object_class: row.kind().to_string(),
				})
				.or_fail(ctx.scope());
			}
			for key in row.try_iter()? {
				let value = row.get_item(&key)?;
				cells.push((key.to_string(), report_cell(&value)));
			}
		}
		for key in kwargs.args() {
			let value: Value = kwargs.get(key)?;
			cells.push((key.to_string(), report_cell(&value)));
		}

		ctx.report_row(cells)
			.map(|()| String::new())
			.or_fail(ctx.scope())
	});

	let ctx = context.clone();
	env.add_function("report_render", move |format: Option<String>, kwargs: Kwargs| {
		let format = match kwargs.get::<Option<String>>("format")? {
			Some(format) => Some(format),
			None => format,
		};
		kwargs.assert_all_used()?;
		ctx.report_render(format.as_deref()).or_fail(ctx.scope())
	});

	let ctx = context.clone();
	env.add_function("report_format", move || {
		ctx.report_format()
			.map(|format| format.as_str().to_string())
	});
}
