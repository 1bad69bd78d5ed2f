use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::OnceLock;
use std::sync::PoisonError;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use serde_json::Value as JsonValue;

use crate::HostEntity;
use crate::Principal;
use crate::ReportBuffer;
use crate::StencilError;
use crate::StencilResult;

/// How a template is being rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderMode {
	#[default]
	Normal,
	/// Sample output for template authors: inputs are substituted with
	/// placeholders and loader results are capped.
	Preview,
}

/// Provisioning context variables set by the caller of a render.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeVariables {
	/// Whether a GRUB password should be emitted by `grub_pass`.
	pub grub: bool,
	/// Serial console port used by `ks_console`.
	pub port: Option<u32>,
	/// Serial console baud rate used by `ks_console`.
	pub baud: Option<u32>,
}

/// Per-render execution context. Exactly one exists per render; caches live
/// and die with it.
pub struct Scope {
	mode: RenderMode,
	principal: Principal,
	host: Option<Arc<dyn HostEntity>>,
	template_name: String,
	safemode: bool,
	variables: ScopeVariables,
	enc: OnceLock<JsonValue>,
	params: Mutex<HashMap<String, Option<JsonValue>>>,
	report: Mutex<ReportBuffer>,
	failure: Mutex<Option<StencilError>>,
	closed: AtomicBool,
}

impl fmt::Debug for Scope {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Scope")
			.field("mode", &self.mode)
			.field("principal", &self.principal)
			.field("host", &self.host.as_ref().map(|host| host.name().to_string()))
			.field("template_name", &self.template_name)
			.field("safemode", &self.safemode)
			.field("closed", &self.is_closed())
			.finish_non_exhaustive()
	}
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
	mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Scope {
	/// Create the context for one render.
	pub fn bind(mode: RenderMode, principal: Principal, host: Option<Arc<dyn HostEntity>>) -> Self {
		Self {
			mode,
			principal,
			host,
			template_name: String::new(),
			safemode: true,
			variables: ScopeVariables::default(),
			enc: OnceLock::new(),
			params: Mutex::new(HashMap::new()),
			report: Mutex::new(ReportBuffer::default()),
			failure: Mutex::new(None),
			closed: AtomicBool::new(false),
		}
	}

	#[must_use]
	pub fn with_template_name(mut self, name: impl Into<String>) -> Self {
		self.template_name = name.into();
		self
	}

	#[must_use]
	pub fn with_safemode(mut self, safemode: bool) -> Self {
		self.safemode = safemode;
		self
	}

	#[must_use]
	pub fn with_variables(mut self, variables: ScopeVariables) -> Self {
		self.variables = variables;
		self
	}

	pub fn mode(&self) -> RenderMode {
		self.mode
	}

	pub fn is_preview(&self) -> bool {
		self.mode == RenderMode::Preview
	}

	pub fn principal(&self) -> &Principal {
		&self.principal
	}

	pub fn host(&self) -> Option<&Arc<dyn HostEntity>> {
		self.host.as_ref()
	}

	/// The bound host, or [`StencilError::HostUnknown`].
	pub fn require_host(&self) -> StencilResult<&Arc<dyn HostEntity>> {
		self.host.as_ref().ok_or(StencilError::HostUnknown)
	}

	pub fn template_name(&self) -> &str {
		&self.template_name
	}

	pub fn safemode(&self) -> bool {
		self.safemode
	}

	pub fn variables(&self) -> &ScopeVariables {
		&self.variables
	}

	/// The bound host's ENC document, computed on first use.
	pub fn enc(&self) -> StencilResult<&JsonValue> {
		let host = self.require_host()?;
		Ok(self.enc.get_or_init(|| host.info()))
	}

	/// Inherited parameter lookup, memoized per name for this render.
	pub fn host_param(&self, name: &str) -> StencilResult<Option<JsonValue>> {
		let host = self.require_host()?;
		let mut params = lock(&self.params);
		if let Some(cached) = params.get(name) {
			return Ok(cached.clone());
		}

		let value = host.host_param(name);
		params.insert(name.to_string(), value.clone());
		Ok(value)
	}

	/// Mutate the report buffer. Fails once the scope is closed.
	pub fn with_report<T>(&self, update: impl FnOnce(&mut ReportBuffer) -> T) -> StencilResult<T> {
		if self.is_closed() {
			return Err(StencilError::ScopeClosed(self.template_name.clone()));
		}
		Ok(update(&mut lock(&self.report)))
	}

	/// Snapshot of the report buffer.
	pub fn report(&self) -> ReportBuffer {
		lock(&self.report).clone()
	}

	/// Keep the first typed failure raised by a macro so the renderer can
	/// return it once the template engine has unwound.
	pub fn record_failure(&self, error: StencilError) {
		let mut failure = lock(&self.failure);
		if failure.is_none() {
			*failure = Some(error);
		}
	}

	pub fn take_failure(&self) -> Option<StencilError> {
		lock(&self.failure).take()
	}

	/// Freeze the scope at the end of a render.
	pub fn close(&self) {
		self.closed.store(true, Ordering::Release);
	}

	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::Acquire)
	}
}
