//! Scope-bound host parameter and classification accessors.
//!
//! Every accessor requires a bound host and fails with
//! [`StencilError::HostUnknown`] otherwise.

use serde_json::Value as JsonValue;

use crate::Scope;
use crate::StencilError;
use crate::StencilResult;

const TRUTHY: &[&str] = &["true", "t", "yes", "y", "on", "1"];
const FALSY: &[&str] = &["false", "f", "no", "n", "off", "0"];

/// One step of a [`host_enc`] path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncStep {
	Key(String),
	Index(usize),
}

impl EncStep {
	fn label(&self) -> String {
		match self {
			Self::Key(key) => key.clone(),
			Self::Index(index) => index.to_string(),
		}
	}
}

impl From<&str> for EncStep {
	fn from(value: &str) -> Self {
		Self::Key(value.to_string())
	}
}

impl From<usize> for EncStep {
	fn from(value: usize) -> Self {
		Self::Index(value)
	}
}

/// Inherited parameter value. `null` and `false` count as unset and yield
/// `default`.
pub fn host_param(
	scope: &Scope,
	name: &str,
	default: Option<JsonValue>,
) -> StencilResult<Option<JsonValue>> {
	let value = scope.host_param(name)?;
	Ok(match value {
		None | Some(JsonValue::Null | JsonValue::Bool(false)) => default,
		Some(value) => Some(value),
	})
}

/// Like [`host_param`] but fails when the host has no parameter `name`.
pub fn host_param_or_fail(scope: &Scope, name: &str) -> StencilResult<Option<JsonValue>> {
	let host = scope.require_host()?;
	if !host.params().contains_key(name) {
		return Err(StencilError::HostParamUndefined {
			name: name.to_string(),
			host: host.name().to_string(),
		});
	}

	host_param(scope, name, None)
}

/// Interpret a parameter value through the truthy/falsy tables.
pub fn cast_bool(value: &JsonValue) -> Option<bool> {
	match value {
		JsonValue::Bool(value) => Some(*value),
		JsonValue::Number(number) => {
			match number.as_i64() {
				Some(1) => Some(true),
				Some(0) => Some(false),
				_ => None,
			}
		}
		JsonValue::String(text) => {
			let text = text.trim().to_ascii_lowercase();
			if TRUTHY.contains(&text.as_str()) {
				Some(true)
			} else if FALSY.contains(&text.as_str()) {
				Some(false)
			} else {
				None
			}
		}
		_ => None,
	}
}

pub fn host_param_true(scope: &Scope, name: &str) -> StencilResult<bool> {
	let host = scope.require_host()?;
	Ok(host
		.params()
		.get(name)
		.and_then(cast_bool)
		.unwrap_or(false))
}

pub fn host_param_false(scope: &Scope, name: &str) -> StencilResult<bool> {
	let host = scope.require_host()?;
	Ok(host.params().get(name).and_then(cast_bool) == Some(false))
}

/// The ENC document, or the sub-value reached by walking `path`.
pub fn host_enc(scope: &Scope, path: &[EncStep]) -> StencilResult<JsonValue> {
	let enc = scope.enc()?;
	let mut current = enc;
	for step in path {
		let next = match (step, current) {
			(EncStep::Key(key), JsonValue::Object(map)) => map.get(key),
			(EncStep::Index(index), JsonValue::Array(items)) => items.get(*index),
			(EncStep::Key(key), JsonValue::Array(items)) => {
				key.parse::<usize>().ok().and_then(|index| items.get(index))
			}
			_ => None,
		};

		current = next.ok_or_else(|| {
			StencilError::HostEncParamUndefined {
				path: path.iter().map(EncStep::label).collect::<Vec<_>>().join("/"),
				step: step.label(),
				host: scope
					.host()
					.map(|host| host.name().to_string())
					.unwrap_or_default(),
			}
		})?;
	}

	Ok(current.clone())
}

pub fn host_puppet_classes(scope: &Scope) -> StencilResult<Vec<String>> {
	Ok(scope.require_host()?.puppetclasses())
}

pub fn root_pass(scope: &Scope) -> StencilResult<Option<String>> {
	Ok(scope.require_host()?.root_pass())
}

/// Kickstart bootloader password option. Empty unless the render enabled
/// `grub`.
pub fn grub_pass(scope: &Scope) -> StencilResult<String> {
	if !scope.variables().grub {
		return Ok(String::new());
	}

	let Some(hash) = scope.require_host()?.grub_pass() else {
		return Ok(String::new());
	};

	if hash.starts_with("$1$") {
		Ok(format!("--md5pass={hash}"))
	} else {
		Ok(format!("--iscrypted --password={hash}"))
	}
}

/// Serial console kernel option, empty unless both port and baud are set.
pub fn ks_console(scope: &Scope) -> String {
	let variables = scope.variables();
	match (variables.port, variables.baud) {
		(Some(port), Some(baud)) => format!("console=ttyS{port},{baud}"),
		_ => String::new(),
	}
}
