use std::collections::BTreeMap;

use serde_json::Value as JsonValue;

use crate::Scope;
use crate::StencilError;
use crate::StencilResult;

/// Where an input's value comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
	/// A fixed value declared with the template.
	Literal(String),
	/// Supplied by whoever requests the render.
	User,
	/// A fact reported by the bound host.
	Fact(String),
	/// An inherited parameter of the bound host.
	Parameter(String),
}

impl InputSource {
	fn placeholder_kind(&self) -> &'static str {
		match self {
			Self::Literal(_) => "LITERAL",
			Self::User => "USER",
			Self::Fact(_) => "FACT",
			Self::Parameter(_) => "PARAMETER",
		}
	}
}

/// A parameter declared by a template and read with `input(name)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateInput {
	pub name: String,
	pub source: InputSource,
	/// Value used when previewing. `None` uses the `$<KIND>_INPUT[<name>]`
	/// placeholder.
	pub preview: Option<String>,
	pub required: bool,
}

impl TemplateInput {
	pub fn new(name: impl Into<String>, source: InputSource) -> Self {
		Self {
			name: name.into(),
			source,
			preview: None,
			required: false,
		}
	}

	pub fn user(name: impl Into<String>) -> Self {
		Self::new(name, InputSource::User)
	}

	#[must_use]
	pub fn with_preview(mut self, preview: impl Into<String>) -> Self {
		self.preview = Some(preview.into());
		self
	}

	#[must_use]
	pub fn required(mut self) -> Self {
		self.required = true;
		self
	}

	/// The `$<KIND>_INPUT[<name>]` placeholder shown in previews.
	pub fn placeholder(&self) -> String {
		format!("${}_INPUT[{}]", self.source.placeholder_kind(), self.name)
	}

	pub fn preview_value(&self) -> JsonValue {
		let preview = self.preview.clone().unwrap_or_else(|| self.placeholder());
		JsonValue::String(preview)
	}

	/// The value this input resolves to in a normal render.
	pub fn value(
		&self,
		scope: &Scope,
		user_values: &BTreeMap<String, String>,
	) -> StencilResult<JsonValue> {
		let value = match &self.source {
			InputSource::Literal(value) => Some(JsonValue::String(value.clone())),
			InputSource::User => user_values.get(&self.name).cloned().map(JsonValue::String),
			InputSource::Fact(fact) => scope.require_host()?.fact(fact),
			InputSource::Parameter(parameter) => scope.host_param(parameter)?,
		};

		match value {
			Some(value) if !value.is_null() => Ok(value),
			_ if self.required => Err(StencilError::RequiredInputMissing(self.name.clone())),
			_ => Ok(JsonValue::Null),
		}
	}
}

/// Resolve `input(name)` against the template's declared inputs.
pub fn resolve_input(
	scope: &Scope,
	inputs: &[TemplateInput],
	user_values: &BTreeMap<String, String>,
	name: &str,
) -> StencilResult<JsonValue> {
	let input = inputs
		.iter()
		.find(|input| input.name == name)
		.ok_or_else(|| StencilError::UndefinedInput(name.to_string()))?;

	if scope.is_preview() {
		return Ok(input.preview_value());
	}

	input.value(scope, user_values)
}
