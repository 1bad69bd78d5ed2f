use std::fmt;
use std::fmt::Write as _;
use std::str::FromStr;

use float_cmp::approx_eq;
use serde::Deserialize;
use serde::Serialize;
use serde::Serializer;
use serde::ser::SerializeMap;
use serde_json::Value as JsonValue;

use crate::StencilError;
use crate::StencilResult;

const HTML_STYLE: &str = "th { background-color: black; color: white; }
table,th,td { border-collapse: collapse; border: 1px solid black; }
";

/// Output formats understood by `report_render`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
	#[default]
	Csv,
	/// Alias of [`ReportFormat::Csv`].
	Txt,
	Yaml,
	Json,
	Html,
}

impl ReportFormat {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Csv => "csv",
			Self::Txt => "txt",
			Self::Yaml => "yaml",
			Self::Json => "json",
			Self::Html => "html",
		}
	}
}

impl fmt::Display for ReportFormat {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for ReportFormat {
	type Err = StencilError;

	/// Format tags are case-sensitive.
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"csv" => Ok(Self::Csv),
			"txt" => Ok(Self::Txt),
			"yaml" => Ok(Self::Yaml),
			"json" => Ok(Self::Json),
			"html" => Ok(Self::Html),
			other => {
				Err(StencilError::ReportSerialize {
					format: other.to_string(),
					reason: "unsupported report format".to_string(),
				})
			}
		}
	}
}

/// A report value, classified once when it is handed to the report builder.
#[derive(Debug, Clone)]
pub enum ReportCell {
	Null,
	Bool(bool),
	Integer(i64),
	Float(f64),
	String(String),
	Sequence(Vec<ReportCell>),
	/// Entries in insertion order.
	Mapping(Vec<(String, ReportCell)>),
	/// A value with no structured form, kept as its string rendering.
	Opaque(String),
}

impl Eq for ReportCell {}
impl PartialEq for ReportCell {
	fn eq(&self, other: &Self) -> bool {
		match (self, other) {
			(ReportCell::Null, ReportCell::Null) => true,
			(ReportCell::Bool(value), ReportCell::Bool(other_value)) => value == other_value,
			(ReportCell::Integer(value), ReportCell::Integer(other_value)) => value == other_value,
			(ReportCell::Float(value), ReportCell::Float(other_value)) => {
				approx_eq!(f64, *value, *other_value, ulps = 2)
			}
			(ReportCell::String(value), ReportCell::String(other_value))
			| (ReportCell::Opaque(value), ReportCell::Opaque(other_value)) => value == other_value,
			(ReportCell::Sequence(items), ReportCell::Sequence(other_items)) => items == other_items,
			(ReportCell::Mapping(entries), ReportCell::Mapping(other_entries)) => {
				entries == other_entries
			}
			_ => false,
		}
	}
}

impl ReportCell {
	/// The cell as a single CSV field. Sequences and mappings are flattened
	/// by comma-joining their elements.
	pub fn csv_field(&self) -> String {
		match self {
			Self::Sequence(items) => {
				items
					.iter()
					.map(ToString::to_string)
					.collect::<Vec<_>>()
					.join(",")
			}
			Self::Mapping(entries) => {
				entries
					.iter()
					.map(|(key, value)| format!("{key}={value}"))
					.collect::<Vec<_>>()
					.join(",")
			}
			other => other.to_string(),
		}
	}
}

/// Default string form: scalars as text, `null` as the empty string,
/// sequences and mappings as compact JSON.
impl fmt::Display for ReportCell {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Null => Ok(()),
			Self::Bool(value) => write!(f, "{value}"),
			Self::Integer(value) => write!(f, "{value}"),
			Self::Float(value) => {
				if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e16 {
					write!(f, "{value:.1}")
				} else {
					write!(f, "{value}")
				}
			}
			Self::String(value) | Self::Opaque(value) => f.write_str(value),
			Self::Sequence(_) | Self::Mapping(_) => {
				let json = serde_json::to_string(&SerializedCell {
					cell: self,
					flavor: Flavor::Json,
				})
				.map_err(|_| fmt::Error)?;
				f.write_str(&json)
			}
		}
	}
}

impl From<JsonValue> for ReportCell {
	fn from(value: JsonValue) -> Self {
		match value {
			JsonValue::Null => Self::Null,
			JsonValue::Bool(b) => Self::Bool(b),
			JsonValue::Number(n) => {
				n.as_i64()
					.map(Self::Integer)
					.or_else(|| n.as_f64().map(Self::Float))
					.unwrap_or_else(|| Self::Opaque(n.to_string()))
			}
			JsonValue::String(s) => Self::String(s),
			JsonValue::Array(items) => Self::Sequence(items.into_iter().map(Self::from).collect()),
			JsonValue::Object(map) => {
				Self::Mapping(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
			}
		}
	}
}

impl From<&str> for ReportCell {
	fn from(value: &str) -> Self {
		Self::String(value.to_string())
	}
}

impl From<String> for ReportCell {
	fn from(value: String) -> Self {
		Self::String(value)
	}
}

impl From<bool> for ReportCell {
	fn from(value: bool) -> Self {
		Self::Bool(value)
	}
}

impl From<i64> for ReportCell {
	fn from(value: i64) -> Self {
		Self::Integer(value)
	}
}

impl From<f64> for ReportCell {
	fn from(value: f64) -> Self {
		Self::Float(value)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flavor {
	Yaml,
	Json,
}

struct SerializedCell<'a> {
	cell: &'a ReportCell,
	flavor: Flavor,
}

impl SerializedCell<'_> {
	fn nested<'b>(&self, cell: &'b ReportCell) -> SerializedCell<'b> {
		SerializedCell {
			cell,
			flavor: self.flavor,
		}
	}
}

impl Serialize for SerializedCell<'_> {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		match self.cell {
			ReportCell::Null => serializer.serialize_none(),
			ReportCell::Bool(value) => serializer.serialize_bool(*value),
			ReportCell::Integer(value) => serializer.serialize_i64(*value),
			ReportCell::Float(value) => serializer.serialize_f64(*value),
			ReportCell::String(value) | ReportCell::Opaque(value) => serializer.serialize_str(value),
			ReportCell::Sequence(items) => serializer.collect_seq(items.iter().map(|item| self.nested(item))),
			ReportCell::Mapping(entries) => {
				match self.flavor {
					Flavor::Json => {
						serializer.collect_map(
							entries.iter().map(|(key, value)| (key.as_str(), self.nested(value))),
						)
					}
					// YAML keeps the `[key, value]` pair form for mapping cells.
					Flavor::Yaml => {
						serializer.collect_seq(
							entries.iter().map(|(key, value)| (key.as_str(), self.nested(value))),
						)
					}
				}
			}
		}
	}
}

/// One row keyed by the report headers. Missing trailing values serialize
/// as null and values past the last header are dropped.
struct SerializedRow<'a> {
	headers: &'a [String],
	values: &'a [ReportCell],
	flavor: Flavor,
}

impl Serialize for SerializedRow<'_> {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		let mut map = serializer.serialize_map(Some(self.headers.len()))?;
		for (index, header) in self.headers.iter().enumerate() {
			let cell = self.values.get(index).unwrap_or(&ReportCell::Null);
			map.serialize_entry(
				header,
				&SerializedCell {
					cell,
					flavor: self.flavor,
				},
			)?;
		}
		map.end()
	}
}

/// Headers and rows accumulated during a render.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportBuffer {
	headers: Vec<String>,
	rows: Vec<Vec<ReportCell>>,
}

impl ReportBuffer {
	pub fn headers(&self) -> &[String] {
		&self.headers
	}

	pub fn rows(&self) -> &[Vec<ReportCell>] {
		&self.rows
	}

	pub fn is_empty(&self) -> bool {
		self.headers.is_empty() && self.rows.is_empty()
	}

	/// Replace the headers with the given labels.
	pub fn set_headers<I, S>(&mut self, labels: I)
	where
		I: IntoIterator<Item = S>,
		S: ToString,
	{
		self.headers = labels.into_iter().map(|label| label.to_string()).collect();
	}

	/// Append the row's values in insertion order.
	///
	/// Headers only grow when the row has more distinct keys than there are
	/// headers. A row that introduces new keys without exceeding the header
	/// count keeps the headers unchanged, so its values are matched to the
	/// existing headers by position.
	pub fn add_row(&mut self, row: Vec<(String, ReportCell)>) {
		let mut keys: Vec<&str> = Vec::with_capacity(row.len());
		for (key, _) in &row {
			if !keys.contains(&key.as_str()) {
				keys.push(key);
			}
		}

		if self.headers.len() < keys.len() {
			let missing: Vec<String> = keys
				.into_iter()
				.filter(|key| !self.headers.iter().any(|header| header.as_str() == *key))
				.map(ToString::to_string)
				.collect();
			self.headers.extend(missing);
		}

		self.rows.push(row.into_iter().map(|(_, value)| value).collect());
	}

	/// Serialize the buffer. `title` is used by the HTML document.
	pub fn render(&self, format: ReportFormat, title: &str) -> StencilResult<String> {
		match format {
			ReportFormat::Csv | ReportFormat::Txt => self.render_csv(),
			ReportFormat::Yaml => self.render_yaml(),
			ReportFormat::Json => self.render_json(),
			ReportFormat::Html => Ok(self.render_html(title)),
		}
	}

	/// Serialize using a format tag. Unknown tags render an empty string.
	pub fn render_tag(&self, format: &str, title: &str) -> StencilResult<String> {
		match format.parse::<ReportFormat>() {
			Ok(format) => self.render(format, title),
			Err(_) => {
				tracing::warn!(format, "unsupported report format, rendering nothing");
				Ok(String::new())
			}
		}
	}

	fn serialized_rows(&self, flavor: Flavor) -> Vec<SerializedRow<'_>> {
		self.rows
			.iter()
			.map(|values| {
				SerializedRow {
					headers: &self.headers,
					values,
					flavor,
				}
			})
			.collect()
	}

	fn render_csv(&self) -> StencilResult<String> {
		let serialize_error = |reason: String| {
			StencilError::ReportSerialize {
				format: ReportFormat::Csv.to_string(),
				reason,
			}
		};

		let mut writer = csv::WriterBuilder::new()
			.flexible(true)
			.terminator(csv::Terminator::Any(b'\n'))
			.from_writer(Vec::new());

		if !self.headers.is_empty() {
			writer
				.write_record(&self.headers)
				.map_err(|e| serialize_error(e.to_string()))?;
		}
		for row in &self.rows {
			writer
				.write_record(row.iter().map(ReportCell::csv_field))
				.map_err(|e| serialize_error(e.to_string()))?;
		}

		let bytes = writer
			.into_inner()
			.map_err(|e| serialize_error(e.to_string()))?;
		String::from_utf8(bytes).map_err(|e| serialize_error(e.to_string()))
	}

	fn render_yaml(&self) -> StencilResult<String> {
		let body = serde_yaml_ng::to_string(&self.serialized_rows(Flavor::Yaml)).map_err(|e| {
			StencilError::ReportSerialize {
				format: ReportFormat::Yaml.to_string(),
				reason: e.to_string(),
			}
		})?;

		if self.rows.is_empty() {
			Ok(format!("--- {body}"))
		} else {
			Ok(format!("---\n{body}"))
		}
	}

	fn render_json(&self) -> StencilResult<String> {
		serde_json::to_string(&self.serialized_rows(Flavor::Json)).map_err(|e| {
			StencilError::ReportSerialize {
				format: ReportFormat::Json.to_string(),
				reason: e.to_string(),
			}
		})
	}

	fn render_html(&self, title: &str) -> String {
		let mut html = String::new();
		let _ = write!(
			html,
			"<html><head><title>{}</title><style>{HTML_STYLE}</style></head><body><table><thead><tr>",
			html_escape(title)
		);
		for header in &self.headers {
			let _ = write!(html, "<th>{}</th>", html_escape(header));
		}
		html.push_str("</tr></thead><tbody>");

		for row in &self.rows {
			html.push_str("<tr>");
			for cell in row {
				let _ = write!(html, "<td>{}</td>", html_escape(&cell.to_string()));
			}
			html.push_str("</tr>");
		}
		html.push_str("</tbody></table></body></html>");

		html
	}
}

fn html_escape(s: &str) -> String {
	s.replace('&', "&amp;")
		.replace('<', "&lt;")
		.replace('>', "&gt;")
		.replace('"', "&quot;")
		.replace('\'', "&#39;")
}
