//! Template-facing views of records, hosts and batch cursors.

use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use minijinja::Error;
use minijinja::ErrorKind;
use minijinja::State;
use minijinja::value::Enumerator;
use minijinja::value::Object;
use minijinja::value::ObjectRepr;
use minijinja::value::Value;
use minijinja::value::ValueKind;
use serde_json::Value as JsonValue;

use crate::BatchCursor;
use crate::HostEntity;
use crate::Record;
use crate::ReportCell;
use crate::ResourceKind;
use crate::Scope;

/// Convert inventory JSON into a template value.
pub fn json_value(value: &JsonValue) -> Value {
	Value::from_serialize(value)
}

/// A loaded record. Fields, `parameters` and loaded associations are
/// reachable as attributes.
#[derive(Debug)]
pub struct RecordObject(pub Record);

impl RecordObject {
	pub fn value(record: Record) -> Value {
		Value::from_object(Self(record))
	}
}

impl Object for RecordObject {
	fn repr(self: &Arc<Self>) -> ObjectRepr {
		ObjectRepr::Map
	}

	fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
		let key = key.as_str()?;
		let record = &self.0;
		if key == "parameters" {
			return Some(Value::from_serialize(&record.parameters));
		}

		if let Some(related) = record.associations.get(key) {
			let many = record
				.kind
				.association(key)
				.is_none_or(|association| association.many);
			return Some(if many {
				related.iter().cloned().map(RecordObject::value).collect()
			} else {
				related
					.first()
					.cloned()
					.map_or_else(|| Value::from(()), RecordObject::value)
			});
		}

		record.attribute(key).as_ref().map(json_value)
	}

	fn enumerate(self: &Arc<Self>) -> Enumerator {
		let record = &self.0;
		let mut keys: Vec<Value> = vec![Value::from("id"), Value::from("name")];
		keys.extend(record.fields.keys().map(|key| Value::from(key.as_str())));
		keys.extend(record.associations.keys().map(|key| Value::from(key.as_str())));
		Enumerator::Values(keys)
	}

	fn render(self: &Arc<Self>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0.name)
	}
}

/// A host facet. Attributes resolve through [`HostEntity::attribute`].
#[derive(Debug)]
pub struct HostObject(pub Arc<dyn HostEntity>);

impl HostObject {
	pub fn value(host: Arc<dyn HostEntity>) -> Value {
		Value::from_object(Self(host))
	}
}

impl Object for HostObject {
	fn repr(self: &Arc<Self>) -> ObjectRepr {
		ObjectRepr::Map
	}

	fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
		let key = key.as_str()?;
		let host = &self.0;
		match key {
			"name" => Some(Value::from(host.name())),
			"params" => Some(Value::from_serialize(host.params())),
			"puppetclasses" => Some(Value::from_serialize(host.puppetclasses())),
			_ => host.attribute(key).as_ref().map(json_value),
		}
	}

	fn enumerate(self: &Arc<Self>) -> Enumerator {
		Enumerator::Str(&["name", "params", "puppetclasses"])
	}

	fn render(self: &Arc<Self>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.0.name())
	}
}

/// Loader result. Iterating yields records; `.batches()` yields batches.
/// Either way the cursor is consumed once. A failed batch is recorded on
/// the scope, which aborts the render.
pub struct CursorObject {
	cursor: Mutex<Option<BatchCursor>>,
	scope: Arc<Scope>,
}

impl fmt::Debug for CursorObject {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("CursorObject").finish_non_exhaustive()
	}
}

impl CursorObject {
	pub fn value(cursor: BatchCursor, scope: Arc<Scope>) -> Value {
		Value::from_object(Self {
			cursor: Mutex::new(Some(cursor)),
			scope,
		})
	}

	fn take(&self) -> Option<BatchCursor> {
		self.cursor
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.take()
	}
}

impl Object for CursorObject {
	fn repr(self: &Arc<Self>) -> ObjectRepr {
		ObjectRepr::Iterable
	}

	fn enumerate(self: &Arc<Self>) -> Enumerator {
		let Some(cursor) = self.take() else {
			return Enumerator::Empty;
		};

		let scope = self.scope.clone();
		let records = cursor.records().map_while(move |record| {
			match record {
				Ok(record) => Some(RecordObject::value(record)),
				Err(error) => {
					scope.record_failure(error);
					None
				}
			}
		});
		Enumerator::Iter(Box::new(records))
	}

	/// Unknown without pulling the cursor.
	fn enumerator_len(self: &Arc<Self>) -> Option<usize> {
		None
	}

	fn call_method(
		self: &Arc<Self>,
		_state: &State<'_, '_>,
		method: &str,
		args: &[Value],
	) -> Result<Value, Error> {
		if method != "batches" {
			return Err(Error::from(ErrorKind::UnknownMethod));
		}
		if !args.is_empty() {
			return Err(Error::from(ErrorKind::TooManyArguments));
		}

		let Some(cursor) = self.take() else {
			return Ok(Value::from(Vec::<Value>::new()));
		};

		let scope = self.scope.clone();
		let batches = cursor.map_while(move |batch| {
			match batch {
				Ok(batch) => Some(batch.into_iter().map(RecordObject::value).collect::<Value>()),
				Err(error) => {
					scope.record_failure(error);
					None
				}
			}
		});
		Ok(Value::make_one_shot_iterator(batches))
	}
}

/// An entity argument handed to a macro.
#[derive(Debug, Clone)]
pub enum Entity {
	Record(Record),
	Host(Arc<dyn HostEntity>),
	/// Anything else, kept for wrong-kind errors.
	Other { name: String, class: String },
}

impl Entity {
	/// `None` for `none` and undefined values.
	pub fn from_value(value: &Value) -> Option<Entity> {
		if value.is_none() || value.is_undefined() {
			return None;
		}
		if let Some(record) = value.downcast_object_ref::<RecordObject>() {
			return Some(Entity::Record(record.0.clone()));
		}
		if let Some(host) = value.downcast_object_ref::<HostObject>() {
			return Some(Entity::Host(host.0.clone()));
		}

		Some(Entity::Other {
			name: value.to_string(),
			class: value.kind().to_string(),
		})
	}

	pub fn name(&self) -> &str {
		match self {
			Self::Record(record) => &record.name,
			Self::Host(host) => host.name(),
			Self::Other { name, .. } => name,
		}
	}

	pub fn class_name(&self) -> &str {
		match self {
			Self::Record(record) => record.kind.class_name(),
			Self::Host(_) => ResourceKind::Host.class_name(),
			Self::Other { class, .. } => class,
		}
	}

	/// The host facet, for host records and host objects.
	pub fn host(&self) -> Option<&Arc<dyn HostEntity>> {
		match self {
			Self::Record(record) => record.host.as_ref(),
			Self::Host(host) => Some(host),
			Self::Other { .. } => None,
		}
	}
}

/// Classify a template value for the report builder.
pub fn report_cell(value: &Value) -> ReportCell {
	if value.downcast_object_ref::<RecordObject>().is_some()
		|| value.downcast_object_ref::<HostObject>().is_some()
	{
		return ReportCell::Opaque(value.to_string());
	}

	match value.kind() {
		ValueKind::Undefined | ValueKind::None => ReportCell::Null,
		ValueKind::Bool => ReportCell::Bool(value.is_true()),
		ValueKind::Number => {
			serde_json::to_value(value)
				.map_or_else(|_| ReportCell::Opaque(value.to_string()), ReportCell::from)
		}
		ValueKind::String => ReportCell::String(value.as_str().unwrap_or_default().to_string()),
		ValueKind::Seq => {
			match value.try_iter() {
				Ok(items) => ReportCell::Sequence(items.map(|item| report_cell(&item)).collect()),
				Err(_) => ReportCell::Opaque(value.to_string()),
			}
		}
		ValueKind::Map => {
			let Ok(keys) = value.try_iter() else {
				return ReportCell::Opaque(value.to_string());
			};
			let entries = keys
				.map(|key| {
					let cell = value
						.get_item(&key)
						.map_or(ReportCell::Null, |item| report_cell(&item));
					(key.to_string(), cell)
				})
				.collect();
			ReportCell::Mapping(entries)
		}
		_ => ReportCell::Opaque(value.to_string()),
	}
}
