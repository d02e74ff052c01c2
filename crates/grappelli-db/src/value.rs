//! Common value and row types for database abstraction

use crate::error::{DatabaseError, DbResult};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sqlx::any::AnyRow;
use sqlx::{Column, Row as SqlxRow};

/// An owned database value.
///
/// This is the lingua franca between the descriptor-driven repository,
/// the session's pending mutation queue, and the driver layer. The set of
/// variants matches what the `sqlx` `Any` driver can bind and decode on
/// every supported backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SqlValue {
	Null,
	Bool(bool),
	Int(i64),
	Float(f64),
	Text(String),
	Bytes(Vec<u8>),
}

impl SqlValue {
	/// Whether this value is SQL `NULL`.
	pub fn is_null(&self) -> bool {
		matches!(self, SqlValue::Null)
	}

	/// Convert a JSON value into a database value.
	///
	/// Arrays and objects are carried as their JSON text, which matches how
	/// document-ish columns are stored on backends without a native JSON
	/// binding in the `Any` driver.
	///
	/// # Examples
	///
	/// ```
	/// use grappelli_db::value::SqlValue;
	///
	/// assert_eq!(SqlValue::from_json(&serde_json::json!(42)), SqlValue::Int(42));
	/// assert_eq!(SqlValue::from_json(&serde_json::json!(null)), SqlValue::Null);
	/// ```
	pub fn from_json(value: &serde_json::Value) -> Self {
		match value {
			serde_json::Value::Null => SqlValue::Null,
			serde_json::Value::Bool(b) => SqlValue::Bool(*b),
			serde_json::Value::Number(n) => {
				if let Some(i) = n.as_i64() {
					SqlValue::Int(i)
				} else if let Some(f) = n.as_f64() {
					SqlValue::Float(f)
				} else {
					SqlValue::Null
				}
			}
			serde_json::Value::String(s) => SqlValue::Text(s.clone()),
			serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
				SqlValue::Text(value.to_string())
			}
		}
	}

	/// Convert this value into its JSON representation.
	pub fn to_json(&self) -> serde_json::Value {
		match self {
			SqlValue::Null => serde_json::Value::Null,
			SqlValue::Bool(b) => serde_json::Value::Bool(*b),
			SqlValue::Int(i) => serde_json::Value::from(*i),
			SqlValue::Float(f) => {
				serde_json::Number::from_f64(*f).map_or(serde_json::Value::Null, serde_json::Value::Number)
			}
			SqlValue::Text(s) => serde_json::Value::String(s.clone()),
			SqlValue::Bytes(b) => serde_json::Value::String(
				b.iter().map(|byte| format!("{byte:02x}")).collect::<String>(),
			),
		}
	}

	/// Lower a `sea_query` value produced by a built statement into a
	/// bindable [`SqlValue`].
	///
	/// Width-widening casts mirror what the `Any` driver supports; value
	/// kinds outside the portable set degrade to their text form.
	pub fn from_query_value(value: sea_query::Value) -> Self {
		use sea_query::Value as V;
		match value {
			V::Bool(Some(b)) => SqlValue::Bool(b),
			V::TinyInt(Some(i)) => SqlValue::Int(i as i64),
			V::SmallInt(Some(i)) => SqlValue::Int(i as i64),
			V::Int(Some(i)) => SqlValue::Int(i as i64),
			V::BigInt(Some(i)) => SqlValue::Int(i),
			V::TinyUnsigned(Some(i)) => SqlValue::Int(i as i64),
			V::SmallUnsigned(Some(i)) => SqlValue::Int(i as i64),
			V::Unsigned(Some(i)) => SqlValue::Int(i as i64),
			V::BigUnsigned(Some(i)) => SqlValue::Int(i as i64),
			V::Float(Some(f)) => SqlValue::Float(f as f64),
			V::Double(Some(f)) => SqlValue::Float(f),
			V::Char(Some(c)) => SqlValue::Text(c.to_string()),
			V::String(Some(s)) => SqlValue::Text(s),
			V::Bytes(Some(b)) => SqlValue::Bytes(b),
			V::Json(Some(j)) => SqlValue::Text(j.to_string()),
			_ => SqlValue::Null,
		}
	}

	/// Lift this value into a `sea_query` value for statement building.
	pub fn to_query_value(&self) -> sea_query::Value {
		match self {
			SqlValue::Null => sea_query::Value::BigInt(None),
			SqlValue::Bool(b) => sea_query::Value::Bool(Some(*b)),
			SqlValue::Int(i) => sea_query::Value::BigInt(Some(*i)),
			SqlValue::Float(f) => sea_query::Value::Double(Some(*f)),
			SqlValue::Text(s) => sea_query::Value::String(Some(s.clone())),
			SqlValue::Bytes(b) => sea_query::Value::Bytes(Some(b.clone())),
		}
	}
}

impl From<bool> for SqlValue {
	fn from(b: bool) -> Self {
		SqlValue::Bool(b)
	}
}

impl From<i32> for SqlValue {
	fn from(i: i32) -> Self {
		SqlValue::Int(i as i64)
	}
}

impl From<i64> for SqlValue {
	fn from(i: i64) -> Self {
		SqlValue::Int(i)
	}
}

impl From<f64> for SqlValue {
	fn from(f: f64) -> Self {
		SqlValue::Float(f)
	}
}

impl From<&str> for SqlValue {
	fn from(s: &str) -> Self {
		SqlValue::Text(s.to_string())
	}
}

impl From<String> for SqlValue {
	fn from(s: String) -> Self {
		SqlValue::Text(s)
	}
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
	fn from(value: Option<T>) -> Self {
		value.map_or(SqlValue::Null, Into::into)
	}
}

/// A decoded result row with columns in selection order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SqlRow {
	columns: IndexMap<String, SqlValue>,
}

impl SqlRow {
	pub fn new() -> Self {
		Self::default()
	}

	/// Insert a column value, replacing any previous value for the name.
	pub fn insert(&mut self, column: impl Into<String>, value: SqlValue) {
		self.columns.insert(column.into(), value);
	}

	/// Look up a column by name.
	pub fn get(&self, column: &str) -> Option<&SqlValue> {
		self.columns.get(column)
	}

	/// Number of columns in the row.
	pub fn len(&self) -> usize {
		self.columns.len()
	}

	pub fn is_empty(&self) -> bool {
		self.columns.is_empty()
	}

	/// Convert the row into a JSON object.
	pub fn into_json(self) -> serde_json::Value {
		let mut map = serde_json::Map::with_capacity(self.columns.len());
		for (name, value) in self.columns {
			map.insert(name, value.to_json());
		}
		serde_json::Value::Object(map)
	}

	/// Decode a driver row into an owned [`SqlRow`].
	pub fn from_any_row(row: &AnyRow) -> DbResult<Self> {
		let mut decoded = SqlRow::new();
		for column in row.columns() {
			let name = column.name().to_string();
			let value = decode_column(row, column.ordinal(), &name)?;
			decoded.insert(name, value);
		}
		Ok(decoded)
	}
}

/// Decode one column through the `Any` driver's portable type set.
///
/// `NULL` decodes as `Ok(None)` for every `Option` type, so the first
/// probe settles it; otherwise the probes run from the most to the least
/// specific kind and a value no probe accepts is an explicit error.
fn decode_column(row: &AnyRow, ordinal: usize, name: &str) -> DbResult<SqlValue> {
	if let Ok(value) = row.try_get::<Option<i64>, _>(ordinal) {
		return Ok(value.into());
	}
	if let Ok(value) = row.try_get::<Option<f64>, _>(ordinal) {
		return Ok(value.into());
	}
	if let Ok(value) = row.try_get::<Option<bool>, _>(ordinal) {
		return Ok(value.into());
	}
	if let Ok(value) = row.try_get::<Option<String>, _>(ordinal) {
		return Ok(value.into());
	}
	match row.try_get::<Option<Vec<u8>>, _>(ordinal) {
		Ok(value) => Ok(value.map_or(SqlValue::Null, SqlValue::Bytes)),
		Err(error) => Err(DatabaseError::UnsupportedValue {
			column: name.to_string(),
			detail: error.to_string(),
		}),
	}
}

impl IntoIterator for SqlRow {
	type Item = (String, SqlValue);
	type IntoIter = indexmap::map::IntoIter<String, SqlValue>;

	fn into_iter(self) -> Self::IntoIter {
		self.columns.into_iter()
	}
}

/// Column-to-value assignments for one entity row, in declaration order.
pub type ColumnValues = IndexMap<String, SqlValue>;

/// Filter-key-to-value assignments supplied with a list query.
pub type FilterValues = IndexMap<String, SqlValue>;

/// Outcome of a single mutating statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecResult {
	pub rows_affected: u64,
	/// Key generated by the database for an insert, when the backend
	/// reports one through the driver (`RETURNING` is used where it does
	/// not).
	pub last_insert_id: Option<i64>,
}
