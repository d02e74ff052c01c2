//! Static entity metadata consumed by query-building code
//!
//! A descriptor is defined once at process start and shared immutably
//! (`Arc`) between the repository that reads the entity and the session
//! that flushes mutations against it.

use crate::error::{DatabaseError, DbResult};
use std::sync::Arc;

/// How a named relation joins two entities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationKind {
	/// This entity carries `foreign_key` referencing the target's primary
	/// key (e.g. an order pointing at its client).
	ManyToOne { foreign_key: String },
	/// The target carries `foreign_key` referencing this entity's primary
	/// key (e.g. a client owning its orders).
	OneToMany { foreign_key: String },
}

/// A named relation to another entity.
#[derive(Debug, Clone)]
pub struct Relation {
	name: String,
	target: Arc<EntityDescriptor>,
	kind: RelationKind,
}

impl Relation {
	pub fn many_to_one(
		name: impl Into<String>,
		target: Arc<EntityDescriptor>,
		foreign_key: impl Into<String>,
	) -> Self {
		Self {
			name: name.into(),
			target,
			kind: RelationKind::ManyToOne {
				foreign_key: foreign_key.into(),
			},
		}
	}

	pub fn one_to_many(
		name: impl Into<String>,
		target: Arc<EntityDescriptor>,
		foreign_key: impl Into<String>,
	) -> Self {
		Self {
			name: name.into(),
			target,
			kind: RelationKind::OneToMany {
				foreign_key: foreign_key.into(),
			},
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn target(&self) -> &Arc<EntityDescriptor> {
		&self.target
	}

	pub fn kind(&self) -> &RelationKind {
		&self.kind
	}
}

/// Immutable table metadata: identity, columns, primary key, relations,
/// and the entity's delete policy (a declared soft-delete column means the
/// entity is never hard-deleted and reads skip marked rows).
#[derive(Debug, Clone)]
pub struct EntityDescriptor {
	table: String,
	columns: Vec<String>,
	primary_key: String,
	soft_delete_column: Option<String>,
	relations: Vec<Relation>,
}

impl EntityDescriptor {
	/// Start building a descriptor for `table`.
	///
	/// # Examples
	///
	/// ```
	/// use grappelli_db::descriptor::EntityDescriptor;
	///
	/// let clients = EntityDescriptor::builder("clients")
	///     .columns(["id", "name", "email"])
	///     .primary_key("id")
	///     .build()
	///     .unwrap();
	/// assert_eq!(clients.table(), "clients");
	/// assert_eq!(clients.primary_key(), "id");
	/// ```
	pub fn builder(table: impl Into<String>) -> EntityDescriptorBuilder {
		EntityDescriptorBuilder {
			table: table.into(),
			columns: Vec::new(),
			primary_key: None,
			soft_delete_column: None,
			relations: Vec::new(),
		}
	}

	pub fn table(&self) -> &str {
		&self.table
	}

	pub fn columns(&self) -> &[String] {
		&self.columns
	}

	pub fn primary_key(&self) -> &str {
		&self.primary_key
	}

	pub fn soft_delete_column(&self) -> Option<&str> {
		self.soft_delete_column.as_deref()
	}

	pub fn relations(&self) -> &[Relation] {
		&self.relations
	}

	/// Look up a relation by name.
	pub fn relation(&self, name: &str) -> Option<&Relation> {
		self.relations.iter().find(|r| r.name() == name)
	}

	pub fn has_column(&self, column: &str) -> bool {
		self.columns.iter().any(|c| c == column)
	}
}

/// Builder for [`EntityDescriptor`]; `build` validates the metadata as a
/// whole.
pub struct EntityDescriptorBuilder {
	table: String,
	columns: Vec<String>,
	primary_key: Option<String>,
	soft_delete_column: Option<String>,
	relations: Vec<Relation>,
}

impl EntityDescriptorBuilder {
	pub fn column(mut self, column: impl Into<String>) -> Self {
		self.columns.push(column.into());
		self
	}

	pub fn columns<I, S>(mut self, columns: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.columns.extend(columns.into_iter().map(Into::into));
		self
	}

	pub fn primary_key(mut self, column: impl Into<String>) -> Self {
		self.primary_key = Some(column.into());
		self
	}

	/// Declare the entity soft-deleted through `column` instead of removed.
	pub fn soft_delete(mut self, column: impl Into<String>) -> Self {
		self.soft_delete_column = Some(column.into());
		self
	}

	pub fn relation(mut self, relation: Relation) -> Self {
		self.relations.push(relation);
		self
	}

	pub fn build(self) -> DbResult<Arc<EntityDescriptor>> {
		if self.table.is_empty() {
			return Err(invalid("table name must not be empty"));
		}
		if self.columns.is_empty() {
			return Err(invalid(&format!("{}: no columns declared", self.table)));
		}
		let primary_key = self
			.primary_key
			.ok_or_else(|| invalid(&format!("{}: no primary key declared", self.table)))?;
		if !self.columns.contains(&primary_key) {
			return Err(invalid(&format!(
				"{}: primary key {primary_key} is not a declared column",
				self.table
			)));
		}
		if let Some(column) = &self.soft_delete_column
			&& !self.columns.contains(column)
		{
			return Err(invalid(&format!(
				"{}: soft delete column {column} is not a declared column",
				self.table
			)));
		}
		for relation in &self.relations {
			let duplicates = self
				.relations
				.iter()
				.filter(|r| r.name() == relation.name())
				.count();
			if duplicates > 1 {
				return Err(invalid(&format!(
					"{}: duplicate relation name {}",
					self.table,
					relation.name()
				)));
			}
			match relation.kind() {
				RelationKind::ManyToOne { foreign_key } => {
					if !self.columns.contains(foreign_key) {
						return Err(invalid(&format!(
							"{}: relation {} foreign key {foreign_key} is not a declared column",
							self.table,
							relation.name()
						)));
					}
				}
				RelationKind::OneToMany { foreign_key } => {
					if !relation.target().has_column(foreign_key) {
						return Err(invalid(&format!(
							"{}: relation {} foreign key {foreign_key} is not a column of {}",
							self.table,
							relation.name(),
							relation.target().table()
						)));
					}
				}
			}
		}

		Ok(Arc::new(EntityDescriptor {
			table: self.table,
			columns: self.columns,
			primary_key,
			soft_delete_column: self.soft_delete_column,
			relations: self.relations,
		}))
	}
}

fn invalid(message: &str) -> DatabaseError {
	DatabaseError::InvalidDescriptor(message.to_string())
}
