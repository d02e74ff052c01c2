//! Generic entity repository
//!
//! Built once per entity from a descriptor plus defaults for column
//! selection, relation inclusion, ordering, and a declarative filter set.
//! Every read an entity's endpoints need (filtered lists, counted pages,
//! primary-key lookups) goes through the same statement assembly, so
//! selection and relation shape stay consistent across them.

use crate::descriptor::{EntityDescriptor, RelationKind};
use crate::error::{DatabaseError, DbResult};
use crate::session::Session;
use crate::value::{FilterValues, SqlValue};
use sea_query::{Alias, Cond, Condition, Expr, ExprTrait, LikeExpr, Order, Query, SelectStatement};
use std::collections::HashMap;
use std::sync::Arc;

/// Predicate kind a filter key maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
	Equals,
	/// Case-sensitive substring match (`LIKE %value%`, escaped).
	Contains,
	GreaterOrEqual,
	LessOrEqual,
}

/// One declarative filter: a key in the incoming filter map, the column it
/// constrains, and the predicate kind. Filters apply in declared order and
/// combine with AND.
#[derive(Debug, Clone)]
pub struct FilterSpec {
	key: String,
	column: String,
	op: FilterOp,
}

impl FilterSpec {
	pub fn new(key: impl Into<String>, column: impl Into<String>, op: FilterOp) -> Self {
		Self {
			key: key.into(),
			column: column.into(),
			op,
		}
	}

	pub fn key(&self) -> &str {
		&self.key
	}
}

/// Sort direction for a default ordering column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
	Asc,
	Desc,
}

/// Options for an unpaged list.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
	pub filters: FilterValues,
	pub limit: Option<u64>,
	pub offset: Option<u64>,
}

/// A validated pagination window; `page` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
	pub page: u64,
	pub page_size: u64,
}

/// One counted page of rows.
#[derive(Debug, Clone, PartialEq)]
pub struct PagedRows {
	pub rows: Vec<serde_json::Value>,
	pub total_items: u64,
}

/// Read operations over one entity, parameterized by its descriptor.
pub struct EntityRepository {
	descriptor: Arc<EntityDescriptor>,
	selection: Vec<String>,
	includes: Vec<String>,
	ordering: Vec<(String, SortOrder)>,
	filters: Vec<FilterSpec>,
}

impl EntityRepository {
	/// Start building a repository for `descriptor`.
	///
	/// # Examples
	///
	/// ```
	/// use grappelli_db::descriptor::EntityDescriptor;
	/// use grappelli_db::repository::{EntityRepository, FilterOp, FilterSpec, SortOrder};
	///
	/// let clients = EntityDescriptor::builder("clients")
	///     .columns(["id", "name", "email"])
	///     .primary_key("id")
	///     .build()
	///     .unwrap();
	///
	/// let repository = EntityRepository::builder(clients)
	///     .order_by("id", SortOrder::Asc)
	///     .filter(FilterSpec::new("name", "name", FilterOp::Contains))
	///     .build()
	///     .unwrap();
	/// assert_eq!(repository.descriptor().table(), "clients");
	/// ```
	pub fn builder(descriptor: Arc<EntityDescriptor>) -> EntityRepositoryBuilder {
		EntityRepositoryBuilder {
			descriptor,
			selection: None,
			includes: Vec::new(),
			ordering: Vec::new(),
			filters: Vec::new(),
		}
	}

	pub fn descriptor(&self) -> &Arc<EntityDescriptor> {
		&self.descriptor
	}

	/// List entities: filters, selection, relation inclusion, ordering,
	/// then the optional window.
	pub async fn list(
		&self,
		session: &mut Session,
		options: &ListOptions,
	) -> DbResult<Vec<serde_json::Value>> {
		let mut stmt = self.base_select();
		stmt.cond_where(self.build_condition(&options.filters)?);
		self.apply_ordering(&mut stmt);
		if let Some(limit) = options.limit {
			stmt.limit(limit);
		}
		if let Some(offset) = options.offset {
			stmt.offset(offset);
		}

		let rows = session.fetch_all(&stmt).await?;
		let mut items: Vec<serde_json::Value> = rows.into_iter().map(|r| r.into_json()).collect();
		self.attach_relations(session, &mut items).await?;
		Ok(items)
	}

	/// List one counted page.
	///
	/// `page` and `page_size` are positive integers, validated upstream by
	/// the service layer; the window is `(page-1)*page_size..page*page_size`.
	pub async fn list_paged(
		&self,
		session: &mut Session,
		filters: &FilterValues,
		page: &PageRequest,
	) -> DbResult<PagedRows> {
		let condition = self.build_condition(filters)?;

		let mut count_stmt = Query::select();
		count_stmt
			.from(Alias::new(self.descriptor.table()))
			.expr_as(Expr::cust("COUNT(*)"), Alias::new("total"))
			.cond_where(condition.clone());
		let total_items = match session.fetch_optional(&count_stmt).await? {
			Some(row) => match row.get("total") {
				Some(SqlValue::Int(count)) => *count as u64,
				_ => 0,
			},
			None => 0,
		};

		let mut stmt = self.base_select();
		stmt.cond_where(condition);
		self.apply_ordering(&mut stmt);
		stmt.limit(page.page_size);
		stmt.offset(page.page.saturating_sub(1) * page.page_size);

		let rows = session.fetch_all(&stmt).await?;
		let mut items: Vec<serde_json::Value> = rows.into_iter().map(|r| r.into_json()).collect();
		self.attach_relations(session, &mut items).await?;

		Ok(PagedRows {
			rows: items,
			total_items,
		})
	}

	/// Find one entity by primary key, with the same selection and
	/// relation shape as a list. `Ok(None)` when no row matches.
	pub async fn find_by_id(
		&self,
		session: &mut Session,
		id: &SqlValue,
	) -> DbResult<Option<serde_json::Value>> {
		let mut stmt = self.base_select();
		let condition = self
			.live_rows_condition()
			.add(Expr::col(Alias::new(self.descriptor.primary_key())).eq(id.to_query_value()));
		stmt.cond_where(condition);

		match session.fetch_optional(&stmt).await? {
			Some(row) => {
				let mut items = vec![row.into_json()];
				self.attach_relations(session, &mut items).await?;
				Ok(items.pop())
			}
			None => Ok(None),
		}
	}

	fn base_select(&self) -> SelectStatement {
		let mut stmt = Query::select();
		stmt.from(Alias::new(self.descriptor.table()));
		stmt.columns(self.selection.iter().map(|c| Alias::new(c.as_str())));
		stmt
	}

	fn apply_ordering(&self, stmt: &mut SelectStatement) {
		for (column, order) in &self.ordering {
			let direction = match order {
				SortOrder::Asc => Order::Asc,
				SortOrder::Desc => Order::Desc,
			};
			stmt.order_by(Alias::new(column.as_str()), direction);
		}
	}

	/// Base condition excluding soft-deleted rows for entities that
	/// declare a marker column.
	fn live_rows_condition(&self) -> Condition {
		let mut condition = Cond::all();
		if let Some(column) = self.descriptor.soft_delete_column() {
			condition = condition.add(Expr::col(Alias::new(column)).is_null());
		}
		condition
	}

	/// Turn a filter-value map into an AND condition, in declared order.
	///
	/// Missing values add no predicate; string values are trimmed and a
	/// blank result is treated as "no filter", never "match empty string".
	fn build_condition(&self, values: &FilterValues) -> DbResult<Condition> {
		for key in values.keys() {
			if !self.filters.iter().any(|spec| spec.key == *key) {
				return Err(DatabaseError::QueryBuild(format!(
					"{}: no filter declared for key {key}",
					self.descriptor.table()
				)));
			}
		}

		let mut condition = self.live_rows_condition();
		for spec in &self.filters {
			let Some(value) = values.get(&spec.key) else {
				continue;
			};
			let value = match value {
				SqlValue::Null => continue,
				SqlValue::Text(s) => {
					let trimmed = s.trim();
					if trimmed.is_empty() {
						continue;
					}
					SqlValue::Text(trimmed.to_string())
				}
				other => other.clone(),
			};

			let column = Expr::col(Alias::new(spec.column.as_str()));
			let predicate = match spec.op {
				FilterOp::Equals => column.eq(value.to_query_value()),
				FilterOp::Contains => {
					let SqlValue::Text(text) = &value else {
						return Err(DatabaseError::QueryBuild(format!(
							"{}: contains filter {} requires a string value",
							self.descriptor.table(),
							spec.key
						)));
					};
					let pattern = format!("%{}%", escape_like(text));
					column.like(LikeExpr::new(pattern).escape('\\'))
				}
				FilterOp::GreaterOrEqual => column.gte(value.to_query_value()),
				FilterOp::LessOrEqual => column.lte(value.to_query_value()),
			};
			condition = condition.add(predicate);
		}
		Ok(condition)
	}

	/// Load included relations for the given items with one batched query
	/// per relation, and attach them as nested JSON.
	async fn attach_relations(
		&self,
		session: &mut Session,
		items: &mut [serde_json::Value],
	) -> DbResult<()> {
		if items.is_empty() {
			return Ok(());
		}
		for name in &self.includes {
			let relation = self
				.descriptor
				.relation(name)
				.ok_or_else(|| DatabaseError::QueryBuild(format!("unknown relation {name}")))?;
			let target = relation.target();

			match relation.kind() {
				RelationKind::OneToMany { foreign_key } => {
					let keys = collect_keys(items, self.descriptor.primary_key());
					let grouped =
						self.fetch_related(session, target, foreign_key, &keys, foreign_key).await?;
					for item in items.iter_mut() {
						let key = json_key(&item[self.descriptor.primary_key()]);
						let related = grouped.get(&key).cloned().unwrap_or_default();
						item[name.as_str()] = serde_json::Value::Array(related);
					}
				}
				RelationKind::ManyToOne { foreign_key } => {
					let keys = collect_keys(items, foreign_key);
					let grouped = self
						.fetch_related(session, target, target.primary_key(), &keys, target.primary_key())
						.await?;
					for item in items.iter_mut() {
						let key = json_key(&item[foreign_key.as_str()]);
						let related = grouped
							.get(&key)
							.and_then(|rows| rows.first().cloned())
							.unwrap_or(serde_json::Value::Null);
						item[name.as_str()] = related;
					}
				}
			}
		}
		Ok(())
	}

	/// Fetch target rows whose `match_column` is in `keys`, grouped by
	/// `group_column`.
	async fn fetch_related(
		&self,
		session: &mut Session,
		target: &Arc<EntityDescriptor>,
		match_column: &str,
		keys: &[SqlValue],
		group_column: &str,
	) -> DbResult<HashMap<String, Vec<serde_json::Value>>> {
		let mut grouped: HashMap<String, Vec<serde_json::Value>> = HashMap::new();
		if keys.is_empty() {
			return Ok(grouped);
		}

		let mut stmt = Query::select();
		stmt.from(Alias::new(target.table()));
		stmt.columns(target.columns().iter().map(|c| Alias::new(c.as_str())));
		let mut condition = Cond::all().add(
			Expr::col(Alias::new(match_column))
				.is_in(keys.iter().map(|k| k.to_query_value())),
		);
		if let Some(column) = target.soft_delete_column() {
			condition = condition.add(Expr::col(Alias::new(column)).is_null());
		}
		stmt.cond_where(condition);
		stmt.order_by(Alias::new(target.primary_key()), Order::Asc);

		for row in session.fetch_all(&stmt).await? {
			let json = row.into_json();
			let key = json_key(&json[group_column]);
			grouped.entry(key).or_default().push(json);
		}
		Ok(grouped)
	}
}

/// Collect the distinct non-null values of `column` across items.
fn collect_keys(items: &[serde_json::Value], column: &str) -> Vec<SqlValue> {
	let mut seen = std::collections::HashSet::new();
	let mut keys = Vec::new();
	for item in items {
		let value = &item[column];
		if value.is_null() {
			continue;
		}
		if seen.insert(json_key(value)) {
			keys.push(SqlValue::from_json(value));
		}
	}
	keys
}

/// Stable grouping key for a scalar JSON value.
fn json_key(value: &serde_json::Value) -> String {
	value.to_string()
}

/// Escape `LIKE` wildcards so filter values match literally.
fn escape_like(value: &str) -> String {
	let mut escaped = String::with_capacity(value.len());
	for c in value.chars() {
		if matches!(c, '%' | '_' | '\\') {
			escaped.push('\\');
		}
		escaped.push(c);
	}
	escaped
}

/// Builder for [`EntityRepository`]; `build` validates selection, include,
/// ordering, and filter columns against the descriptor.
pub struct EntityRepositoryBuilder {
	descriptor: Arc<EntityDescriptor>,
	selection: Option<Vec<String>>,
	includes: Vec<String>,
	ordering: Vec<(String, SortOrder)>,
	filters: Vec<FilterSpec>,
}

impl EntityRepositoryBuilder {
	/// Restrict the default column selection (defaults to every descriptor
	/// column).
	pub fn select<I, S>(mut self, columns: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.selection = Some(columns.into_iter().map(Into::into).collect());
		self
	}

	/// Include a named relation in every read.
	pub fn include(mut self, relation: impl Into<String>) -> Self {
		self.includes.push(relation.into());
		self
	}

	pub fn order_by(mut self, column: impl Into<String>, order: SortOrder) -> Self {
		self.ordering.push((column.into(), order));
		self
	}

	pub fn filter(mut self, spec: FilterSpec) -> Self {
		self.filters.push(spec);
		self
	}

	pub fn build(self) -> DbResult<EntityRepository> {
		let descriptor = self.descriptor;
		let selection = self
			.selection
			.unwrap_or_else(|| descriptor.columns().to_vec());

		for column in &selection {
			if !descriptor.has_column(column) {
				return Err(invalid(&descriptor, &format!("selected column {column}")));
			}
		}
		// The primary key always rides along: relation attachment and
		// find_by_id depend on it being present in every row.
		let selection = if selection.iter().any(|c| c == descriptor.primary_key()) {
			selection
		} else {
			let mut with_pk = vec![descriptor.primary_key().to_string()];
			with_pk.extend(selection);
			with_pk
		};

		for include in &self.includes {
			if descriptor.relation(include).is_none() {
				return Err(invalid(&descriptor, &format!("included relation {include}")));
			}
		}
		for (column, _) in &self.ordering {
			if !descriptor.has_column(column) {
				return Err(invalid(&descriptor, &format!("ordering column {column}")));
			}
		}
		for spec in &self.filters {
			if !descriptor.has_column(&spec.column) {
				return Err(invalid(
					&descriptor,
					&format!("filter {} column {}", spec.key, spec.column),
				));
			}
			let duplicates = self.filters.iter().filter(|s| s.key == spec.key).count();
			if duplicates > 1 {
				return Err(invalid(&descriptor, &format!("duplicate filter key {}", spec.key)));
			}
		}

		Ok(EntityRepository {
			descriptor,
			selection,
			includes: self.includes,
			ordering: self.ordering,
			filters: self.filters,
		})
	}
}

fn invalid(descriptor: &EntityDescriptor, what: &str) -> DatabaseError {
	DatabaseError::QueryBuild(format!(
		"{}: {what} is not declared on the descriptor",
		descriptor.table()
	))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::pool::{ConnectionPool, PoolConfig};
	use crate::session::SessionFactory;
	use crate::testing::RecordingConnector;
	use crate::value::SqlRow;
	use rstest::rstest;

	fn clients() -> Arc<EntityDescriptor> {
		EntityDescriptor::builder("clients")
			.columns(["id", "name", "email", "created_at"])
			.primary_key("id")
			.build()
			.unwrap()
	}

	fn repository() -> EntityRepository {
		EntityRepository::builder(clients())
			.order_by("id", SortOrder::Asc)
			.filter(FilterSpec::new("name", "name", FilterOp::Contains))
			.filter(FilterSpec::new("email", "email", FilterOp::Equals))
			.filter(FilterSpec::new("created_after", "created_at", FilterOp::GreaterOrEqual))
			.build()
			.unwrap()
	}

	async fn session_over(connector: Arc<RecordingConnector>) -> crate::session::Session {
		let pool = Arc::new(
			ConnectionPool::new(connector, PoolConfig::new().with_min_connections(0)).unwrap(),
		);
		SessionFactory::new(pool).create_session().await.unwrap()
	}

	#[rstest]
	#[tokio::test]
	async fn test_blank_filter_behaves_like_absent_filter() {
		// Arrange
		let repository = repository();
		let connector = Arc::new(RecordingConnector::sqlite());
		let mut session = session_over(connector.clone()).await;

		// Act: one list with a whitespace-only name filter, one with none
		let mut blank = FilterValues::new();
		blank.insert("name".to_string(), SqlValue::Text("  ".to_string()));
		repository
			.list(&mut session, &ListOptions { filters: blank, ..Default::default() })
			.await
			.unwrap();
		repository
			.list(&mut session, &ListOptions::default())
			.await
			.unwrap();

		// Assert: both issued the identical statement, with no predicate
		let statements = connector.statements();
		assert_eq!(statements.len(), 2);
		assert_eq!(statements[0], statements[1]);
		assert!(!statements[0].contains("WHERE"));
	}

	#[rstest]
	#[tokio::test]
	async fn test_filters_combine_with_and_in_declared_order() {
		// Arrange
		let repository = repository();
		let connector = Arc::new(RecordingConnector::sqlite());
		let mut session = session_over(connector.clone()).await;

		// Act: supply filters in reverse of declaration order
		let mut filters = FilterValues::new();
		filters.insert("email".to_string(), SqlValue::Text("a@b.c".to_string()));
		filters.insert("name".to_string(), SqlValue::Text("Dj".to_string()));
		repository
			.list(&mut session, &ListOptions { filters, ..Default::default() })
			.await
			.unwrap();

		// Assert: declared order (name before email), joined by AND
		let statement = connector.statements().remove(0);
		let name_at = statement.find("\"name\" LIKE").unwrap();
		let email_at = statement.find("\"email\" =").unwrap();
		assert!(name_at < email_at);
		assert!(statement.contains(" AND "));
	}

	#[rstest]
	#[tokio::test]
	async fn test_contains_filter_escapes_wildcards() {
		// Arrange
		let repository = repository();
		let connector = Arc::new(RecordingConnector::sqlite());
		let mut session = session_over(connector.clone()).await;

		// Act
		let mut filters = FilterValues::new();
		filters.insert("name".to_string(), SqlValue::Text("50%".to_string()));
		repository
			.list(&mut session, &ListOptions { filters, ..Default::default() })
			.await
			.unwrap();

		// Assert: the bound pattern has the literal % escaped
		let (_, params) = connector.recorded().remove(0);
		assert!(params.contains(&SqlValue::Text("%50\\%%".to_string())));
	}

	#[rstest]
	#[tokio::test]
	async fn test_unknown_filter_key_is_rejected() {
		// Arrange
		let repository = repository();
		let connector = Arc::new(RecordingConnector::sqlite());
		let mut session = session_over(connector.clone()).await;

		// Act
		let mut filters = FilterValues::new();
		filters.insert("surname".to_string(), SqlValue::Text("x".to_string()));
		let result = repository
			.list(&mut session, &ListOptions { filters, ..Default::default() })
			.await;

		// Assert: rejected before anything reached the connection
		assert!(matches!(result, Err(DatabaseError::QueryBuild(_))));
		assert!(connector.statements().is_empty());
	}

	#[rstest]
	#[tokio::test]
	async fn test_list_paged_issues_count_and_window() {
		// Arrange
		let repository = repository();
		let connector = Arc::new(RecordingConnector::sqlite());
		let mut session = session_over(connector.clone()).await;
		let mut count_row = SqlRow::new();
		count_row.insert("total", SqlValue::Int(5));
		connector.push_rows(vec![count_row]);

		// Act
		let page = repository
			.list_paged(&mut session, &FilterValues::new(), &PageRequest { page: 2, page_size: 2 })
			.await
			.unwrap();

		// Assert: a count query, then a window of size 2 starting at row 2
		assert_eq!(page.total_items, 5);
		let recorded = connector.recorded();
		assert!(recorded[0].0.contains("COUNT(*)"));
		assert!(recorded[1].0.contains("LIMIT"));
		assert!(recorded[1].0.contains("OFFSET"));
		assert_eq!(recorded[1].1, vec![SqlValue::Int(2), SqlValue::Int(2)]);
	}

	#[rstest]
	#[tokio::test]
	async fn test_find_by_id_returns_none_for_missing_row() {
		// Arrange
		let repository = repository();
		let connector = Arc::new(RecordingConnector::sqlite());
		let mut session = session_over(connector).await;

		// Act
		let found = repository
			.find_by_id(&mut session, &SqlValue::Int(42))
			.await
			.unwrap();

		// Assert
		assert!(found.is_none());
	}

	#[rstest]
	#[tokio::test]
	async fn test_soft_delete_column_filters_reads() {
		// Arrange
		let descriptor = EntityDescriptor::builder("clients")
			.columns(["id", "name", "deleted_at"])
			.primary_key("id")
			.soft_delete("deleted_at")
			.build()
			.unwrap();
		let repository = EntityRepository::builder(descriptor).build().unwrap();
		let connector = Arc::new(RecordingConnector::sqlite());
		let mut session = session_over(connector.clone()).await;

		// Act
		repository.list(&mut session, &ListOptions::default()).await.unwrap();

		// Assert
		assert!(connector.statements()[0].contains("\"deleted_at\" IS NULL"));
	}

	#[rstest]
	fn test_builder_rejects_unknown_filter_column() {
		// Act
		let result = EntityRepository::builder(clients())
			.filter(FilterSpec::new("age", "age", FilterOp::GreaterOrEqual))
			.build();

		// Assert
		assert!(matches!(result, Err(DatabaseError::QueryBuild(_))));
	}

	#[rstest]
	fn test_builder_keeps_primary_key_in_selection() {
		// Act
		let repository = EntityRepository::builder(clients())
			.select(["name"])
			.build()
			.unwrap();

		// Assert
		assert!(repository.selection.contains(&"id".to_string()));
	}
}
