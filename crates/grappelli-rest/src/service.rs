//! Generic entity service
//!
//! One service implementation covers every CRUD endpoint. The per-entity
//! part is an [`EntityMapper`]: a capability interface supplying input
//! validation, query-to-filter mapping, and the delete policy, all
//! parameterized over the entity's own types. The service shapes list
//! results into the `{items, pagination}` envelope, turns absence into
//! [`ApiError::NotFound`], and ends every mutating operation with an
//! explicit commit.

use crate::error::{ApiError, ApiResult};
use crate::pagination::{Paged, PageQuery, PaginationConfig, PaginationMeta};
use grappelli_db::error::DatabaseError;
use grappelli_db::repository::EntityRepository;
use grappelli_db::session::Session;
use grappelli_db::value::{ColumnValues, FilterValues, SqlValue};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// How an entity leaves the data set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletePolicy {
	/// Remove the row.
	Hard,
	/// Write the entity's deletion marker column instead of removing the
	/// row; reads already skip marked rows.
	SoftDelete,
}

/// Per-entity capability interface consumed by [`EntityService`].
///
/// Implementations are plain structs declared next to the entity; the
/// service stays generic over the entity, input, and query types.
pub trait EntityMapper: Send + Sync {
	type Entity: Serialize + DeserializeOwned + Send;
	type CreateInput: Send + Sync;
	type UpdateInput: Send + Sync;
	type Query: Send + Sync;

	/// Validate creation input into column values for the new row.
	fn validate_create(&self, input: &Self::CreateInput) -> ApiResult<ColumnValues>;

	/// Validate update input into a partial patch. Only the returned
	/// columns are written; the primary key is stripped regardless.
	fn validate_update(&self, input: &Self::UpdateInput) -> ApiResult<ColumnValues>;

	/// Derive repository filter values from the list query.
	fn filters(&self, query: &Self::Query) -> FilterValues;

	/// Extract the raw page window from the list query.
	fn page_query(&self, query: &Self::Query) -> PageQuery;

	/// Override the entity's delete policy. The default defers to the
	/// descriptor: entities declaring a soft-delete column are marked,
	/// everything else is removed.
	fn delete_policy(&self) -> Option<DeletePolicy> {
		None
	}
}

/// Generic CRUD operations over one entity.
pub struct EntityService<M: EntityMapper> {
	repository: Arc<EntityRepository>,
	mapper: M,
	pagination: PaginationConfig,
}

impl<M: EntityMapper> EntityService<M> {
	pub fn new(repository: Arc<EntityRepository>, mapper: M) -> Self {
		Self {
			repository,
			mapper,
			pagination: PaginationConfig::default(),
		}
	}

	pub fn with_pagination(mut self, pagination: PaginationConfig) -> Self {
		self.pagination = pagination;
		self
	}

	pub fn repository(&self) -> &Arc<EntityRepository> {
		&self.repository
	}

	/// List one page of entities as an `{items, pagination}` envelope.
	pub async fn list(
		&self,
		session: &mut Session,
		query: &M::Query,
	) -> ApiResult<Paged<M::Entity>> {
		let window = self.pagination.normalize(&self.mapper.page_query(query))?;
		let filters = self.mapper.filters(query);
		let page = self.repository.list_paged(session, &filters, &window).await?;

		let items = page
			.rows
			.into_iter()
			.map(decode_entity::<M::Entity>)
			.collect::<ApiResult<Vec<_>>>()?;

		Ok(Paged {
			items,
			pagination: PaginationMeta::new(window.page, window.page_size, page.total_items),
		})
	}

	/// Fetch one entity by primary key.
	///
	/// Absence is always an explicit [`ApiError::NotFound`], never a
	/// `None` handed to the caller.
	pub async fn get(&self, session: &mut Session, id: &SqlValue) -> ApiResult<M::Entity> {
		let row = self
			.repository
			.find_by_id(session, id)
			.await?
			.ok_or_else(|| self.missing(id))?;
		decode_entity(row)
	}

	/// Validate, persist, and commit a new entity; returns it with the
	/// generated primary key.
	pub async fn create(
		&self,
		session: &mut Session,
		input: &M::CreateInput,
	) -> ApiResult<M::Entity> {
		let values = self.mapper.validate_create(input)?;
		let descriptor = self.repository.descriptor().clone();
		session.persist(descriptor, values);

		let results = session.flush().await?;
		let key = results
			.last()
			.and_then(|r| r.generated_key.clone())
			.ok_or_else(|| {
				ApiError::Persistence(DatabaseError::Decode(
					"insert reported no primary key".to_string(),
				))
			})?;
		session.commit().await?;

		self.get(session, &key).await
	}

	/// Load, patch, and commit an existing entity.
	///
	/// Only fields defined in the validated patch are written, and the
	/// primary key is excluded from patch application even when the input
	/// carries one.
	pub async fn update(
		&self,
		session: &mut Session,
		id: &SqlValue,
		input: &M::UpdateInput,
	) -> ApiResult<M::Entity> {
		let descriptor = self.repository.descriptor().clone();
		self.repository
			.find_by_id(session, id)
			.await?
			.ok_or_else(|| self.missing(id))?;

		let mut patch = self.mapper.validate_update(input)?;
		patch.shift_remove(descriptor.primary_key());
		if !patch.is_empty() {
			session.queue_update(descriptor, id.clone(), patch);
		}
		session.commit().await?;

		self.get(session, id).await
	}

	/// Load and delete an entity per its declared policy, then commit.
	pub async fn delete(&self, session: &mut Session, id: &SqlValue) -> ApiResult<()> {
		let descriptor = self.repository.descriptor().clone();
		self.repository
			.find_by_id(session, id)
			.await?
			.ok_or_else(|| self.missing(id))?;

		let policy = self.mapper.delete_policy().unwrap_or_else(|| {
			if descriptor.soft_delete_column().is_some() {
				DeletePolicy::SoftDelete
			} else {
				DeletePolicy::Hard
			}
		});
		match policy {
			DeletePolicy::Hard => session.queue_delete(descriptor, id.clone()),
			DeletePolicy::SoftDelete => {
				let column = descriptor.soft_delete_column().ok_or_else(|| {
					ApiError::Persistence(DatabaseError::QueryBuild(format!(
						"{}: soft delete requested but no marker column declared",
						descriptor.table()
					)))
				})?;
				let mut patch = ColumnValues::new();
				patch.insert(
					column.to_string(),
					SqlValue::Text(chrono::Utc::now().to_rfc3339()),
				);
				session.queue_update(descriptor.clone(), id.clone(), patch);
			}
		}
		session.commit().await?;
		Ok(())
	}

	fn missing(&self, id: &SqlValue) -> ApiError {
		ApiError::not_found(format!(
			"{} with id {} not found",
			self.repository.descriptor().table(),
			id.to_json()
		))
	}
}

fn decode_entity<T: DeserializeOwned>(row: serde_json::Value) -> ApiResult<T> {
	serde_json::from_value(row)
		.map_err(|e| ApiError::Persistence(DatabaseError::Decode(e.to_string())))
}
