use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use uuid::Uuid;

use crate::models::image::{ImageFilter, ImageRecord, ImageUpdate, NewImage, TransitionError};

/// Initialize PostgreSQL connection pool
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .min_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}

pub mod queries;

/// Persistence of image records.
#[async_trait]
pub trait ImageRepository: Send + Sync {
    async fn create(&self, data: NewImage) -> Result<ImageRecord, RepositoryError>;

    /// Look up a record by id. Soft-deleted records are returned too.
    async fn find_by_id(&self, id: Uuid) -> Result<Option<ImageRecord>, RepositoryError>;

    async fn update(&self, id: Uuid, update: ImageUpdate) -> Result<ImageRecord, RepositoryError>;

    async fn soft_delete(&self, id: Uuid) -> Result<(), RepositoryError>;

    /// Active records newest-first, with the total count matching `filter`.
    async fn find_many_with_count(
        &self,
        filter: &ImageFilter,
        page: u32,
        limit: u32,
    ) -> Result<(Vec<ImageRecord>, i64), RepositoryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Image {0} does not exist")]
    NotFound(Uuid),

    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),
}

/// PostgreSQL-backed [`ImageRepository`].
#[derive(Clone)]
pub struct PgImageRepository {
    pool: PgPool,
}

impl PgImageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ImageRepository for PgImageRepository {
    async fn create(&self, data: NewImage) -> Result<ImageRecord, RepositoryError> {
        Ok(queries::create_image(&self.pool, &data).await?)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<ImageRecord>, RepositoryError> {
        Ok(queries::get_image(&self.pool, id).await?)
    }

    async fn update(&self, id: Uuid, update: ImageUpdate) -> Result<ImageRecord, RepositoryError> {
        if let Some(record) = queries::update_image(&self.pool, id, &update).await? {
            return Ok(record);
        }

        // No row came back: either the id is unknown or the status guard refused
        let current = queries::get_image(&self.pool, id)
            .await?
            .ok_or(RepositoryError::NotFound(id))?;
        match update.status {
            Some(next) => Err(current.status.transition_to(next).err().map_or(
                RepositoryError::NotFound(id),
                RepositoryError::InvalidTransition,
            )),
            None => Err(RepositoryError::NotFound(id)),
        }
    }

    async fn soft_delete(&self, id: Uuid) -> Result<(), RepositoryError> {
        if queries::soft_delete_image(&self.pool, id).await? {
            Ok(())
        } else {
            Err(RepositoryError::NotFound(id))
        }
    }

    async fn find_many_with_count(
        &self,
        filter: &ImageFilter,
        page: u32,
        limit: u32,
    ) -> Result<(Vec<ImageRecord>, i64), RepositoryError> {
        Ok(queries::list_images(&self.pool, filter, page, limit).await?)
    }
}
