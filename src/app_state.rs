use sqlx::PgPool;
use std::sync::Arc;

use crate::services::{images::ImageService, queue::JobQueue};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub images: Arc<ImageService>,
    pub queue: Arc<dyn JobQueue>,
}

impl AppState {
    pub fn new(db: PgPool, images: ImageService, queue: Arc<dyn JobQueue>) -> Self {
        Self {
            db,
            images: Arc::new(images),
            queue,
        }
    }
}
