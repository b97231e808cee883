use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Processing status of an uploaded image.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ImageStatus {
    Processing,
    Completed,
    Failed,
}

impl ImageStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ImageStatus::Completed | ImageStatus::Failed)
    }

    /// Validate a status change.
    ///
    /// PROCESSING may move anywhere; a terminal status only accepts itself,
    /// which makes re-applying the current status a no-op.
    pub fn transition_to(self, next: ImageStatus) -> Result<ImageStatus, TransitionError> {
        if self == ImageStatus::Processing || self == next {
            Ok(next)
        } else {
            Err(TransitionError {
                from: self,
                to: next,
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Invalid status transition from {from} to {to}")]
pub struct TransitionError {
    pub from: ImageStatus,
    pub to: ImageStatus,
}

/// An uploaded image and its lifecycle state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageRecord {
    pub id: Uuid,
    /// Durable storage URL. Empty until processing completes.
    pub url: String,
    pub title: Option<String>,
    pub width: i32,
    pub height: i32,
    pub status: ImageStatus,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ImageRecord {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn mark_completed(
        self,
        url: impl Into<String>,
        width: i32,
        height: i32,
    ) -> Result<Self, TransitionError> {
        let status = self.status.transition_to(ImageStatus::Completed)?;
        Ok(Self {
            url: url.into(),
            width,
            height,
            status,
            ..self
        })
    }

    pub fn mark_failed(self) -> Result<Self, TransitionError> {
        let status = self.status.transition_to(ImageStatus::Failed)?;
        Ok(Self { status, ..self })
    }

    pub fn soft_delete(self, at: DateTime<Utc>) -> Self {
        Self {
            deleted_at: Some(self.deleted_at.unwrap_or(at)),
            ..self
        }
    }

    pub fn restore(self) -> Self {
        Self {
            deleted_at: None,
            ..self
        }
    }

    /// Apply a partial update, enforcing the status state machine.
    pub fn apply(self, update: &ImageUpdate) -> Result<Self, TransitionError> {
        let status = match update.status {
            Some(next) => self.status.transition_to(next)?,
            None => self.status,
        };
        Ok(Self {
            url: update.url.clone().unwrap_or(self.url),
            width: update.width.unwrap_or(self.width),
            height: update.height.unwrap_or(self.height),
            status,
            ..self
        })
    }
}

/// Fields for a new image record.
#[derive(Debug, Clone)]
pub struct NewImage {
    pub url: String,
    pub title: Option<String>,
    pub width: i32,
    pub height: i32,
    pub status: ImageStatus,
}

/// Partial update of an image record. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageUpdate {
    pub url: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub status: Option<ImageStatus>,
}

impl ImageUpdate {
    pub fn completed(url: impl Into<String>, width: i32, height: i32) -> Self {
        Self {
            url: Some(url.into()),
            width: Some(width),
            height: Some(height),
            status: Some(ImageStatus::Completed),
        }
    }

    pub fn failed() -> Self {
        Self {
            status: Some(ImageStatus::Failed),
            ..Self::default()
        }
    }
}

/// Filter for listing images.
#[derive(Debug, Clone, Default)]
pub struct ImageFilter {
    /// Case-insensitive substring match on the title.
    pub title: Option<String>,
}

/// One page of active images.
#[derive(Debug, Clone)]
pub struct ImagePage {
    pub records: Vec<ImageRecord>,
    pub total: i64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u32,
}
