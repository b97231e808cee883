pub mod format;
pub mod image;
pub mod job;
pub mod upload;
