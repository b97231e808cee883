//! Image ingestion service
//!
//! This library provides the core of the image-ingest system: upload
//! validation, the upload orchestrator that creates records and dispatches
//! processing jobs, and the asynchronous worker that resizes, re-encodes and
//! stores images in S3-compatible object storage.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
