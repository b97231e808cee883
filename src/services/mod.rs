pub mod images;
pub mod processor;
pub mod queue;
pub mod staging;
pub mod storage;
pub mod validation;
pub mod worker_pool;
