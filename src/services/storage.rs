use async_trait::async_trait;
use s3::creds::Credentials;
use s3::{Bucket, Region};

/// Location of an object written to durable storage.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub key: String,
    pub url: String,
    pub bucket: String,
}

/// Durable object storage used for processed images.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn upload(
        &self,
        data: &[u8],
        key: &str,
        content_type: &str,
    ) -> Result<StoredObject, StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    async fn url(&self, key: &str) -> Result<String, StorageError>;

    async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    async fn exists(&self, key: &str) -> Result<bool, StorageError>;
}

/// Client for S3-compatible object storage (AWS S3, R2, LocalStack).
pub struct S3Storage {
    bucket: Box<Bucket>,
    bucket_name: String,
    /// Browser-reachable base URL, used instead of the API endpoint when set.
    public_endpoint: Option<String>,
}

impl S3Storage {
    pub fn new(
        bucket_name: &str,
        region: &str,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
        public_endpoint: Option<&str>,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: region.to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials =
            Credentials::new(Some(access_key), Some(secret_key), None, None, None)
                .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?
            .with_path_style();

        Ok(Self {
            bucket,
            bucket_name: bucket_name.to_string(),
            public_endpoint: public_endpoint.map(|e| e.trim_end_matches('/').to_string()),
        })
    }

    fn object_url(&self, key: &str) -> String {
        match &self.public_endpoint {
            Some(base) => format!("{}/{}/{}", base, self.bucket_name, key),
            None => format!("{}/{}", self.bucket.url().trim_end_matches('/'), key),
        }
    }
}

fn check_status(code: u16, key: &str) -> Result<(), StorageError> {
    if (200..300).contains(&code) {
        Ok(())
    } else {
        Err(StorageError::UnexpectedStatus {
            key: key.to_string(),
            code,
        })
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    async fn upload(
        &self,
        data: &[u8],
        key: &str,
        content_type: &str,
    ) -> Result<StoredObject, StorageError> {
        let response = self
            .bucket
            .put_object_with_content_type(key, data, content_type)
            .await
            .map_err(StorageError::S3)?;
        check_status(response.status_code(), key)?;

        Ok(StoredObject {
            key: key.to_string(),
            url: self.object_url(key),
            bucket: self.bucket_name.clone(),
        })
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let response = self.bucket.delete_object(key).await.map_err(StorageError::S3)?;
        check_status(response.status_code(), key)
    }

    async fn url(&self, key: &str) -> Result<String, StorageError> {
        Ok(self.object_url(key))
    }

    async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let response = self.bucket.get_object(key).await.map_err(StorageError::S3)?;
        check_status(response.status_code(), key)?;
        Ok(response.to_vec())
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let (_, code) = self.bucket.head_object(key).await.map_err(StorageError::S3)?;
        match code {
            200..=299 => Ok(true),
            404 => Ok(false),
            code => Err(StorageError::UnexpectedStatus {
                key: key.to_string(),
                code,
            }),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Storage returned status {code} for {key}")]
    UnexpectedStatus { key: String, code: u16 },

    #[error("Storage configuration error: {0}")]
    Config(String),
}
