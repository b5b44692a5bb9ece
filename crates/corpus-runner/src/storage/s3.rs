use super::{RemoteStore, StorageConfig, StoreError, StoreResult};
use async_trait::async_trait;
use aws_sdk_s3::{
    config::{BehaviorVersion, Credentials, Region},
    error::DisplayErrorContext,
    primitives::ByteStream,
    Client,
};
use corpus_common::checksum::sha256_hex;
use tracing::{debug, info, instrument};

/// [`RemoteStore`] over an S3-compatible bucket
#[derive(Clone)]
pub struct S3Store {
    client: Client,
    bucket: String,
}

impl S3Store {
    pub async fn new(config: StorageConfig) -> Self {
        debug!(?config, "Initializing S3 store");

        let mut builder = match config.static_credentials() {
            Some((access, secret)) => {
                let credentials = Credentials::new(access, secret, None, None, "corpus-runner");
                aws_sdk_s3::Config::builder()
                    .behavior_version(BehaviorVersion::latest())
                    .credentials_provider(credentials)
            }
            None => {
                let shared = aws_config::defaults(BehaviorVersion::latest())
                    .region(Region::new(config.region.clone()))
                    .load()
                    .await;
                aws_sdk_s3::config::Builder::from(&shared)
            }
        };

        builder = builder
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(builder.build());
        info!(bucket = %config.bucket, endpoint = ?config.endpoint, "S3 store initialized");

        Self {
            client,
            bucket: config.bucket,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

fn failure<E>(operation: &'static str, key: &str, err: E) -> StoreError
where
    E: std::error::Error,
{
    StoreError::unavailable(operation, key, DisplayErrorContext(err).to_string())
}

#[async_trait]
impl RemoteStore for S3Store {
    #[instrument(skip(self))]
    async fn list(&self, prefix: &str) -> StoreResult<Vec<String>> {
        debug!("Listing s3://{}/{}", self.bucket, prefix);

        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .into_paginator()
            .send();

        let mut keys = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| failure("list", prefix, e))?;
            keys.extend(
                page.contents()
                    .iter()
                    .filter_map(|obj| obj.key().map(str::to_string)),
            );
        }

        debug!(count = keys.len(), "Listed s3://{}/{}", self.bucket, prefix);
        Ok(keys)
    }

    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> StoreResult<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    StoreError::NotFound(key.to_string())
                } else {
                    failure("get", key, e)
                }
            })?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| failure("get", key, e))?
            .into_bytes()
            .to_vec();

        debug!(bytes = data.len(), "Downloaded s3://{}/{}", self.bucket, key);
        Ok(data)
    }

    #[instrument(skip(self, data), fields(bytes = data.len()))]
    async fn put(&self, key: &str, data: Vec<u8>) -> StoreResult<()> {
        let checksum = sha256_hex(&data);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| failure("put", key, e))?;

        info!(%checksum, "Uploaded s3://{}/{}", self.bucket, key);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn exists(&self, key: &str) -> StoreResult<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(false),
            Err(e) => Err(failure("head", key, e)),
        }
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| failure("delete", key, e))?;

        info!("Deleted s3://{}/{}", self.bucket, key);
        Ok(())
    }

    fn describe(&self) -> String {
        format!("s3://{}", self.bucket)
    }
}
