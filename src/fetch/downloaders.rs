use super::{DatasetSpec, Downloader};
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use std::time::Duration;

/// Plain HTTP downloader for the public dataset endpoints.
pub struct HttpDownloader {
    client: reqwest::Client,
}

impl HttpDownloader {
    pub fn new(timeout_seconds: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn fetch(&self, spec: &DatasetSpec) -> Result<Vec<u8>> {
        let resp = self.client.get(&spec.url).send().await?;
        let status = resp.status();
        if status.is_server_error() {
            return Err(PipelineError::TransientNetwork(format!(
                "dataset {} returned {}",
                spec.id, status
            )));
        }
        if !status.is_success() {
            return Err(PipelineError::Api {
                message: format!("dataset {} returned {}", spec.id, status),
            });
        }
        Ok(resp.bytes().await?.to_vec())
    }
}
