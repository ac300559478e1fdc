use crate::constants::ONEMAP_SEARCH_URL;
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

/// Result of one lookup against the geocoding service.
#[derive(Debug, Clone, PartialEq)]
pub enum GeocodeOutcome {
    Found { latitude: f64, longitude: f64, postal_code: Option<String> },
    /// The service answered but knows no such address. Not retryable.
    NotFound,
}

/// Port to the external geocoding service so batch logic can be exercised
/// against a scripted mock.
#[async_trait]
pub trait GeocodeService: Send + Sync {
    async fn lookup(&self, address: &str) -> Result<GeocodeOutcome>;
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    found: u32,
    results: Option<Vec<SearchResult>>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(rename = "LATITUDE")]
    latitude: String,
    #[serde(rename = "LONGITUDE")]
    longitude: String,
    #[serde(rename = "POSTAL")]
    postal: Option<String>,
}

/// OneMap search client. One free-text address in, the top match's
/// coordinates out.
pub struct OneMapClient {
    client: reqwest::Client,
    search_url: String,
    token: String,
}

impl OneMapClient {
    pub fn new(token: String, timeout_seconds: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()?;
        Ok(Self { client, search_url: ONEMAP_SEARCH_URL.to_string(), token })
    }

    pub fn with_endpoint(mut self, url: &str) -> Self {
        self.search_url = url.to_string();
        self
    }
}

#[async_trait]
impl GeocodeService for OneMapClient {
    async fn lookup(&self, address: &str) -> Result<GeocodeOutcome> {
        let resp = self
            .client
            .get(&self.search_url)
            .query(&[
                ("searchVal", address),
                ("returnGeom", "Y"),
                ("getAddrDetails", "Y"),
            ])
            .header("Authorization", format!("Bearer {}", self.token))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    PipelineError::TransientNetwork(e.to_string())
                } else {
                    PipelineError::Http(e)
                }
            })?;

        let status = resp.status();
        if status.is_server_error() {
            return Err(PipelineError::TransientNetwork(format!(
                "geocode service returned {}",
                status
            )));
        }
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(PipelineError::Auth(format!("geocode service returned {}", status)));
        }
        if !status.is_success() {
            return Err(PipelineError::Api {
                message: format!("geocode service returned {}", status),
            });
        }

        // A body that does not parse is treated as transient: the service
        // occasionally emits truncated responses under load.
        let parsed: SearchResponse = resp
            .json()
            .await
            .map_err(|e| PipelineError::TransientNetwork(format!("malformed response: {}", e)))?;

        if parsed.found == 0 {
            return Ok(GeocodeOutcome::NotFound);
        }
        let top = match parsed.results.as_ref().and_then(|r| r.first()) {
            Some(top) => top,
            None => return Ok(GeocodeOutcome::NotFound),
        };
        let latitude: f64 = top.latitude.parse().map_err(|_| {
            PipelineError::TransientNetwork(format!("unparseable latitude '{}'", top.latitude))
        })?;
        let longitude: f64 = top.longitude.parse().map_err(|_| {
            PipelineError::TransientNetwork(format!("unparseable longitude '{}'", top.longitude))
        })?;
        // The service reports "NIL" for addresses without a postal code.
        let postal_code = top
            .postal
            .as_deref()
            .filter(|p| !p.is_empty() && *p != "NIL")
            .map(|p| p.to_string());

        Ok(GeocodeOutcome::Found { latitude, longitude, postal_code })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_response_parses_onemap_shape() {
        let body = r#"{
            "found": 1,
            "totalNumPages": 1,
            "pageNum": 1,
            "results": [{
                "SEARCHVAL": "201 BUKIT BATOK STREET 21",
                "BLK_NO": "201",
                "LATITUDE": "1.34789",
                "LONGITUDE": "103.74971",
                "POSTAL": "650201"
            }]
        }"#;
        let parsed: SearchResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.found, 1);
        let top = &parsed.results.unwrap()[0];
        assert_eq!(top.postal.as_deref(), Some("650201"));
    }

    #[test]
    fn zero_found_parses_as_not_found_shape() {
        let body = r#"{"found": 0, "totalNumPages": 0, "pageNum": 1, "results": []}"#;
        let parsed: SearchResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.found, 0);
    }
}
