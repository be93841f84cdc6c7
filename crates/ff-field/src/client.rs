use async_trait::async_trait;
use ff_core::submission::{RecordType, StagingCounts, SubmitAck, SubmitRequest};
use ff_core::validation::FieldIssue;
use ff_core::{AppError, Result};
use reqwest::{Client, Response, StatusCode, Url};
use serde::Deserialize;
use std::time::Duration;

const API_KEY_HEADER: &str = "x-api-key";
const DEVICE_ID_HEADER: &str = "x-device-id";

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(default)]
    details: Option<serde_json::Value>,
}

/// Staging tier over HTTP. Authenticates with the field API key plus the
/// device identifier on every request.
pub struct HttpStagingClient {
    http: Client,
    base_url: Url,
    api_key: String,
    device_id: String,
}

impl HttpStagingClient {
    pub fn new(base_url: &str, api_key: &str, device_id: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|err| AppError::Config(format!("invalid staging base url: {err}")))?;
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| AppError::Network(err.to_string()))?;

        Ok(Self {
            http,
            base_url,
            api_key: api_key.to_string(),
            device_id: device_id.to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|err| AppError::Config(format!("invalid staging endpoint {path}: {err}")))
    }

    async fn decode_error(response: Response) -> AppError {
        let status = response.status();
        let body = match response.json::<ErrorBody>().await {
            Ok(body) => body,
            Err(_) => {
                return AppError::Sync(format!("staging request failed with status {status}"))
            }
        };

        match body.code.as_str() {
            "VALIDATION_ERROR" => {
                let issues = body
                    .details
                    .and_then(|details| serde_json::from_value::<Vec<FieldIssue>>(details).ok())
                    .unwrap_or_default();
                if issues.is_empty() {
                    AppError::Sync(body.message)
                } else {
                    AppError::Validation(issues)
                }
            }
            "DUPLICATE_ENTRY" => AppError::Duplicate(body.message),
            "BATCH_TOO_LARGE" => {
                #[derive(Deserialize)]
                struct Limits {
                    limit: usize,
                    actual: usize,
                }
                match body
                    .details
                    .and_then(|details| serde_json::from_value::<Limits>(details).ok())
                {
                    Some(limits) => AppError::BatchTooLarge {
                        limit: limits.limit,
                        actual: limits.actual,
                    },
                    None => AppError::Sync(body.message),
                }
            }
            "NOT_FOUND" => AppError::NotFound(body.message),
            _ => AppError::Sync(format!("{status}: {}", body.message)),
        }
    }
}

#[async_trait]
impl crate::ports::StagingClient for HttpStagingClient {
    async fn submit(&self, record_type: RecordType, request: SubmitRequest) -> Result<SubmitAck> {
        let url = self.endpoint(&format!("v1/submit/{}", record_type.as_str()))?;

        let response = self
            .http
            .post(url)
            .header(API_KEY_HEADER, &self.api_key)
            .header(DEVICE_ID_HEADER, &self.device_id)
            .json(&request)
            .send()
            .await
            .map_err(|err| AppError::Network(err.to_string()))?;

        match response.status() {
            StatusCode::CREATED | StatusCode::OK => response
                .json::<SubmitAck>()
                .await
                .map_err(|err| AppError::Serialization(err.to_string())),
            _ => Err(Self::decode_error(response).await),
        }
    }

    async fn staging_summary(&self) -> Result<StagingCounts> {
        let url = self.endpoint("v1/staging/summary")?;

        let response = self
            .http
            .get(url)
            .header(API_KEY_HEADER, &self.api_key)
            .header(DEVICE_ID_HEADER, &self.device_id)
            .send()
            .await
            .map_err(|err| AppError::Network(err.to_string()))?;

        if response.status().is_success() {
            response
                .json::<StagingCounts>()
                .await
                .map_err(|err| AppError::Serialization(err.to_string()))
        } else {
            Err(Self::decode_error(response).await)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_base_url() {
        assert!(HttpStagingClient::new("not a url", "key", "device").is_err());
    }

    #[test]
    fn endpoint_joins_against_base() {
        let client = HttpStagingClient::new("http://localhost:8080/", "key", "device").unwrap();
        let url = client.endpoint("v1/submit/pole").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/v1/submit/pole");
    }
}
