//! services/client/src/adapters/veo.rs
//!
//! This module contains the adapter for image-to-video generation through the
//! Generative Language REST API. It implements the `VideoService` port: `submit`
//! starts a long-running operation and `poll` reads its state once.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use study_sync_core::domain::{OperationHandle, OperationStatus, VideoRequest};
use study_sync_core::ports::{PortError, PortResult, VideoService};
use tracing::debug;

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_PROMPT: &str = "Animate this image";

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

#[derive(Clone)]
pub struct VeoVideoAdapter {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl VeoVideoAdapter {
    /// Creates a new `VeoVideoAdapter`.
    pub fn new(api_key: String, model: String) -> Self {
        Self { http: reqwest::Client::new(), api_key, model }
    }
}

//=========================================================================================
// Wire Types
//=========================================================================================

#[derive(Deserialize)]
struct SubmitResponse {
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationResponse {
    #[serde(default)]
    done: bool,
    error: Option<OperationError>,
    response: Option<GenerateVideoEnvelope>,
}

#[derive(Deserialize)]
struct OperationError {
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateVideoEnvelope {
    generate_video_response: Option<GenerateVideoResponse>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateVideoResponse {
    #[serde(default)]
    generated_samples: Vec<GeneratedSample>,
}

#[derive(Deserialize)]
struct GeneratedSample {
    video: Option<VideoRef>,
}

#[derive(Deserialize)]
struct VideoRef {
    uri: Option<String>,
}

impl OperationResponse {
    fn first_uri(self) -> Option<String> {
        self.response?
            .generate_video_response?
            .generated_samples
            .into_iter()
            .find_map(|sample| sample.video.and_then(|v| v.uri))
    }
}

/// The media URI is protected; fetching it needs the key as a query parameter.
pub fn authenticated_uri(uri: &str, api_key: &str) -> String {
    let separator = if uri.contains('?') { '&' } else { '?' };
    format!("{}{}key={}", uri, separator, api_key)
}

fn transport_error(e: reqwest::Error) -> PortError {
    if e.is_timeout() || e.is_connect() {
        PortError::Unavailable(e.to_string())
    } else {
        PortError::Unexpected(e.to_string())
    }
}

async fn check_status(response: reqwest::Response) -> PortResult<reqwest::Response> {
    match response.status() {
        status if status.is_success() => Ok(response),
        StatusCode::NOT_FOUND => Err(PortError::NotFound(response.url().to_string())),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(PortError::Unauthorized),
        status => {
            let body = response.text().await.unwrap_or_default();
            Err(PortError::Unexpected(format!("video service returned {}: {}", status, body)))
        }
    }
}

//=========================================================================================
// `VideoService` Trait Implementation
//=========================================================================================

#[async_trait]
impl VideoService for VeoVideoAdapter {
    async fn submit(&self, request: &VideoRequest) -> PortResult<OperationHandle> {
        let prompt = request
            .prompt
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(DEFAULT_PROMPT);
        let body = json!({
            "instances": [{
                "prompt": prompt,
                "image": {
                    "bytesBase64Encoded": STANDARD.encode(&request.image.data),
                    "mimeType": request.image.mime_type,
                }
            }],
            "parameters": {
                "aspectRatio": request.aspect_ratio.as_str(),
                "resolution": "1080p",
                "sampleCount": 1
            }
        });

        let response = self
            .http
            .post(format!("{}/models/{}:predictLongRunning", BASE_URL, self.model))
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;
        let submitted: SubmitResponse =
            check_status(response).await?.json().await.map_err(transport_error)?;

        debug!("Video generation submitted as {}", submitted.name);
        Ok(OperationHandle(submitted.name))
    }

    async fn poll(&self, operation: &OperationHandle) -> PortResult<OperationStatus> {
        let response = self
            .http
            .get(format!("{}/{}", BASE_URL, operation.0))
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
            .map_err(transport_error)?;
        let state: OperationResponse =
            check_status(response).await?.json().await.map_err(transport_error)?;

        if let Some(error) = &state.error {
            return Ok(OperationStatus::Failed(error.message.clone()));
        }
        if !state.done {
            return Ok(OperationStatus::Running);
        }
        Ok(match state.first_uri() {
            Some(uri) => OperationStatus::Succeeded(authenticated_uri(&uri, &self.api_key)),
            None => OperationStatus::Failed("No video URI returned from the API.".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_appended_with_the_right_separator() {
        assert_eq!(authenticated_uri("https://x/v.mp4", "k"), "https://x/v.mp4?key=k");
        assert_eq!(authenticated_uri("https://x/v?alt=media", "k"), "https://x/v?alt=media&key=k");
    }

    #[test]
    fn finished_operations_expose_the_first_video_uri() {
        let state: OperationResponse = serde_json::from_value(json!({
            "name": "operations/1",
            "done": true,
            "response": {"generateVideoResponse": {"generatedSamples": [{"video": {"uri": "https://x/v"}}]}}
        }))
        .unwrap();
        assert_eq!(state.first_uri().as_deref(), Some("https://x/v"));
    }
}
