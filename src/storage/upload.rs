use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use url::Url;

use crate::config::Config;
use crate::utils::http::{get_http_client, summarize_error_body, RemoteError};
use crate::utils::timing::log_remote_timing;

const MAX_BASE_FILENAME_CHARS: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Complete,
    Partial,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadItem {
    #[serde(default, alias = "source_url")]
    pub source_url: String,
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "public_url")]
    pub public_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadOutcome {
    pub status: UploadStatus,
    pub items: Vec<UploadItem>,
}

impl UploadOutcome {
    pub fn succeeded(&self) -> usize {
        self.items.iter().filter(|item| item.success).count()
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponseBody {
    #[serde(default, alias = "items")]
    results: Vec<UploadItem>,
}

pub fn validate_upload_request(urls: &[String], base_filename: &str) -> Result<(), RemoteError> {
    if urls.is_empty() {
        return Err(RemoteError::Validation("no image URLs to upload".to_string()));
    }
    for raw in urls {
        let parsed = Url::parse(raw.trim())
            .map_err(|err| RemoteError::Validation(format!("invalid image URL '{raw}': {err}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(RemoteError::Validation(format!(
                "image URL '{raw}' must use http or https"
            )));
        }
    }
    let base_filename = base_filename.trim();
    if base_filename.is_empty() {
        return Err(RemoteError::Validation("base filename must not be empty".to_string()));
    }
    if base_filename.chars().count() > MAX_BASE_FILENAME_CHARS
        || base_filename.contains(['/', '\\'])
    {
        return Err(RemoteError::Validation(format!(
            "base filename '{base_filename}' is not a plain file name"
        )));
    }
    Ok(())
}

fn public_url_for_key(public_base_url: &str, key: &str) -> Option<String> {
    let base = public_base_url.trim().trim_end_matches('/');
    if base.is_empty() || key.trim().is_empty() {
        return None;
    }
    Some(format!("{}/{}", base, key.trim().trim_start_matches('/')))
}

// 200 complete, 207 partial, 500 with an item list a total failure.
pub fn interpret_upload_response(
    status: u16,
    body: &str,
    source_urls: &[String],
    public_base_url: &str,
) -> Result<UploadOutcome, RemoteError> {
    let upload_status = match status {
        200 => UploadStatus::Complete,
        207 => UploadStatus::Partial,
        500 => UploadStatus::Failed,
        _ => {
            let (message, summary) = summarize_error_body(body);
            return Err(RemoteError::Status {
                status,
                message: message.unwrap_or(summary),
            });
        }
    };

    let parsed = match serde_json::from_str::<UploadResponseBody>(body) {
        Ok(parsed) if !parsed.results.is_empty() => parsed,
        _ if upload_status == UploadStatus::Failed => {
            let (message, summary) = summarize_error_body(body);
            return Err(RemoteError::Status {
                status,
                message: message.unwrap_or(summary),
            });
        }
        _ => {
            return Err(RemoteError::InvalidResponse(
                "upload response has no result items".to_string(),
            ))
        }
    };

    let items = parsed
        .results
        .into_iter()
        .enumerate()
        .map(|(position, mut item)| {
            if item.source_url.is_empty() {
                if let Some(source) = source_urls.get(position) {
                    item.source_url = source.clone();
                }
            }
            if item.success && item.public_url.is_none() {
                item.public_url = item
                    .key
                    .as_deref()
                    .and_then(|key| public_url_for_key(public_base_url, key));
            }
            item
        })
        .collect();

    Ok(UploadOutcome {
        status: upload_status,
        items,
    })
}

#[derive(Debug, Clone)]
pub struct StorageClient {
    endpoint: String,
    public_base_url: String,
}

impl StorageClient {
    pub fn new(endpoint: &str, public_base_url: &str) -> Self {
        Self {
            endpoint: endpoint.trim().to_string(),
            public_base_url: public_base_url.trim().to_string(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.storage_upload_endpoint, &config.storage_public_base_url)
    }

    pub async fn upload_images(
        &self,
        urls: &[String],
        base_filename: &str,
    ) -> Result<UploadOutcome, RemoteError> {
        validate_upload_request(urls, base_filename)?;
        if self.endpoint.is_empty() {
            return Err(RemoteError::NotConfigured("STORAGE_UPLOAD_ENDPOINT"));
        }

        let payload = json!({
            "imageUrls": urls.iter().map(|url| url.trim()).collect::<Vec<_>>(),
            "baseFilename": base_filename.trim(),
        });
        let metadata = json!({ "count": urls.len() });
        let outcome = log_remote_timing("storage", "upload", "upload_images", Some(metadata), || async {
            let response = get_http_client()
                .post(&self.endpoint)
                .json(&payload)
                .send()
                .await?;
            let status = response.status().as_u16();
            let body = response.text().await?;
            interpret_upload_response(status, &body, urls, &self.public_base_url)
        })
        .await?;

        match outcome.status {
            UploadStatus::Complete => info!("Uploaded {} image(s)", outcome.items.len()),
            UploadStatus::Partial => warn!(
                "Partial upload: {}/{} image(s) stored",
                outcome.succeeded(),
                outcome.items.len()
            ),
            UploadStatus::Failed => warn!("Upload failed for all {} image(s)", outcome.items.len()),
        }
        Ok(outcome)
    }
}
