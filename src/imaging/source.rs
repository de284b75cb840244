use std::path::Path;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::imaging::processor::ImageProcessingError;
use crate::utils::http::{get_http_client, should_retry_error, should_retry_status, truncate_for_log};

const DOWNLOAD_MAX_ATTEMPTS: usize = 3;
const DOWNLOAD_BASE_DELAY_MS: u64 = 400;
const DOWNLOAD_ERROR_BODY_LIMIT: usize = 800;

#[derive(Debug, Clone)]
pub struct ImageSource {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub origin: String,
}

pub fn detect_mime_type(data: &[u8]) -> Option<String> {
    infer::get(data).map(|kind| kind.mime_type().to_string())
}

fn is_remote(input: &str) -> bool {
    let lowered = input.trim_start().to_lowercase();
    lowered.starts_with("http://") || lowered.starts_with("https://")
}

fn retry_delay(attempt: usize) -> Duration {
    Duration::from_millis(DOWNLOAD_BASE_DELAY_MS << attempt)
}

async fn download_image(url: &str) -> Result<Vec<u8>, ImageProcessingError> {
    let client = get_http_client();
    let mut last_error = String::new();
    for attempt in 0..DOWNLOAD_MAX_ATTEMPTS {
        let last_attempt = attempt + 1 == DOWNLOAD_MAX_ATTEMPTS;
        let response = match client.get(url).send().await {
            Ok(resp) => resp,
            Err(err) => {
                warn!(
                    "Failed to fetch image {url}: {err} (timeout={}, connect={}, attempt={}/{})",
                    err.is_timeout(),
                    err.is_connect(),
                    attempt + 1,
                    DOWNLOAD_MAX_ATTEMPTS
                );
                last_error = err.to_string();
                if !should_retry_error(&err) || last_attempt {
                    break;
                }
                tokio::time::sleep(retry_delay(attempt)).await;
                continue;
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                "Image download failed for {url} with status {}: {}",
                status,
                truncate_for_log(&body, DOWNLOAD_ERROR_BODY_LIMIT)
            );
            last_error = format!("status {status}");
            if !should_retry_status(status) || last_attempt {
                break;
            }
            tokio::time::sleep(retry_delay(attempt)).await;
            continue;
        }

        match response.bytes().await {
            Ok(bytes) => return Ok(bytes.to_vec()),
            Err(err) => {
                error!(
                    "Failed to read image bytes {url}: {err} (attempt={}/{})",
                    attempt + 1,
                    DOWNLOAD_MAX_ATTEMPTS
                );
                last_error = err.to_string();
                if last_attempt {
                    break;
                }
                tokio::time::sleep(retry_delay(attempt)).await;
            }
        }
    }

    Err(ImageProcessingError::Fetch(format!("{url}: {last_error}")))
}

pub async fn load_image_source(input: &str) -> Result<ImageSource, ImageProcessingError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ImageProcessingError::Validation(
            "image path or URL is required".to_string(),
        ));
    }

    let bytes = if is_remote(input) {
        download_image(input).await?
    } else {
        tokio::fs::read(Path::new(input)).await?
    };

    let mime_type = detect_mime_type(&bytes).unwrap_or_default();
    if !mime_type.starts_with("image/") {
        return Err(ImageProcessingError::Validation(format!(
            "{input} is not an image (detected '{}')",
            if mime_type.is_empty() { "unknown" } else { mime_type.as_str() }
        )));
    }
    debug!("Loaded {} ({} bytes, {})", input, bytes.len(), mime_type);

    Ok(ImageSource {
        bytes,
        mime_type,
        origin: input.to_string(),
    })
}
