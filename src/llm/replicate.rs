use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::scenes::GenerationConfig;
use crate::utils::http::{ensure_success, get_http_client, RemoteError};
use crate::utils::timing::log_remote_timing;

const RETRY_BASE_DELAY_MS: u64 = 500;
const MAX_NUM_OUTPUTS: u32 = 4;
const MAX_INFERENCE_STEPS: u32 = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub prompt: String,
    pub model: String,
    pub aspect_ratio: String,
    pub num_inference_steps: u32,
    pub output_format: String,
    pub num_outputs: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance: Option<f32>,
}

impl GenerationRequest {
    pub fn from_config(prompt: &str, config: &Config) -> Self {
        let model = config.default_model.clone();
        let steps = crate::scenes::packs::default_steps_for_model(&model);
        Self {
            prompt: prompt.trim().to_string(),
            model,
            aspect_ratio: config.default_aspect_ratio.clone(),
            num_inference_steps: steps,
            output_format: config.default_output_format.clone(),
            num_outputs: config.default_num_outputs,
            seed: None,
            width: None,
            height: None,
            guidance: None,
        }
    }

    pub fn validate(&self) -> Result<(), RemoteError> {
        if self.prompt.trim().is_empty() {
            return Err(RemoteError::Validation("prompt must not be empty".to_string()));
        }
        let valid_model = self
            .model
            .split_once('/')
            .map(|(owner, name)| {
                !owner.trim().is_empty() && !name.trim().is_empty() && !name.contains('/')
            })
            .unwrap_or(false);
        if !valid_model {
            return Err(RemoteError::Validation(format!(
                "model must look like owner/name, got '{}'",
                self.model
            )));
        }
        if !(1..=MAX_NUM_OUTPUTS).contains(&self.num_outputs) {
            return Err(RemoteError::Validation(format!(
                "num_outputs must be between 1 and {MAX_NUM_OUTPUTS}"
            )));
        }
        if !(1..=MAX_INFERENCE_STEPS).contains(&self.num_inference_steps) {
            return Err(RemoteError::Validation(format!(
                "num_inference_steps must be between 1 and {MAX_INFERENCE_STEPS}"
            )));
        }
        if self.width.is_some() != self.height.is_some() {
            return Err(RemoteError::Validation(
                "width and height must be given together".to_string(),
            ));
        }
        Ok(())
    }
}

impl From<&GenerationConfig> for GenerationRequest {
    fn from(config: &GenerationConfig) -> Self {
        Self {
            prompt: config.prompt.clone(),
            model: config.model.clone(),
            aspect_ratio: config.aspect_ratio.clone(),
            num_inference_steps: config.num_inference_steps,
            output_format: config.output_format.clone(),
            num_outputs: config.num_outputs,
            seed: None,
            width: None,
            height: None,
            guidance: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct PredictionInput<'a> {
    prompt: &'a str,
    aspect_ratio: &'a str,
    num_inference_steps: u32,
    output_format: &'a str,
    num_outputs: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    guidance: Option<f32>,
}

pub fn build_prediction_payload(request: &GenerationRequest) -> Value {
    let custom_size = request.width.is_some() && request.height.is_some();
    let input = PredictionInput {
        prompt: request.prompt.trim(),
        aspect_ratio: if custom_size {
            "custom"
        } else {
            request.aspect_ratio.as_str()
        },
        num_inference_steps: request.num_inference_steps,
        output_format: &request.output_format,
        num_outputs: request.num_outputs,
        seed: request.seed,
        width: request.width,
        height: request.height,
        guidance: request.guidance,
    };
    json!({ "input": input })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionStatus {
    Starting,
    Processing,
    Succeeded,
    Failed,
    Canceled,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Prediction {
    pub id: String,
    pub status: PredictionStatus,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
}

// `output` is either one URL or an array of them.
pub fn extract_output_urls(output: &Value) -> Vec<String> {
    match output {
        Value::String(url) if !url.trim().is_empty() => vec![url.trim().to_string()],
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.as_str())
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

pub fn prediction_outcome(prediction: &Prediction) -> Option<Result<Vec<String>, RemoteError>> {
    match prediction.status {
        PredictionStatus::Starting | PredictionStatus::Processing => None,
        PredictionStatus::Succeeded => {
            let urls = prediction
                .output
                .as_ref()
                .map(extract_output_urls)
                .unwrap_or_default();
            if urls.is_empty() {
                Some(Err(RemoteError::InvalidResponse(format!(
                    "prediction {} succeeded without output",
                    prediction.id
                ))))
            } else {
                Some(Ok(urls))
            }
        }
        PredictionStatus::Failed => {
            let message = match &prediction.error {
                Some(Value::String(message)) => message.clone(),
                Some(other) => other.to_string(),
                None => "unknown error".to_string(),
            };
            Some(Err(RemoteError::Generation(format!(
                "prediction {} failed: {}",
                prediction.id, message
            ))))
        }
        PredictionStatus::Canceled => Some(Err(RemoteError::Generation(format!(
            "prediction {} was canceled",
            prediction.id
        )))),
    }
}

#[derive(Debug, Clone)]
pub struct ReplicateClient {
    base_url: String,
    api_token: String,
    poll_interval: Duration,
    max_poll_attempts: u32,
    max_retries: u32,
}

impl ReplicateClient {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_url: config.replicate_base_url.trim_end_matches('/').to_string(),
            api_token: config.replicate_api_token.trim().to_string(),
            poll_interval: Duration::from_millis(config.replicate_poll_interval_ms),
            max_poll_attempts: config.replicate_max_poll_attempts,
            max_retries: config.replicate_max_retries,
        }
    }

    async fn create_prediction_once(&self, request: &GenerationRequest) -> Result<Prediction, RemoteError> {
        let url = format!("{}/models/{}/predictions", self.base_url, request.model.trim());
        let response = get_http_client()
            .post(url)
            .bearer_auth(&self.api_token)
            .json(&build_prediction_payload(request))
            .send()
            .await?;
        let response = ensure_success("Replicate", response).await?;
        Ok(response.json::<Prediction>().await?)
    }

    async fn create_prediction(&self, request: &GenerationRequest) -> Result<Prediction, RemoteError> {
        let mut attempt = 0;
        loop {
            match self.create_prediction_once(request).await {
                Ok(prediction) => return Ok(prediction),
                Err(err) => {
                    attempt += 1;
                    warn!(
                        "Replicate prediction request failed: {} (retryable={}, attempt={}/{})",
                        err,
                        err.is_retryable(),
                        attempt,
                        self.max_retries
                    );
                    if !err.is_retryable() || attempt >= self.max_retries {
                        return Err(err);
                    }
                    let delay = Duration::from_millis(RETRY_BASE_DELAY_MS << (attempt - 1));
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn get_prediction(&self, id: &str) -> Result<Prediction, RemoteError> {
        let response = get_http_client()
            .get(format!("{}/predictions/{}", self.base_url, id))
            .bearer_auth(&self.api_token)
            .send()
            .await?;
        let response = ensure_success("Replicate", response).await?;
        Ok(response.json::<Prediction>().await?)
    }

    async fn wait_for_outputs(&self, mut prediction: Prediction) -> Result<Vec<String>, RemoteError> {
        for attempt in 0..self.max_poll_attempts {
            if let Some(outcome) = prediction_outcome(&prediction) {
                return outcome;
            }
            debug!(
                "Prediction {} is {:?} (poll {}/{})",
                prediction.id,
                prediction.status,
                attempt + 1,
                self.max_poll_attempts
            );
            tokio::time::sleep(self.poll_interval).await;
            prediction = self.get_prediction(&prediction.id).await?;
        }

        prediction_outcome(&prediction).unwrap_or_else(|| {
            Err(RemoteError::Generation(format!(
                "prediction {} did not finish after {} polls",
                prediction.id, self.max_poll_attempts
            )))
        })
    }

    pub async fn generate(&self, request: &GenerationRequest) -> Result<Vec<String>, RemoteError> {
        request.validate()?;
        if self.api_token.is_empty() {
            return Err(RemoteError::NotConfigured("REPLICATE_API_TOKEN"));
        }

        let metadata = json!({
            "aspect_ratio": request.aspect_ratio,
            "num_outputs": request.num_outputs,
            "steps": request.num_inference_steps,
        });
        let urls = log_remote_timing("replicate", &request.model, "generate", Some(metadata), || async {
            let prediction = self.create_prediction(request).await?;
            info!("Created prediction {} for model {}", prediction.id, request.model);
            self.wait_for_outputs(prediction).await
        })
        .await?;

        info!("Generation produced {} image(s)", urls.len());
        Ok(urls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> GenerationRequest {
        GenerationRequest {
            prompt: "a red fox in the snow".to_string(),
            model: "black-forest-labs/flux-dev".to_string(),
            aspect_ratio: "16:9".to_string(),
            num_inference_steps: 28,
            output_format: "webp".to_string(),
            num_outputs: 2,
            seed: Some(42),
            width: None,
            height: None,
            guidance: None,
        }
    }

    #[test]
    fn validation_rejects_bad_requests() {
        assert!(request().validate().is_ok());

        let mut empty = request();
        empty.prompt = "  ".to_string();
        assert!(matches!(empty.validate(), Err(RemoteError::Validation(_))));

        let mut model = request();
        model.model = "flux-dev".to_string();
        assert!(model.validate().is_err());

        let mut outputs = request();
        outputs.num_outputs = 5;
        assert!(outputs.validate().is_err());

        let mut size = request();
        size.width = Some(1024);
        assert!(size.validate().is_err());
    }

    #[test]
    fn payload_omits_unset_options() {
        let payload = build_prediction_payload(&request());
        let input = &payload["input"];
        assert_eq!(input["prompt"], "a red fox in the snow");
        assert_eq!(input["aspect_ratio"], "16:9");
        assert_eq!(input["num_outputs"], 2);
        assert_eq!(input["seed"], 42);
        assert!(input.get("width").is_none());
        assert!(input.get("guidance").is_none());

        let mut sized = request();
        sized.width = Some(1024);
        sized.height = Some(768);
        let payload = build_prediction_payload(&sized);
        assert_eq!(payload["input"]["aspect_ratio"], "custom");
        assert_eq!(payload["input"]["height"], 768);
    }

    #[test]
    fn output_may_be_string_or_array() {
        assert_eq!(
            extract_output_urls(&json!("https://cdn.example/a.webp")),
            vec!["https://cdn.example/a.webp".to_string()]
        );
        assert_eq!(
            extract_output_urls(&json!(["https://cdn.example/a.webp", 3, "", "https://cdn.example/b.webp"])),
            vec![
                "https://cdn.example/a.webp".to_string(),
                "https://cdn.example/b.webp".to_string()
            ]
        );
        assert!(extract_output_urls(&json!({"url": "x"})).is_empty());
    }

    #[test]
    fn terminal_statuses_decide_outcome() {
        let running: Prediction =
            serde_json::from_value(json!({"id": "p1", "status": "processing"})).unwrap();
        assert!(prediction_outcome(&running).is_none());

        let done: Prediction = serde_json::from_value(
            json!({"id": "p1", "status": "succeeded", "output": ["https://cdn.example/a.png"]}),
        )
        .unwrap();
        assert_eq!(prediction_outcome(&done).unwrap().unwrap().len(), 1);

        let failed: Prediction = serde_json::from_value(
            json!({"id": "p1", "status": "failed", "error": "NSFW content detected"}),
        )
        .unwrap();
        let err = prediction_outcome(&failed).unwrap().unwrap_err();
        assert!(err.to_string().contains("NSFW content detected"));

        let canceled: Prediction =
            serde_json::from_value(json!({"id": "p1", "status": "canceled"})).unwrap();
        assert!(matches!(
            prediction_outcome(&canceled),
            Some(Err(RemoteError::Generation(_)))
        ));

        let empty: Prediction =
            serde_json::from_value(json!({"id": "p1", "status": "succeeded", "output": null})).unwrap();
        assert!(matches!(
            prediction_outcome(&empty),
            Some(Err(RemoteError::InvalidResponse(_)))
        ));
    }

    #[test]
    fn scene_config_converts_to_request() {
        let config = GenerationConfig {
            prompt: "a castle".to_string(),
            model: "black-forest-labs/flux-schnell".to_string(),
            aspect_ratio: "1:1".to_string(),
            num_inference_steps: 4,
            output_format: "png".to_string(),
            num_outputs: 1,
            source: None,
        };
        let request = GenerationRequest::from(&config);
        assert_eq!(request.num_inference_steps, 4);
        assert!(request.validate().is_ok());
    }
}
