use serde::{Deserialize, Serialize};

/// `/health` status when the pipeline is loaded.
pub const HEALTHY: &str = "healthy";
/// `/health` status when the pipeline failed to load.
pub const UNHEALTHY: &str = "unhealthy";

/// Body of `/health`: load status and the models being served.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub models: Vec<String>,
}

/// Entry of the `/sdapi/v1/sd-models` listing, shaped like the WebUI API.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SdModel {
    pub title: String,
    pub model_name: String,
}
