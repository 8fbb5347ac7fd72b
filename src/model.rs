use image::RgbImage;
use serde::{Deserialize, Serialize};

const DEFAULT_WIDTH: u32 = 512;
const DEFAULT_HEIGHT: u32 = 512;
const DEFAULT_STEPS: usize = 20;
const DEFAULT_GUIDANCE_SCALE: f64 = 7.5;

/// Text-to-image generation parameters, accepted as the JSON body of the
/// txt2img endpoints. Every field except `prompt` has a default.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Txt2ImgRequest {
    pub prompt: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_steps")]
    pub num_inference_steps: usize,
    #[serde(default = "default_guidance_scale")]
    pub guidance_scale: f64,
}

impl Txt2ImgRequest {
    /// Creates a request for `prompt` with every other parameter at its default.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            num_inference_steps: DEFAULT_STEPS,
            guidance_scale: DEFAULT_GUIDANCE_SCALE,
        }
    }
}

fn default_width() -> u32 {
    DEFAULT_WIDTH
}

fn default_height() -> u32 {
    DEFAULT_HEIGHT
}

fn default_steps() -> usize {
    DEFAULT_STEPS
}

fn default_guidance_scale() -> f64 {
    DEFAULT_GUIDANCE_SCALE
}

/// Trait for image-generation backends served by the diffusion service.
///
/// Implementations are loaded once at startup and then shared read-only
/// between requests, so generation takes `&self`.
pub trait ImagePipeline: Send + Sync + 'static {
    /// The error type that can be returned during generation.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Runs the pipeline for the given request. Blocks until the image is ready.
    fn generate(&self, request: &Txt2ImgRequest) -> Result<RgbImage, Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_parameters_take_defaults() {
        let request: Txt2ImgRequest = serde_json::from_str(r#"{"prompt": "a red fox"}"#).unwrap();
        assert_eq!(request, Txt2ImgRequest::new("a red fox"));
        assert_eq!((request.width, request.height), (512, 512));
        assert_eq!(request.num_inference_steps, 20);
        assert_eq!(request.guidance_scale, 7.5);
    }

    #[test]
    fn explicit_parameters_override_defaults() {
        let request: Txt2ImgRequest = serde_json::from_str(
            r#"{"prompt": "dunes", "width": 768, "height": 256, "num_inference_steps": 4, "guidance_scale": 1.0}"#,
        )
        .unwrap();
        assert_eq!((request.width, request.height), (768, 256));
        assert_eq!(request.num_inference_steps, 4);
        assert_eq!(request.guidance_scale, 1.0);
    }

    #[test]
    fn prompt_is_required() {
        assert!(serde_json::from_str::<Txt2ImgRequest>(r#"{"width": 512}"#).is_err());
    }
}
