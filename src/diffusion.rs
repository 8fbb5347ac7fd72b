//! Stable Diffusion v1.5 on candle.
//!
//! Weights are fetched from the Hugging Face hub (or its local cache) when the
//! pipeline is loaded; sampling runs on CUDA when available, otherwise on CPU.

use candle_core::{DType, Device, IndexOp, Module, Tensor};
use candle_transformers::models::stable_diffusion::{
    self, StableDiffusionConfig, clip::ClipTextTransformer, unet_2d::UNet2DConditionModel,
    vae::AutoEncoderKL,
};
use hf_hub::api::sync::Api;
use image::RgbImage;
use thiserror::Error;
use tokenizers::Tokenizer;

use crate::model::{ImagePipeline, Txt2ImgRequest};

pub const DEFAULT_MODEL_ID: &str = "runwayml/stable-diffusion-v1-5";
pub const DEFAULT_TOKENIZER_ID: &str = "openai/clip-vit-base-patch32";

const VAE_SCALE: f64 = 0.18215;
const LATENT_CHANNELS: usize = 4;
const END_OF_TEXT: &str = "<|endoftext|>";
// upper bound on each side of a generated image
const MAX_SIDE: u32 = 2048;

#[derive(Debug, Error)]
pub enum DiffusionError {
    #[error("candle error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("failed to fetch weights: {0}")]
    Hub(#[from] hf_hub::api::sync::ApiError),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error("prompt is too long: {len} tokens, the maximum is {max}")]
    PromptTooLong { len: usize, max: usize },

    #[error(
        "`height` and `width` have to be positive multiples of 8 up to 2048 but are {height} and {width}"
    )]
    InvalidDimensions { width: u32, height: u32 },

    #[error("`num_inference_steps` has to be at least 1")]
    NoSteps,

    #[error("decoded tensor with shape {0:?} is not an RGB image")]
    NotAnImage(Vec<usize>),
}

/// Where to load the pipeline from and where to run it.
#[derive(Debug, Clone)]
pub struct DiffusionConfig {
    /// Hub repository holding the `text_encoder`, `unet` and `vae` weights.
    pub model_id: String,
    /// Hub repository holding the CLIP `tokenizer.json`.
    pub tokenizer_id: String,
    /// Run on CPU even if a CUDA device is available.
    pub cpu: bool,
}

impl Default for DiffusionConfig {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL_ID.to_string(),
            tokenizer_id: DEFAULT_TOKENIZER_ID.to_string(),
            cpu: false,
        }
    }
}

impl DiffusionConfig {
    /// The name the model is advertised under, e.g. `stable-diffusion-v1-5`.
    pub fn model_name(&self) -> &str {
        self.model_id
            .rsplit('/')
            .next()
            .unwrap_or(self.model_id.as_str())
    }
}

pub struct DiffusionPipeline {
    device: Device,
    dtype: DType,
    sd_config: StableDiffusionConfig,
    tokenizer: Tokenizer,
    pad_id: u32,
    clip: ClipTextTransformer,
    unet: UNet2DConditionModel,
    vae: AutoEncoderKL,
}

impl DiffusionPipeline {
    /// Downloads (or reads from cache) every weight file and builds the models.
    pub fn load(config: &DiffusionConfig) -> Result<Self, DiffusionError> {
        let device = if config.cpu {
            Device::Cpu
        } else {
            Device::cuda_if_available(0)?
        };
        let dtype = if device.is_cuda() {
            DType::F16
        } else {
            DType::F32
        };
        log::info!("Using device {:?} with {:?} weights", device, dtype);

        let sd_config = StableDiffusionConfig::v1_5(None, None, None);
        let use_f16 = dtype == DType::F16;

        let api = Api::new()?;
        let tokenizer_file = api
            .model(config.tokenizer_id.clone())
            .get("tokenizer.json")?;
        let repo = api.model(config.model_id.clone());
        let clip_weights = repo.get(&weights_file("text_encoder/model", use_f16))?;
        let unet_weights = repo.get(&weights_file("unet/diffusion_pytorch_model", use_f16))?;
        let vae_weights = repo.get(&weights_file("vae/diffusion_pytorch_model", use_f16))?;

        let tokenizer = Tokenizer::from_file(tokenizer_file)
            .map_err(|e| DiffusionError::Tokenizer(e.to_string()))?;
        let pad_token = sd_config.clip.pad_with.as_deref().unwrap_or(END_OF_TEXT);
        let pad_id = tokenizer
            .get_vocab(true)
            .get(pad_token)
            .copied()
            .ok_or_else(|| DiffusionError::Tokenizer(format!("unknown pad token {pad_token}")))?;

        log::debug!("Building text encoder");
        let clip = stable_diffusion::build_clip_transformer(
            &sd_config.clip,
            clip_weights,
            &device,
            DType::F32,
        )?;
        log::debug!("Building unet");
        let unet = sd_config.build_unet(unet_weights, &device, LATENT_CHANNELS, false, dtype)?;
        log::debug!("Building autoencoder");
        let vae = sd_config.build_vae(vae_weights, &device, dtype)?;

        Ok(Self {
            device,
            dtype,
            sd_config,
            tokenizer,
            pad_id,
            clip,
            unet,
            vae,
        })
    }

    fn encode_prompt(&self, prompt: &str) -> Result<Tensor, DiffusionError> {
        let max_len = self.sd_config.clip.max_position_embeddings;
        let mut tokens = self
            .tokenizer
            .encode(prompt, true)
            .map_err(|e| DiffusionError::Tokenizer(e.to_string()))?
            .get_ids()
            .to_vec();
        if tokens.len() > max_len {
            return Err(DiffusionError::PromptTooLong {
                len: tokens.len(),
                max: max_len,
            });
        }
        tokens.resize(max_len, self.pad_id);

        let tokens = Tensor::new(tokens.as_slice(), &self.device)?.unsqueeze(0)?;
        Ok(self.clip.forward(&tokens)?)
    }
}

impl ImagePipeline for DiffusionPipeline {
    type Error = DiffusionError;

    fn generate(&self, request: &Txt2ImgRequest) -> Result<RgbImage, Self::Error> {
        check_dimensions(request.width, request.height)?;
        check_steps(request.num_inference_steps)?;

        // classifier-free guidance runs the unconditional and the prompted
        // latents as one batch of two
        let use_guidance = request.guidance_scale > 1.0;
        let text_embeddings = self.encode_prompt(&request.prompt)?;
        let text_embeddings = if use_guidance {
            let uncond_embeddings = self.encode_prompt("")?;
            Tensor::cat(&[uncond_embeddings, text_embeddings], 0)?
        } else {
            text_embeddings
        };
        let text_embeddings = text_embeddings.to_dtype(self.dtype)?;

        let mut scheduler = self.sd_config.build_scheduler(request.num_inference_steps)?;
        let timesteps = scheduler.timesteps().to_vec();

        let latent_shape = (
            1,
            LATENT_CHANNELS,
            request.height as usize / 8,
            request.width as usize / 8,
        );
        let latents = Tensor::randn(0f32, 1f32, latent_shape, &self.device)?;
        let mut latents = (latents * scheduler.init_noise_sigma())?.to_dtype(self.dtype)?;

        for (index, &timestep) in timesteps.iter().enumerate() {
            log::debug!("Sampling step {}/{}", index + 1, timesteps.len());

            let model_input = if use_guidance {
                Tensor::cat(&[&latents, &latents], 0)?
            } else {
                latents.clone()
            };
            let model_input = scheduler.scale_model_input(model_input, timestep)?;
            let noise_pred = self
                .unet
                .forward(&model_input, timestep as f64, &text_embeddings)?;

            let noise_pred = if use_guidance {
                let chunks = noise_pred.chunk(2, 0)?;
                let (uncond, text) = (&chunks[0], &chunks[1]);
                (uncond + ((text - uncond)? * request.guidance_scale)?)?
            } else {
                noise_pred
            };

            latents = scheduler.step(&noise_pred, timestep, &latents)?;
        }

        let images = self.vae.decode(&(latents / VAE_SCALE)?)?;
        let images = ((images / 2.)? + 0.5)?.to_device(&Device::Cpu)?;
        let images = (images.clamp(0f32, 1.)? * 255.)?.to_dtype(DType::U8)?;

        to_rgb_image(&images.i(0)?)
    }
}

fn weights_file(stem: &str, use_f16: bool) -> String {
    if use_f16 {
        format!("{stem}.fp16.safetensors")
    } else {
        format!("{stem}.safetensors")
    }
}

fn check_dimensions(width: u32, height: u32) -> Result<(), DiffusionError> {
    let valid_side = |side: u32| side > 0 && side <= MAX_SIDE && side % 8 == 0;
    if !valid_side(width) || !valid_side(height) {
        return Err(DiffusionError::InvalidDimensions { width, height });
    }
    Ok(())
}

fn check_steps(num_inference_steps: usize) -> Result<(), DiffusionError> {
    if num_inference_steps == 0 {
        return Err(DiffusionError::NoSteps);
    }
    Ok(())
}

/// Converts a `(3, height, width)` u8 tensor into an image buffer.
fn to_rgb_image(image: &Tensor) -> Result<RgbImage, DiffusionError> {
    let (channels, height, width) = image.dims3()?;
    if channels != 3 {
        return Err(DiffusionError::NotAnImage(image.dims().to_vec()));
    }
    let pixels = image.permute((1, 2, 0))?.flatten_all()?.to_vec1::<u8>()?;
    RgbImage::from_raw(width as u32, height as u32, pixels)
        .ok_or_else(|| DiffusionError::NotAnImage(image.dims().to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_name_is_last_repo_segment() {
        assert_eq!(DiffusionConfig::default().model_name(), "stable-diffusion-v1-5");

        let local = DiffusionConfig {
            model_id: "my-model".to_string(),
            ..DiffusionConfig::default()
        };
        assert_eq!(local.model_name(), "my-model");
    }

    #[test]
    fn half_precision_weights_use_fp16_files() {
        assert_eq!(
            weights_file("unet/diffusion_pytorch_model", true),
            "unet/diffusion_pytorch_model.fp16.safetensors"
        );
        assert_eq!(
            weights_file("text_encoder/model", false),
            "text_encoder/model.safetensors"
        );
    }

    #[test]
    fn dimensions_must_be_multiples_of_eight() {
        assert!(check_dimensions(512, 512).is_ok());
        assert!(check_dimensions(768, 64).is_ok());
        assert!(matches!(
            check_dimensions(500, 512),
            Err(DiffusionError::InvalidDimensions { width: 500, .. })
        ));
        assert!(check_dimensions(0, 512).is_err());
    }

    #[test]
    fn oversized_dimensions_are_rejected() {
        assert!(check_dimensions(2048, 2048).is_ok());
        assert!(matches!(
            check_dimensions(2056, 512),
            Err(DiffusionError::InvalidDimensions { width: 2056, .. })
        ));
        assert!(matches!(
            check_dimensions(4_000_000_000, 4_000_000_000),
            Err(DiffusionError::InvalidDimensions { .. })
        ));
    }

    #[test]
    fn at_least_one_step_is_required() {
        assert!(check_steps(1).is_ok());
        assert!(check_steps(50).is_ok());
        assert!(matches!(check_steps(0), Err(DiffusionError::NoSteps)));
    }

    #[test]
    fn channel_first_tensor_becomes_rgb_image() -> Result<(), DiffusionError> {
        // red channel = 1, green = 2, blue = 3 for a 2x4 image
        let data: Vec<u8> = [1u8, 2, 3]
            .iter()
            .flat_map(|&v| std::iter::repeat_n(v, 8))
            .collect();
        let tensor = Tensor::from_vec(data, (3, 2, 4), &Device::Cpu)?;

        let image = to_rgb_image(&tensor)?;
        assert_eq!(image.dimensions(), (4, 2));
        assert!(image.pixels().all(|p| p.0 == [1, 2, 3]));
        Ok(())
    }

    #[test]
    fn grayscale_tensor_is_rejected() -> Result<(), DiffusionError> {
        let tensor = Tensor::zeros((1, 2, 2), DType::U8, &Device::Cpu)?;
        assert!(matches!(
            to_rgb_image(&tensor),
            Err(DiffusionError::NotAnImage(_))
        ));
        Ok(())
    }
}
