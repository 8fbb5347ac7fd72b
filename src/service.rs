//! Diffusion service: health, model listing and text-to-image endpoints
//! backed by an [`ImagePipeline`].

use axum::{
    Json, Router,
    extract::State,
    response::Response,
    routing::{get, post},
};
use std::{fmt::Display, sync::Arc, time::Instant};

use crate::{
    error::ServiceError,
    messages::{HEALTHY, HealthResponse, SdModel, UNHEALTHY},
    model::{ImagePipeline, Txt2ImgRequest},
    response::{encode_png, png_response},
};

/// Everything the diffusion handlers need, built once before the server
/// starts accepting connections and never mutated afterwards.
pub struct ServiceContext<P: ImagePipeline> {
    model_name: String,
    pipeline: Option<Arc<P>>,
}

impl<P: ImagePipeline> ServiceContext<P> {
    /// Creates a context around an already loaded pipeline, or around nothing
    /// if loading failed.
    pub fn new(model_name: impl Into<String>, pipeline: Option<P>) -> Self {
        Self {
            model_name: model_name.into(),
            pipeline: pipeline.map(Arc::new),
        }
    }

    /// Runs `loader` and keeps its pipeline. A loading failure is logged and
    /// leaves the context without a pipeline.
    pub fn load<E, F>(model_name: impl Into<String>, loader: F) -> Self
    where
        E: Display,
        F: FnOnce() -> Result<P, E>,
    {
        let model_name = model_name.into();
        log::info!("Loading pipeline {}", model_name);

        let start_time = Instant::now();
        let pipeline = match loader() {
            Ok(pipeline) => {
                log::info!(
                    "Pipeline {} loaded in {:.1?}",
                    model_name,
                    start_time.elapsed()
                );
                Some(pipeline)
            }
            Err(e) => {
                log::error!("Failed to load pipeline {}: {}", model_name, e);
                None
            }
        };

        Self::new(model_name, pipeline)
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn is_loaded(&self) -> bool {
        self.pipeline.is_some()
    }

    fn pipeline(&self) -> Result<Arc<P>, ServiceError> {
        self.pipeline.clone().ok_or(ServiceError::PipelineNotLoaded)
    }
}

async fn get_health<P: ImagePipeline>(
    State(context): State<Arc<ServiceContext<P>>>,
) -> Json<HealthResponse> {
    let response = if context.is_loaded() {
        HealthResponse {
            status: HEALTHY.to_string(),
            models: vec![context.model_name().to_string()],
        }
    } else {
        HealthResponse {
            status: UNHEALTHY.to_string(),
            models: Vec::new(),
        }
    };
    Json(response)
}

async fn get_models<P: ImagePipeline>(
    State(context): State<Arc<ServiceContext<P>>>,
) -> Json<Vec<SdModel>> {
    Json(vec![SdModel {
        title: context.model_name().to_string(),
        model_name: context.model_name().to_string(),
    }])
}

async fn post_txt2img<P: ImagePipeline>(
    State(context): State<Arc<ServiceContext<P>>>,
    Json(request): Json<Txt2ImgRequest>,
) -> Result<Response, ServiceError> {
    let pipeline = context.pipeline()?;

    log::info!("Generating image with prompt: {}", request.prompt);
    let start_time = Instant::now();

    // the pipeline blocks for the whole sampling loop
    let image = tokio::task::spawn_blocking(move || pipeline.generate(&request))
        .await
        .map_err(|e| ServiceError::Generation(e.to_string()))?
        .map_err(|e| {
            log::error!("Error generating image: {}", e);
            ServiceError::Generation(e.to_string())
        })?;

    log::debug!(
        "Generated {}x{} image in {:.1?}",
        image.width(),
        image.height(),
        start_time.elapsed()
    );

    Ok(png_response(encode_png(&image)?))
}

/// Builds the diffusion service router around `context`.
pub fn router<P: ImagePipeline>(context: ServiceContext<P>) -> Router {
    Router::new()
        .route("/", get(|| async { "Diffusion gateway is running" }))
        .route("/health", get(get_health::<P>))
        .route("/sdapi/v1/sd-models", get(get_models::<P>))
        .route("/sdapi/v1/txt2img", post(post_txt2img::<P>))
        .route("/generate_bg", post(post_txt2img::<P>))
        .with_state(Arc::new(context))
}
