//! HTTP front-ends for image generation models.
//!
//! Two independent services are provided:
//!
//! * [`uploads::router`] serves multipart image endpoints (`/generate_bg`,
//!   `/inpaint`, `/edit`, `/expand`) backed by the placeholder functions in
//!   [`mock`].
//! * [`service::router`] serves a WebUI-compatible text-to-image API on top of
//!   any [`ImagePipeline`], for example the candle [`DiffusionPipeline`].
//!
//! Both answer with raw PNG bytes.

pub mod diffusion;
pub mod error;
pub mod messages;
pub mod mock;
pub mod model;
pub mod response;
pub mod service;
pub mod uploads;

pub use diffusion::{DiffusionConfig, DiffusionError, DiffusionPipeline};
pub use error::ServiceError;
pub use model::{ImagePipeline, Txt2ImgRequest};
pub use service::ServiceContext;
