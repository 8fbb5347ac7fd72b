//! Upload service: multipart image endpoints backed by the [`crate::mock`]
//! generation functions.

use axum::{
    Router,
    extract::{DefaultBodyLimit, Multipart, Query},
    response::Response,
    routing::post,
};
use serde::Deserialize;

use crate::{error::ServiceError, mock, response::png_response};

#[derive(Debug, Default, Deserialize)]
pub struct PromptQuery {
    pub prompt: Option<String>,
}

/// The parts of an upload request, each read fully into memory.
#[derive(Debug, Default)]
struct UploadForm {
    image: Option<Vec<u8>>,
    mask: Option<Vec<u8>>,
    prompt: Option<String>,
}

impl UploadForm {
    async fn read(mut multipart: Multipart) -> Result<Self, ServiceError> {
        let mut form = UploadForm::default();
        while let Some(field) = multipart.next_field().await? {
            let name = field.name().map(str::to_owned);
            match name.as_deref() {
                Some("image") => form.image = Some(field.bytes().await?.to_vec()),
                Some("mask") => form.mask = Some(field.bytes().await?.to_vec()),
                Some("prompt") => form.prompt = Some(field.text().await?),
                other => log::debug!("Ignoring multipart field {:?}", other),
            }
        }
        Ok(form)
    }

    fn take_image(&mut self) -> Result<Vec<u8>, ServiceError> {
        self.image.take().ok_or(ServiceError::MissingField("image"))
    }

    fn take_mask(&mut self) -> Result<Vec<u8>, ServiceError> {
        self.mask.take().ok_or(ServiceError::MissingField("mask"))
    }

    // the form field wins over the query string
    fn take_prompt(&mut self, query: PromptQuery) -> Option<String> {
        self.prompt.take().or(query.prompt)
    }
}

async fn post_generate_bg(
    Query(query): Query<PromptQuery>,
    multipart: Multipart,
) -> Result<Response, ServiceError> {
    let mut form = UploadForm::read(multipart).await?;
    let image = form.take_image()?;
    let prompt = form.take_prompt(query).unwrap_or_default();

    log::info!("Generating background ({} bytes)", image.len());
    Ok(png_response(mock::generate_background(&image, &prompt)))
}

async fn post_inpaint(
    Query(query): Query<PromptQuery>,
    multipart: Multipart,
) -> Result<Response, ServiceError> {
    let mut form = UploadForm::read(multipart).await?;
    let image = form.take_image()?;
    let mask = form.take_mask()?;
    let prompt = form.take_prompt(query).unwrap_or_default();

    log::info!("Inpainting ({} bytes, mask {} bytes)", image.len(), mask.len());
    Ok(png_response(mock::inpaint(&image, &mask, &prompt)))
}

async fn post_edit(
    Query(query): Query<PromptQuery>,
    multipart: Multipart,
) -> Result<Response, ServiceError> {
    let mut form = UploadForm::read(multipart).await?;
    let image = form.take_image()?;
    let mask = form.take_mask()?;
    let prompt = form
        .take_prompt(query)
        .ok_or(ServiceError::MissingField("prompt"))?;

    log::info!("Editing with prompt: {}", prompt);
    Ok(png_response(mock::edit(&image, &mask, &prompt)))
}

async fn post_expand(
    Query(query): Query<PromptQuery>,
    multipart: Multipart,
) -> Result<Response, ServiceError> {
    let mut form = UploadForm::read(multipart).await?;
    let image = form.take_image()?;
    let prompt = form
        .take_prompt(query)
        .ok_or(ServiceError::MissingField("prompt"))?;

    log::info!("Expanding with prompt: {}", prompt);
    Ok(png_response(mock::expand(&image, &prompt)))
}

/// Builds the upload service router. Uploads are not size-limited.
pub fn router() -> Router {
    Router::new()
        .route("/generate_bg", post(post_generate_bg))
        .route("/inpaint", post(post_inpaint))
        .route("/edit", post(post_edit))
        .route("/expand", post(post_expand))
        .layer(DefaultBodyLimit::disable())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form_with_prompt(prompt: Option<&str>) -> UploadForm {
        UploadForm {
            prompt: prompt.map(str::to_owned),
            ..UploadForm::default()
        }
    }

    fn query(prompt: Option<&str>) -> PromptQuery {
        PromptQuery {
            prompt: prompt.map(str::to_owned),
        }
    }

    #[test]
    fn form_prompt_wins_over_query() {
        let mut form = form_with_prompt(Some("from form"));
        assert_eq!(
            form.take_prompt(query(Some("from query"))).as_deref(),
            Some("from form")
        );
    }

    #[test]
    fn query_prompt_is_the_fallback() {
        let mut form = form_with_prompt(None);
        assert_eq!(
            form.take_prompt(query(Some("from query"))).as_deref(),
            Some("from query")
        );
        assert_eq!(form_with_prompt(None).take_prompt(query(None)), None);
    }

    #[test]
    fn missing_parts_name_the_field() {
        let mut form = UploadForm::default();
        assert!(matches!(
            form.take_image(),
            Err(ServiceError::MissingField("image"))
        ));
        assert!(matches!(
            form.take_mask(),
            Err(ServiceError::MissingField("mask"))
        ));
    }
}
