use axum::{
    body::Body,
    http::header,
    response::{IntoResponse, Response},
};
use image::{ImageFormat, RgbImage};
use std::io::Cursor;

use crate::error::ServiceError;

/// Wraps already-encoded image bytes into a single-chunk `image/png` response.
pub fn png_response(bytes: Vec<u8>) -> Response {
    ([(header::CONTENT_TYPE, "image/png")], Body::from(bytes)).into_response()
}

/// Encodes a generated image as PNG.
pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>, ServiceError> {
    let mut bytes = Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, ImageFormat::Png)
        .map_err(|e| ServiceError::Generation(e.to_string()))?;
    Ok(bytes.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgb};

    #[test]
    fn encoded_image_decodes_with_same_size() {
        let image = RgbImage::from_pixel(64, 32, Rgb([10, 200, 30]));
        let png = encode_png(&image).unwrap();

        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
        let decoded = image::load_from_memory_with_format(&png, ImageFormat::Png).unwrap();
        assert_eq!(decoded.dimensions(), (64, 32));
        assert_eq!(decoded.to_rgb8().get_pixel(5, 5), &Rgb([10, 200, 30]));
    }

    #[test]
    fn response_has_png_content_type() {
        let response = png_response(vec![1, 2, 3]);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
    }
}
