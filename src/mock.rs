//! Placeholder generation functions for the upload service.
//!
//! Each function has the signature of a real image-editing backend but
//! returns the input image untouched.

/// Generates a background behind the subject of `image`.
pub fn generate_background(image: &[u8], _prompt: &str) -> Vec<u8> {
    image.to_vec()
}

/// Fills the region of `image` selected by `mask`.
pub fn inpaint(image: &[u8], _mask: &[u8], _prompt: &str) -> Vec<u8> {
    image.to_vec()
}

/// Applies an instruction-driven edit to the region of `image` selected by `mask`.
pub fn edit(image: &[u8], _mask: &[u8], _prompt: &str) -> Vec<u8> {
    image.to_vec()
}

/// Outpaints `image` beyond its borders.
pub fn expand(image: &[u8], _prompt: &str) -> Vec<u8> {
    image.to_vec()
}
