//! Album art and artist images from `com.roonlabs.image:1`.

use serde::Serialize;

use crate::moo::{Body, MooError};
use crate::protocol_constants::SERVICE_IMAGE;
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageScale {
    /// Keep aspect ratio, fit inside the box.
    Fit,
    /// Keep aspect ratio, cover the box.
    Fill,
    Stretch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ImageFormat {
    #[serde(rename = "image/jpeg")]
    Jpeg,
    #[serde(rename = "image/png")]
    Png,
}

/// Scaling options. Without a scale the core returns the original image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImageOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<ImageScale>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<ImageFormat>,
}

impl ImageOptions {
    /// Scaled to fit `width` x `height`.
    pub fn fit(width: u32, height: u32) -> Self {
        Self {
            scale: Some(ImageScale::Fit),
            width: Some(width),
            height: Some(height),
            format: None,
        }
    }
}

#[derive(Serialize)]
struct ImageRequest<'a> {
    image_key: &'a str,
    #[serde(flatten)]
    options: &'a ImageOptions,
}

fn request_body(image_key: &str, options: &ImageOptions) -> Result<Body, MooError> {
    Body::json(&ImageRequest { image_key, options })
}

/// Fetches the image behind `image_key` (from [`super::NowPlaying`]).
pub async fn get_image(
    session: &Session,
    image_key: &str,
    options: &ImageOptions,
) -> Result<Vec<u8>, MooError> {
    let reply = session
        .send_request(
            &format!("{}/get_image", SERVICE_IMAGE),
            request_body(image_key, options)?,
        )
        .await?;
    reply.expect_name("Success")?;
    let data = reply.bytes().to_vec();
    log::debug!(
        "[Image] {} -> {} bytes ({})",
        image_key,
        data.len(),
        reply.content_type.as_deref().unwrap_or("no content type")
    );
    Ok(data)
}
