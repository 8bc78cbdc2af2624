//! Image phase: swap image tags for a per-call token, then splice the image in
//! wherever the token landed.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::document::{EmbeddedImage, Run, TemplateDocument, TextRun};

use super::{
    rewrite::{Decision, rewrite_document},
    tags::key_pattern,
};

const DATA_URI_IMAGE_PREFIX: &str = "data:image/";

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum ImageValueError {
    #[error("value is not a base64 data URI")]
    NotBase64,
    #[error("image payload is not valid base64: {0}")]
    Decode(String),
    #[error("image size could not be determined")]
    UnknownSize,
}

pub(crate) fn is_image_data_uri(value: &str) -> bool {
    value.trim_start().starts_with(DATA_URI_IMAGE_PREFIX)
}

/// Parse `data:image/<type>;base64,<payload>[|width=N][|height=N]`.
///
/// Width alone yields a square image; height alone keeps the intrinsic aspect
/// ratio when it can be read from the payload.
pub(crate) fn parse_image_value(value: &str) -> Result<EmbeddedImage, ImageValueError> {
    let mut segments = value.trim().split('|');
    let uri = segments.next().unwrap_or_default();

    let mut width = None;
    let mut height = None;
    for segment in segments {
        let Some((name, raw)) = segment.split_once('=') else {
            continue;
        };
        let parsed = raw.trim().parse::<u32>().ok().filter(|value| *value > 0);
        match name.trim().to_ascii_lowercase().as_str() {
            "width" => width = parsed,
            "height" => height = parsed,
            _ => {}
        }
    }

    let (meta, payload) = uri
        .strip_prefix("data:")
        .and_then(|rest| rest.split_once(','))
        .ok_or(ImageValueError::NotBase64)?;
    let content_type = meta
        .strip_suffix(";base64")
        .ok_or(ImageValueError::NotBase64)?
        .to_string();
    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    let data = STANDARD
        .decode(compact.as_bytes())
        .map_err(|err| ImageValueError::Decode(err.to_string()))?;

    let intrinsic = imagesize::blob_size(&data)
        .ok()
        .and_then(|size| Some((u32::try_from(size.width).ok()?, u32::try_from(size.height).ok()?)))
        .filter(|(w, h)| *w > 0 && *h > 0);

    let (width, height) = match (width, height, intrinsic) {
        (Some(w), Some(h), _) => (w, h),
        (Some(w), None, _) => (w, w),
        (None, Some(h), Some((iw, ih))) => {
            let scaled = (u64::from(h) * u64::from(iw) + u64::from(ih) / 2) / u64::from(ih);
            (u32::try_from(scaled).unwrap_or(u32::MAX).max(1), h)
        }
        (None, Some(h), None) => (h, h),
        (None, None, Some(size)) => size,
        (None, None, None) => return Err(ImageValueError::UnknownSize),
    };

    Ok(EmbeddedImage {
        content_type,
        data,
        width,
        height,
    })
}

/// Run the image phase over every top-level image entry in `data`.
/// Returns the number of images inserted.
pub(crate) fn apply(document: &mut TemplateDocument, data: &Value) -> usize {
    let Some(entries) = data.as_object() else {
        return 0;
    };

    let mut inserted = 0;
    for (key, value) in entries {
        let Some(raw) = value.as_str().filter(|raw| is_image_data_uri(raw)) else {
            continue;
        };

        let image = match parse_image_value(raw) {
            Ok(image) => image,
            Err(err) => {
                warn!(
                    target = "application::template::image",
                    key = %key,
                    error = %err,
                    "skipping unreadable image value"
                );
                continue;
            }
        };

        let pattern = match key_pattern(key) {
            Ok(pattern) => pattern,
            Err(err) => {
                warn!(
                    target = "application::template::image",
                    key = %key,
                    error = %err,
                    "skipping image key that cannot be matched"
                );
                continue;
            }
        };

        let token = format!("__DOCFLOW_IMG_{}__", Uuid::new_v4().simple());
        rewrite_document(document, &pattern, |_| Decision::Replace(token.clone()));

        let count = splice_image(document, &token, &image);
        if count == 0 {
            debug!(
                target = "application::template::image",
                key = %key,
                "image placeholder not present in template"
            );
        }
        inserted += count;
    }

    inserted
}

/// Split every text run containing `token`, inserting `image` at each occurrence.
fn splice_image(document: &mut TemplateDocument, token: &str, image: &EmbeddedImage) -> usize {
    let mut count = 0;
    for paragraph in &mut document.paragraphs {
        if !paragraph.runs.iter().any(|run| contains_token(run, token)) {
            continue;
        }

        let mut runs = Vec::with_capacity(paragraph.runs.len() + 2);
        for run in paragraph.runs.drain(..) {
            match run {
                Run::Text(TextRun { text, style }) if text.contains(token) => {
                    let mut pieces = text.split(token).peekable();
                    while let Some(piece) = pieces.next() {
                        if !piece.is_empty() {
                            runs.push(Run::styled(piece, style));
                        }
                        if pieces.peek().is_some() {
                            runs.push(Run::image(image.clone()));
                            count += 1;
                        }
                    }
                }
                other => runs.push(other),
            }
        }
        paragraph.runs = runs;
    }
    count
}

fn contains_token(run: &Run, token: &str) -> bool {
    matches!(run, Run::Text(text) if text.text.contains(token))
}
