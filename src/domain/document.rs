//! Abstract document-text graph that substitution passes operate on.
//!
//! A document is an ordered list of paragraphs; a paragraph is an ordered list
//! of runs. Text runs are the minimal text-bearing unit; image runs carry
//! decoded image bytes together with their display size in pixels.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TemplateDocument {
    #[serde(default)]
    pub paragraphs: Vec<Paragraph>,
}

impl TemplateDocument {
    pub fn new(paragraphs: Vec<Paragraph>) -> Self {
        Self { paragraphs }
    }

    /// Build a document with one paragraph per line of `text`.
    pub fn from_plain_text(text: &str) -> Self {
        let paragraphs = text
            .lines()
            .map(|line| Paragraph::from_text(line))
            .collect();
        Self { paragraphs }
    }

    /// Full document text, paragraphs separated by newlines.
    pub fn text(&self) -> String {
        self.paragraphs
            .iter()
            .map(Paragraph::text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn images(&self) -> impl Iterator<Item = &EmbeddedImage> {
        self.paragraphs
            .iter()
            .flat_map(|paragraph| paragraph.runs.iter())
            .filter_map(|run| match run {
                Run::Image(image) => Some(&image.image),
                Run::Text(_) => None,
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Paragraph {
    #[serde(default)]
    pub runs: Vec<Run>,
}

impl Paragraph {
    pub fn new(runs: Vec<Run>) -> Self {
        Self { runs }
    }

    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            runs: vec![Run::text(text)],
        }
    }

    pub fn text(&self) -> String {
        self.runs
            .iter()
            .filter_map(|run| match run {
                Run::Text(text) => Some(text.text.as_str()),
                Run::Image(_) => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Run {
    Text(TextRun),
    Image(ImageRun),
}

impl Run {
    pub fn text(text: impl Into<String>) -> Self {
        Run::Text(TextRun {
            text: text.into(),
            style: RunStyle::default(),
        })
    }

    pub fn styled(text: impl Into<String>, style: RunStyle) -> Self {
        Run::Text(TextRun {
            text: text.into(),
            style,
        })
    }

    pub fn image(image: EmbeddedImage) -> Self {
        Run::Image(ImageRun { image })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextRun {
    pub text: String,
    #[serde(flatten)]
    pub style: RunStyle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunStyle {
    #[serde(default, skip_serializing_if = "is_false")]
    pub bold: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub italic: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub underline: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRun {
    pub image: EmbeddedImage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddedImage {
    pub content_type: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded.as_bytes()).map_err(D::Error::custom)
    }
}
