//! Card rendering: fit the comment, compose an SVG in overlay or synthetic
//! mode, rasterise it to PNG.
use resvg::tiny_skia::{Pixmap, Transform};
use resvg::usvg;
use thiserror::Error;
use tracing::debug;

use crate::config::{Image, ImageMode};
use crate::metadata::card_file_name;

pub mod background;
pub mod fit;
pub mod svg;

/// Maximum length of the accessibility caption, in characters.
pub const CAPTION_MAX_CHARS: usize = 420;

#[derive(Debug, Error)]
pub enum CardError {
    #[error("background image could not be decoded: {0}")]
    ImageDecode(String),
    #[error("card rendering failed: {0}")]
    Render(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardMode {
    Overlay,
    Synthetic,
}

#[derive(Debug, Clone)]
pub struct CardInput<'a> {
    pub id: u32,
    pub comment: &'a str,
    pub title: &'a str,
    pub publisher: &'a str,
}

#[derive(Debug, Clone)]
pub struct RenderedCard {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub caption: String,
    pub mode: CardMode,
    pub font_size: u32,
}

pub fn caption(publisher: &str, title: &str) -> String {
    format!("{publisher} {title}")
        .chars()
        .take(CAPTION_MAX_CHARS)
        .collect()
}

pub struct CardRenderer {
    image: Image,
    options: usvg::Options<'static>,
}

impl std::fmt::Debug for CardRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardRenderer")
            .field("mode", &self.image.mode)
            .field("width", &self.image.width)
            .field("height", &self.image.height)
            .finish_non_exhaustive()
    }
}

impl CardRenderer {
    /// Renderer using the fonts installed on the host.
    pub fn new(image: Image) -> Self {
        let mut options = usvg::Options::default();
        options.fontdb_mut().load_system_fonts();
        Self { image, options }
    }

    /// Renderer with an empty font database (text is laid out but not drawn).
    pub fn without_fonts(image: Image) -> Self {
        Self {
            image,
            options: usvg::Options::default(),
        }
    }

    fn canvas(&self) -> svg::Canvas<'_> {
        svg::Canvas {
            width: self.image.width,
            height: self.image.height,
            footer: &self.image.footer,
            overlay: &self.image.overlay,
        }
    }

    /// Compose the card SVG. A supplied background that cannot be decoded
    /// fails the whole card; it is never silently replaced.
    pub fn compose(
        &self,
        input: &CardInput<'_>,
        background: Option<&[u8]>,
    ) -> Result<(String, CardMode, fit::FittedText), CardError> {
        let canvas = self.canvas();
        match (self.image.mode, background) {
            (ImageMode::PublisherOverlay, Some(bytes)) => {
                let prepared = background::prepare(bytes, self.image.width, self.image.height)?;
                let (doc, fitted) = svg::overlay(&canvas, input.comment, &prepared);
                Ok((doc, CardMode::Overlay, fitted))
            }
            _ => {
                let (doc, fitted) =
                    svg::synthetic(&canvas, input.comment, input.title, input.publisher);
                Ok((doc, CardMode::Synthetic, fitted))
            }
        }
    }

    pub fn render(
        &self,
        input: &CardInput<'_>,
        background: Option<&[u8]>,
    ) -> Result<RenderedCard, CardError> {
        let (doc, mode, fitted) = self.compose(input, background)?;
        let bytes = self.rasterize(&doc)?;
        debug!(
            id = input.id,
            ?mode,
            font_size = fitted.font_size,
            lines = fitted.lines.len(),
            iterations = fitted.iterations,
            overflow = fitted.overflow,
            "card rendered"
        );
        Ok(RenderedCard {
            bytes,
            file_name: card_file_name(input.id),
            caption: caption(input.publisher, input.title),
            mode,
            font_size: fitted.font_size,
        })
    }

    fn rasterize(&self, doc: &str) -> Result<Vec<u8>, CardError> {
        let tree = usvg::Tree::from_data(doc.as_bytes(), &self.options)
            .map_err(|err| CardError::Render(err.to_string()))?;
        let mut pixmap = Pixmap::new(self.image.width, self.image.height)
            .ok_or_else(|| CardError::Render("invalid canvas size".into()))?;
        resvg::render(&tree, Transform::default(), &mut pixmap.as_mut());
        pixmap
            .encode_png()
            .map_err(|err| CardError::Render(err.to_string()))
    }
}
