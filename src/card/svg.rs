use std::fmt::Write as _;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use super::fit::{fit_text, wrap, FitParams, FittedText};
use crate::config::Overlay;
use crate::text::{clip_by_length, escape_xml, normalize_whitespace};

const FOOTER_HEIGHT: u32 = 80;
const LABEL_FONT_SIZE: u32 = 30;
const TITLE_FONT_SIZE: u32 = 30;

/// Geometry and styling shared by both card modes.
#[derive(Debug, Clone)]
pub struct Canvas<'a> {
    pub width: u32,
    pub height: u32,
    pub footer: &'a str,
    pub overlay: &'a Overlay,
}

impl Canvas<'_> {
    pub fn fit_params(&self) -> FitParams {
        FitParams {
            canvas_width: self.width,
            canvas_height: self.height,
            padding: self.overlay.padding,
            max_lines: self.overlay.max_lines,
            max_font_size: self.overlay.max_font_size,
            min_font_size: self.overlay.min_font_size,
            font_step: self.overlay.font_step,
            glyph_width_ratio: self.overlay.glyph_width_ratio,
        }
    }

    fn open(&self, out: &mut String) {
        let _ = write!(
            out,
            r#"<svg width="{w}" height="{h}" viewBox="0 0 {w} {h}" xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink">"#,
            w = self.width,
            h = self.height
        );
        out.push_str("<defs>");
        out.push_str(
            r##"<linearGradient id="bg" x1="0%" y1="0%" x2="0%" y2="100%"><stop offset="0%" stop-color="#0f172a"/><stop offset="100%" stop-color="#020617"/></linearGradient>"##,
        );
        if self.overlay.drop_shadow {
            out.push_str(
                r##"<filter id="shadow" x="-10%" y="-10%" width="120%" height="130%"><feDropShadow dx="0" dy="4" stdDeviation="6" flood-color="#000000" flood-opacity="0.65"/></filter>"##,
            );
        }
        out.push_str("</defs>");
    }

    fn headline(&self, out: &mut String, fitted: &FittedText) {
        let ov = self.overlay;
        let family = escape_xml(&ov.font_family);
        let stroke = if ov.stroke {
            format!(
                r##" stroke="#000000" stroke-width="{:.1}" stroke-linejoin="round" paint-order="stroke""##,
                (fitted.font_size as f32 * 0.08).max(2.0)
            )
        } else {
            String::new()
        };
        let filter = if ov.drop_shadow {
            r#" filter="url(#shadow)""#
        } else {
            ""
        };
        for (line, y) in fitted.lines.iter().zip(fitted.baselines()) {
            let _ = write!(
                out,
                r##"<text x="{x}" y="{y}" text-anchor="middle" font-family="{family}, sans-serif" font-size="{size}" font-weight="{weight}" fill="#ffffff"{stroke}{filter}>{text}</text>"##,
                x = self.width / 2,
                size = fitted.font_size,
                weight = ov.font_weight,
                text = escape_xml(line),
            );
        }
    }
}

/// Headline composited over a prepared background photo (PNG bytes already
/// at canvas size), with a uniform darkening scrim.
pub fn overlay(canvas: &Canvas<'_>, comment: &str, background_png: &[u8]) -> (String, FittedText) {
    let fitted = fit_text(comment, &canvas.fit_params());
    let mut out = String::new();
    canvas.open(&mut out);
    let _ = write!(
        out,
        r#"<image x="0" y="0" width="{w}" height="{h}" preserveAspectRatio="xMidYMid slice" xlink:href="data:image/png;base64,{data}"/>"#,
        w = canvas.width,
        h = canvas.height,
        data = STANDARD.encode(background_png),
    );
    let _ = write!(
        out,
        r##"<rect x="0" y="0" width="{w}" height="{h}" fill="#000000" fill-opacity="{a:.2}"/>"##,
        w = canvas.width,
        h = canvas.height,
        a = canvas.overlay.darken,
    );
    canvas.headline(&mut out, &fitted);
    out.push_str("</svg>");
    (out, fitted)
}

/// Headline on a generated gradient, with publisher label, article title
/// and footer bar.
pub fn synthetic(
    canvas: &Canvas<'_>,
    comment: &str,
    title: &str,
    publisher: &str,
) -> (String, FittedText) {
    let fitted = fit_text(comment, &canvas.fit_params());
    let pad = canvas.overlay.padding;
    let family = escape_xml(&canvas.overlay.font_family);
    let mut out = String::new();
    canvas.open(&mut out);
    let _ = write!(
        out,
        r#"<rect x="0" y="0" width="{w}" height="{h}" fill="url(#bg)"/>"#,
        w = canvas.width,
        h = canvas.height,
    );
    let _ = write!(
        out,
        r##"<text x="{pad}" y="{y}" font-family="{family}, sans-serif" font-size="{LABEL_FONT_SIZE}" font-weight="700" fill="#60a5fa">{label}</text>"##,
        y = pad + LABEL_FONT_SIZE,
        label = escape_xml(&normalize_whitespace(publisher)),
    );

    canvas.headline(&mut out, &fitted);

    // One line of title just above the footer.
    let title_chars = ((canvas.width - 2 * pad) / TITLE_FONT_SIZE) as usize;
    let title_line = wrap(&clip_by_length(&normalize_whitespace(title), 120), title_chars.max(1))
        .into_iter()
        .next()
        .unwrap_or_default();
    let _ = write!(
        out,
        r##"<text x="{pad}" y="{y}" font-family="{family}, sans-serif" font-size="{TITLE_FONT_SIZE}" fill="#e2e8f0">{text}</text>"##,
        y = canvas.height - FOOTER_HEIGHT - 24,
        text = escape_xml(&title_line),
    );

    let _ = write!(
        out,
        r##"<rect x="0" y="{y}" width="{w}" height="{FOOTER_HEIGHT}" fill="#000000" fill-opacity="0.55"/>"##,
        y = canvas.height - FOOTER_HEIGHT,
        w = canvas.width,
    );
    let _ = write!(
        out,
        r##"<text x="{pad}" y="{y}" font-family="{family}, sans-serif" font-size="28" fill="#f8fafc">{footer}</text>"##,
        y = canvas.height - FOOTER_HEIGHT / 2 + 10,
        footer = escape_xml(canvas.footer),
    );
    out.push_str("</svg>");
    (out, fitted)
}
