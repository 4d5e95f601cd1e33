//! Shrink-to-fit layout for the card headline.
//!
//! Widths are estimated, not measured. `glyph_width_ratio` is the tuned
//! average advance of one character in ems; wrapping budgets every
//! character at that average, and the per-glyph estimate below then
//! catches lines that are wider than the budget (emoji, wide symbols).

/// Vertical distance between consecutive baselines, in ems.
pub const LINE_HEIGHT_EM: f32 = 1.15;

#[derive(Debug, Clone, PartialEq)]
pub struct FitParams {
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub padding: u32,
    pub max_lines: usize,
    pub max_font_size: u32,
    pub min_font_size: u32,
    pub font_step: u32,
    pub glyph_width_ratio: f32,
}

impl FitParams {
    pub fn available_width(&self) -> f32 {
        self.canvas_width.saturating_sub(self.padding.saturating_mul(2)) as f32
    }

    /// Upper bound on loop iterations for these parameters.
    pub fn max_iterations(&self) -> u32 {
        let span = self.max_font_size.saturating_sub(self.min_font_size);
        span / self.font_step.max(1) + 2
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FittedText {
    pub font_size: u32,
    pub line_height: u32,
    pub lines: Vec<String>,
    /// Baseline of the first line; line `i` sits at `first_baseline + i * line_height`.
    pub first_baseline: i32,
    pub iterations: u32,
    /// True when the floor size was accepted without satisfying the limits.
    pub overflow: bool,
}

impl FittedText {
    pub fn baselines(&self) -> impl Iterator<Item = i32> + '_ {
        (0..self.lines.len()).map(move |i| self.first_baseline + (i as u32 * self.line_height) as i32)
    }
}

/// Relative advance of `ch` against a full-width glyph.
fn glyph_units(ch: char) -> f32 {
    match ch {
        ' ' => 0.3,
        'A'..='Z' | '0'..='9' => 0.62,
        c if c.is_ascii() => 0.55,
        '\u{FF61}'..='\u{FF9F}' => 0.5,
        '\u{1F000}'..='\u{1FAFF}' | '\u{2600}'..='\u{27BF}' => 1.25,
        _ => 1.0,
    }
}

pub fn estimate_width(line: &str, font_size: u32, glyph_width_ratio: f32) -> f32 {
    line.chars().map(glyph_units).sum::<f32>() * font_size as f32 * glyph_width_ratio
}

fn chars_per_line(params: &FitParams, font_size: u32) -> usize {
    let glyph = font_size as f32 * params.glyph_width_ratio;
    ((params.available_width() / glyph).floor() as usize).max(1)
}

/// Greedy wrap at `max_chars` characters per line. Latin words stay whole
/// unless a single word is longer than a line; other scripts break anywhere.
pub fn wrap(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for token in tokens(text) {
        let token_len = token.chars().count();
        if current_len + token_len > max_chars && current_len > 0 {
            lines.push(current.trim_end().to_string());
            current.clear();
            current_len = 0;
            if token == " " {
                continue;
            }
        }
        if token_len > max_chars {
            for ch in token.chars() {
                if current_len == max_chars {
                    lines.push(std::mem::take(&mut current));
                    current_len = 0;
                }
                current.push(ch);
                current_len += 1;
            }
            continue;
        }
        current.push_str(&token);
        current_len += token_len;
    }
    let tail = current.trim_end();
    if !tail.is_empty() {
        lines.push(tail.to_string());
    }
    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}

/// Split into ASCII words, single spaces and single non-ASCII characters.
fn tokens(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut word = String::new();
    for ch in text.split_whitespace().collect::<Vec<_>>().join(" ").chars() {
        if ch.is_ascii() && ch != ' ' {
            word.push(ch);
            continue;
        }
        if !word.is_empty() {
            out.push(std::mem::take(&mut word));
        }
        out.push(ch.to_string());
    }
    if !word.is_empty() {
        out.push(word);
    }
    out
}

/// Find the largest font size (stepping down from the maximum) at which the
/// text wraps into at most `max_lines` lines that all fit the available
/// width. The minimum size is accepted as-is when nothing larger fits.
pub fn fit_text(text: &str, params: &FitParams) -> FittedText {
    let available = params.available_width();
    let step = params.font_step.max(1);
    let floor = params.min_font_size.min(params.max_font_size).max(1);
    let mut size = params.max_font_size.max(floor);
    let mut iterations = 0u32;

    let (font_size, lines, fits) = loop {
        iterations += 1;
        let lines = wrap(text, chars_per_line(params, size));
        let fits = lines.len() <= params.max_lines
            && lines
                .iter()
                .all(|l| estimate_width(l, size, params.glyph_width_ratio) <= available);
        if fits || size <= floor {
            break (size, lines, fits);
        }
        size = size.saturating_sub(step).max(floor);
    };

    let line_height = (font_size as f32 * LINE_HEIGHT_EM).round() as u32;
    let block_height = font_size + line_height * (lines.len() as u32).saturating_sub(1);
    let top = (params.canvas_height as i32 - block_height as i32) / 2;

    FittedText {
        font_size,
        line_height,
        first_baseline: top + font_size as i32,
        lines,
        iterations,
        overflow: !fits,
    }
}
