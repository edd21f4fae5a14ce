//! Screen descriptions and the "did the screen change" verdict.
//!
//! A description is a list of fragments read off the screen, either from the
//! accessibility tree (captions) or from OCR (text and icon labels with
//! boxes). The detector compares two descriptions and two screenshots and
//! reports a change only when the text and the image both moved.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::LazyLock;

use image::imageops::FilterType;
use image::DynamicImage;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::history::Bounds;

/// Element-type suffixes the accessibility layer appends to captions.
pub const ELEMENT_TYPES: &[&str] = &[
    "Button",
    "Tab",
    "Header",
    "Image",
    "Link",
    "ap_ra_pc_password_missing_alert",
    "Adjustable",
    "Selected",
    "Toggle",
    "Text field",
    // German voice-over locale
    "Taste",
    "Einstellungen",
    "Bild",
    "Einstellbar",
];

/// Caption shown when VoiceOver has no element under focus.
pub const DIRECT_INTERACTION: &str = "Direct Interaction";

/// Strip one trailing `", <type>"` suffix from a caption.
pub fn strip_element_type(caption: &str) -> &str {
    let trimmed = caption.trim();
    if let Some((head, tail)) = trimmed.rsplit_once(',') {
        let tail = tail.trim();
        if ELEMENT_TYPES.iter().any(|t| t.eq_ignore_ascii_case(tail)) {
            return head.trim_end();
        }
    }
    trimmed
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FragmentKind {
    #[serde(alias = "Text")]
    Text,
    #[serde(alias = "Icon")]
    Icon,
}

/// One piece of on-screen content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenFragment {
    pub text: String,
    #[serde(default = "default_kind")]
    pub kind: FragmentKind,
    /// `[x1, y1, x2, y2]` in screenshot pixels, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<[u32; 4]>,
}

fn default_kind() -> FragmentKind {
    FragmentKind::Text
}

impl ScreenFragment {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: FragmentKind::Text,
            bbox: None,
        }
    }

    pub fn icon(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: FragmentKind::Icon,
            bbox: None,
        }
    }

    pub fn with_bbox(mut self, bbox: [u32; 4]) -> Self {
        self.bbox = Some(bbox);
        self
    }

    pub fn bounds(&self) -> Option<Bounds> {
        self.bbox.map(Bounds::from_corners)
    }
}

/// Ordered fragments describing one screen.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScreenDescription {
    pub fragments: Vec<ScreenFragment>,
}

impl ScreenDescription {
    pub fn new(fragments: Vec<ScreenFragment>) -> Self {
        Self { fragments }
    }

    /// Accessibility captions become text fragments without boxes.
    pub fn from_captions<I, S>(captions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(captions.into_iter().map(ScreenFragment::text).collect())
    }

    /// Parse an OCR result (a JSON array of fragments).
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Fragments of kind text.
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.fragments
            .iter()
            .filter(|f| f.kind == FragmentKind::Text)
            .map(|f| f.text.as_str())
    }

    /// Every fragment's text in screen order.
    pub fn captions(&self) -> impl Iterator<Item = &str> {
        self.fragments.iter().map(|f| f.text.as_str())
    }

    /// True when the only thing on screen is the "Direct Interaction" caption,
    /// which carries no usable information.
    pub fn is_direct_interaction(&self) -> bool {
        !self.fragments.is_empty()
            && self
                .fragments
                .iter()
                .all(|f| f.text.trim() == DIRECT_INTERACTION)
    }

    /// Box of the fragment best matching `label`.
    pub fn locate(&self, label: &str) -> Option<Bounds> {
        let wanted = strip_element_type(label).to_lowercase();
        let boxed = || self.fragments.iter().filter(|f| f.bbox.is_some());
        boxed()
            .find(|f| f.text.trim().to_lowercase() == wanted)
            .or_else(|| boxed().find(|f| similar_label(&wanted, &f.text, 2)))
            .or_else(|| {
                boxed().find(|f| !wanted.is_empty() && f.text.to_lowercase().contains(&wanted))
            })
            .and_then(ScreenFragment::bounds)
    }
}

static PUNCTUATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s]").expect("punctuation pattern is valid"));

/// Lowercased word tokens with punctuation removed. Single-character and
/// purely numeric tokens are dropped.
pub fn normalize_tokens<'a, I>(texts: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut tokens = BTreeSet::new();
    for text in texts {
        let lowered = text.to_lowercase();
        let cleaned = PUNCTUATION.replace_all(&lowered, "");
        for token in cleaned.split_whitespace() {
            if token.chars().count() <= 1 || token.chars().all(|c| c.is_numeric()) {
                continue;
            }
            tokens.insert(token.to_string());
        }
    }
    tokens
}

/// Jaccard similarity where a token of `a` counts as shared if some token
/// of `b` is within `max_distance` edits of it.
///
/// Two empty sets are identical (1.0).
pub fn fuzzy_jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>, max_distance: usize) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 1.0;
    }
    let matched = a
        .iter()
        .filter(|wa| b.iter().any(|wb| strsim::levenshtein(wa, wb) <= max_distance))
        .count();
    matched as f64 / union as f64
}

/// Loose label equality: short labels must match exactly, longer ones may
/// differ by fewer than `max_distance` edits. Voice-command prefixes and
/// brackets on `candidate` are ignored.
pub fn similar_label(wanted: &str, candidate: &str, max_distance: usize) -> bool {
    let wanted = wanted.trim().to_lowercase();
    let candidate = candidate
        .to_lowercase()
        .replace("tap, ", "")
        .replace("type, ", "")
        .replace(['[', ']'], "");
    let candidate = candidate.trim();
    if wanted.chars().count() <= 3 || candidate.chars().count() <= 3 {
        return wanted == candidate;
    }
    strsim::levenshtein(&wanted, candidate) < max_distance
}

/// Average perceptual hash: one bit per cell of a `size`×`size` grayscale
/// thumbnail, set when the cell is brighter than the mean.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageHash {
    bits: Vec<bool>,
}

impl ImageHash {
    pub fn average(image: &DynamicImage, size: u32) -> Self {
        let size = size.max(1);
        let thumb = image
            .grayscale()
            .resize_exact(size, size, FilterType::Lanczos3)
            .to_luma8();
        let pixels: Vec<u8> = thumb.into_raw();
        let mean = pixels.iter().map(|&p| f64::from(p)).sum::<f64>() / pixels.len() as f64;
        Self {
            bits: pixels.iter().map(|&p| f64::from(p) > mean).collect(),
        }
    }

    pub fn from_path(path: &Path, size: u32) -> image::ImageResult<Self> {
        Ok(Self::average(&image::open(path)?, size))
    }

    /// Number of differing bits.
    pub fn distance(&self, other: &Self) -> usize {
        self.bits
            .iter()
            .zip(&other.bits)
            .filter(|(a, b)| a != b)
            .count()
            + self.bits.len().abs_diff(other.bits.len())
    }
}

#[derive(Debug, Clone)]
pub struct ScreenConfig {
    /// Text similarity below this counts as changed.
    pub similarity_threshold: f64,
    /// Max edits for two tokens to count as the same word.
    pub max_edit_distance: usize,
    pub hash_size: u32,
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
            max_edit_distance: 2,
            hash_size: 32,
        }
    }
}

/// Both signals behind a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScreenComparison {
    /// `None` when both descriptions had no text tokens.
    pub similarity: Option<f64>,
    pub text_changed: bool,
    pub image_changed: bool,
}

impl ScreenComparison {
    pub fn changed(&self) -> bool {
        self.text_changed && self.image_changed
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScreenChangeDetector {
    config: ScreenConfig,
}

impl ScreenChangeDetector {
    pub fn new(config: ScreenConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScreenConfig {
        &self.config
    }

    /// Text signal alone: similarity of the two token sets, if any.
    pub fn text_similarity(&self, before: &ScreenDescription, after: &ScreenDescription) -> Option<f64> {
        let a = normalize_tokens(before.texts());
        let b = normalize_tokens(after.texts());
        if a.is_empty() && b.is_empty() {
            return None;
        }
        Some(fuzzy_jaccard(&a, &b, self.config.max_edit_distance))
    }

    /// Image signal alone. Any load or decode failure counts as unchanged.
    pub fn images_differ(&self, before: &Path, after: &Path) -> bool {
        let hash = |p: &Path| ImageHash::from_path(p, self.config.hash_size);
        match (hash(before), hash(after)) {
            (Ok(a), Ok(b)) => a != b,
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "image hash failed; treating screen as unchanged");
                false
            }
        }
    }

    pub fn compare(
        &self,
        before: &ScreenDescription,
        before_image: &Path,
        after: &ScreenDescription,
        after_image: &Path,
    ) -> ScreenComparison {
        let similarity = self.text_similarity(before, after);
        let text_changed = similarity.is_some_and(|s| s < self.config.similarity_threshold);
        let image_changed = self.images_differ(before_image, after_image);
        debug!(?similarity, text_changed, image_changed, "screen compared");
        ScreenComparison {
            similarity,
            text_changed,
            image_changed,
        }
    }

    pub fn has_changed(
        &self,
        before: &ScreenDescription,
        before_image: &Path,
        after: &ScreenDescription,
        after_image: &Path,
    ) -> bool {
        self.compare(before, before_image, after, after_image).changed()
    }
}
