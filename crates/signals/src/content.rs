//! Nudge copy selection behind a narrow collaborator trait.

use std::collections::BTreeMap;

use nudge_core::config::ContentConfig;
use nudge_core::{Category, Tone};
use sha2::{Digest, Sha256};

/// Copy used when no template covers a category/tone pair.
pub const DEFAULT_TEXT: &str = "Do a tiny reset.";

/// One piece of renderable copy. The id is stable across runs so
/// embeddings can be cached against it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentItem {
    pub id: String,
    pub text: String,
}

impl ContentItem {
    pub fn new(category: Category, text: impl Into<String>) -> Self {
        let text = text.into();
        let digest = Sha256::digest(format!("{text}|{category}").as_bytes());
        Self {
            id: hex::encode(&digest[..6]),
            text,
        }
    }
}

/// Where nudge copy comes from. Internals (indexing, personalization)
/// live outside the engine; this is the full surface it consumes.
pub trait ContentSource: Send + Sync {
    fn content(&self, category: Category, tone: Tone, context: &str) -> Option<ContentItem>;
}

/// Template-backed source. Falls back to any tone for the category
/// before giving up, and varies the pick deterministically with the
/// decision context.
pub struct StaticContent {
    templates: BTreeMap<Category, BTreeMap<Tone, Vec<String>>>,
}

impl StaticContent {
    pub fn new(cfg: &ContentConfig) -> Self {
        if cfg.templates.is_empty() {
            return Self::builtin();
        }
        Self {
            templates: cfg.templates.clone(),
        }
    }

    /// The stock reminder set.
    pub fn builtin() -> Self {
        let mut templates: BTreeMap<Category, BTreeMap<Tone, Vec<String>>> = BTreeMap::new();
        let mut add = |category: Category, tone: Tone, lines: &[&str]| {
            templates
                .entry(category)
                .or_default()
                .insert(tone, lines.iter().map(|s| s.to_string()).collect());
        };

        add(
            Category::Hydration,
            Tone::Gentle,
            &["Time for a few sips of water.", "A glass of water would do you good."],
        );
        add(
            Category::Hydration,
            Tone::Humor,
            &["Your plants get watered. Do you?"],
        );
        add(Category::Hydration, Tone::Strict, &["Drink water. Now."]);
        add(
            Category::Posture,
            Tone::Gentle,
            &["Unclench your shoulders and sit tall."],
        );
        add(
            Category::Posture,
            Tone::Humor,
            &["Your spine called. It wants its curve back."],
        );
        add(Category::Posture, Tone::Strict, &["Fix your posture."]);
        add(
            Category::Movement,
            Tone::Gentle,
            &["A two-minute stretch would feel great.", "Quick walk around the room?"],
        );
        add(
            Category::Movement,
            Tone::Humor,
            &["Those legs are for walking, not just folding."],
        );
        add(Category::Movement, Tone::Strict, &["Stand up and move."]);
        add(
            Category::Focus,
            Tone::Gentle,
            &["Close the extra tabs and pick one thing."],
        );
        add(
            Category::Focus,
            Tone::Humor,
            &["That notification can absolutely wait."],
        );
        add(Category::Focus, Tone::Strict, &["One task. Finish it."]);
        add(
            Category::Sleep,
            Tone::Gentle,
            &["Start winding down soon.", "Screens off in a bit?"],
        );
        add(
            Category::Sleep,
            Tone::Humor,
            &["Midnight you will thank 10pm you."],
        );
        add(Category::Sleep, Tone::Strict, &["Go to bed."]);

        Self { templates }
    }

    fn lines_for(&self, category: Category, tone: Tone) -> Option<&Vec<String>> {
        let by_tone = self.templates.get(&category)?;
        by_tone
            .get(&tone)
            .filter(|lines| !lines.is_empty())
            .or_else(|| by_tone.values().find(|lines| !lines.is_empty()))
    }
}

impl ContentSource for StaticContent {
    fn content(&self, category: Category, tone: Tone, context: &str) -> Option<ContentItem> {
        let lines = self.lines_for(category, tone)?;
        let digest = Sha256::digest(context.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        let pick = (u64::from_be_bytes(bytes) % lines.len() as u64) as usize;
        Some(ContentItem::new(category, lines[pick].clone()))
    }
}
