//! The exposure selector — decides which tools the model sees on a turn.
//!
//! A tool earns exposure four ways, checked in order per descriptor:
//! having no keywords at all, a fresh keyword match against the input, a
//! caller-supplied force-all flag, or a decayed carry-over grant from an
//! earlier match. Carry-over exists because conversational follow-ups
//! ("and tomorrow?") rarely repeat the word that triggered the tool.

use regex_lite::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;
use voxloop_core::tool::{ToolCatalog, ToolDescriptor};

/// Per-tool carry-over counters: `name → remaining follow turns`.
///
/// Entries are always positive; a counter reaching zero is removed.
/// Mutated only by the selector and by post-execution grants.
#[derive(Debug, Default)]
pub struct ExposureState {
    remaining: HashMap<String, u32>,
}

impl ExposureState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant `turns` follow turns to a tool. A zero grant clears the entry.
    pub fn grant(&mut self, name: &str, turns: u32) {
        if turns == 0 {
            self.remaining.remove(name);
        } else {
            self.remaining.insert(name.to_string(), turns);
        }
    }

    /// Grant follow turns without shortening an existing window: the
    /// counter becomes the larger of its current value and `turns`. Used
    /// for post-execution grants, which must not clobber a keyword-match
    /// window still in flight.
    pub fn extend(&mut self, name: &str, turns: u32) {
        if turns > self.remaining(name) {
            self.remaining.insert(name.to_string(), turns);
        }
    }

    /// Remaining follow turns for a tool, zero if absent.
    pub fn remaining(&self, name: &str) -> u32 {
        self.remaining.get(name).copied().unwrap_or(0)
    }

    /// Consume one follow turn. Returns the count left after decrement,
    /// or `None` if the tool had no grant.
    fn consume(&mut self, name: &str) -> Option<u32> {
        let left = self.remaining.get_mut(name)?;
        *left -= 1;
        let left = *left;
        if left == 0 {
            self.remaining.remove(name);
        }
        Some(left)
    }
}

/// Why a tool was exposed on this turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExposeReason {
    /// The descriptor defines no keywords, so it is always offered.
    NoKeywords,
    /// One or more keywords matched the input.
    KeywordMatch(Vec<String>),
    /// The caller requested all tools regardless of keywords.
    Forced,
    /// Carry-over grant; the payload is the follow turns left after this one.
    FollowUp(u32),
}

impl std::fmt::Display for ExposeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoKeywords => write!(f, "no keywords defined"),
            Self::KeywordMatch(words) => write!(f, "keywords detected {words:?}"),
            Self::Forced => write!(f, "forced include"),
            Self::FollowUp(left) => write!(f, "{left} follow requests"),
        }
    }
}

/// One exposed tool and the reason it made the cut.
#[derive(Clone)]
pub struct Exposure {
    pub descriptor: Arc<ToolDescriptor>,
    pub reason: ExposeReason,
}

/// Selects the per-turn tool subset.
pub struct ExposureSelector {
    /// Follow turns granted on a fresh keyword match.
    decay: u32,
}

impl ExposureSelector {
    pub fn new(decay: u32) -> Self {
        Self { decay }
    }

    /// Produce the exposed tool set for one turn.
    ///
    /// Descriptors are visited in catalog order and that order is preserved
    /// in the result; overlapping keywords fire independently with no
    /// tie-break. Tools named in `excluded` are skipped entirely — this is
    /// how the previous turn's just-called tool is kept from being
    /// re-issued.
    pub fn select(
        &self,
        input: &str,
        catalog: &ToolCatalog,
        state: &mut ExposureState,
        force_all: bool,
        excluded: &HashSet<String>,
    ) -> Vec<Exposure> {
        let input_lower = input.to_lowercase();
        let mut exposures = Vec::new();

        for entry in catalog.all() {
            let descriptor = &entry.descriptor;
            if excluded.contains(&descriptor.name) {
                debug!(tool = %descriptor.name, "excluded from this turn");
                continue;
            }

            if descriptor.keywords.is_empty() {
                exposures.push(Exposure {
                    descriptor: Arc::clone(descriptor),
                    reason: ExposeReason::NoKeywords,
                });
                continue;
            }

            let matched = matching_keywords(&descriptor.keywords, &input_lower);
            if !matched.is_empty() {
                state.grant(&descriptor.name, self.decay);
                exposures.push(Exposure {
                    descriptor: Arc::clone(descriptor),
                    reason: ExposeReason::KeywordMatch(matched),
                });
                continue;
            }

            if force_all {
                exposures.push(Exposure {
                    descriptor: Arc::clone(descriptor),
                    reason: ExposeReason::Forced,
                });
                continue;
            }

            if let Some(left) = state.consume(&descriptor.name) {
                exposures.push(Exposure {
                    descriptor: Arc::clone(descriptor),
                    reason: ExposeReason::FollowUp(left),
                });
            }
        }

        exposures
    }
}

/// Keywords that match the (already lowercased) input as whole words.
/// `*` in a keyword acts as a wildcard.
fn matching_keywords(keywords: &[String], input_lower: &str) -> Vec<String> {
    keywords
        .iter()
        .filter(|keyword| keyword_matches(keyword, input_lower))
        .cloned()
        .collect()
}

fn keyword_matches(keyword: &str, input_lower: &str) -> bool {
    let pattern = format!(r"\b{}\b", keyword_pattern(&keyword.to_lowercase()));
    match Regex::new(&pattern) {
        Ok(re) => re.is_match(input_lower),
        Err(_) => {
            debug!(keyword, "keyword produced an invalid pattern, skipping");
            false
        }
    }
}

/// Turn a keyword into a regex fragment: metacharacters escaped, `*`
/// becomes `.*`.
fn keyword_pattern(keyword: &str) -> String {
    let mut pattern = String::with_capacity(keyword.len() * 2);
    for ch in keyword.chars() {
        match ch {
            '*' => pattern.push_str(".*"),
            '.' | '+' | '?' | '(' | ')' | '[' | ']' | '{' | '}' | '^' | '$' | '|' | '\\' => {
                pattern.push('\\');
                pattern.push(ch);
            }
            _ => pattern.push(ch),
        }
    }
    pattern
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxloop_core::error::ToolError;
    use voxloop_core::tool::SkillHandler;

    struct NoopSkill;

    #[async_trait::async_trait]
    impl SkillHandler for NoopSkill {
        async fn invoke(
            &self,
            _arguments: serde_json::Value,
        ) -> Result<Option<String>, ToolError> {
            Ok(None)
        }
    }

    fn catalog(descriptors: Vec<ToolDescriptor>) -> ToolCatalog {
        let mut catalog = ToolCatalog::new();
        for desc in descriptors {
            catalog.register(desc, Arc::new(NoopSkill)).unwrap();
        }
        catalog
    }

    fn weather_tool() -> ToolDescriptor {
        ToolDescriptor::builder("weather_lookup")
            .keywords(["weather", "temperature"])
            .build()
    }

    fn notes_tool() -> ToolDescriptor {
        // No keywords: always exposed.
        ToolDescriptor::builder("notes").build()
    }

    fn names(exposures: &[Exposure]) -> Vec<&str> {
        exposures.iter().map(|e| e.descriptor.name.as_str()).collect()
    }

    #[test]
    fn no_keywords_always_exposed() {
        let catalog = catalog(vec![notes_tool()]);
        let mut state = ExposureState::new();
        let selector = ExposureSelector::new(4);

        let exposures = selector.select(
            "completely unrelated input",
            &catalog,
            &mut state,
            false,
            &HashSet::new(),
        );
        assert_eq!(names(&exposures), ["notes"]);
        assert_eq!(exposures[0].reason, ExposeReason::NoKeywords);
    }

    #[test]
    fn keyword_match_exposes_and_sets_decay() {
        let catalog = catalog(vec![weather_tool()]);
        let mut state = ExposureState::new();
        let selector = ExposureSelector::new(4);

        let exposures = selector.select(
            "what's the Weather like?",
            &catalog,
            &mut state,
            false,
            &HashSet::new(),
        );
        assert_eq!(names(&exposures), ["weather_lookup"]);
        assert!(matches!(
            &exposures[0].reason,
            ExposeReason::KeywordMatch(words) if words == &["weather"]
        ));
        assert_eq!(state.remaining("weather_lookup"), 4);
    }

    #[test]
    fn keyword_requires_whole_word() {
        let catalog = catalog(vec![weather_tool()]);
        let mut state = ExposureState::new();
        let selector = ExposureSelector::new(4);

        let exposures = selector.select(
            "the weathercock on the roof",
            &catalog,
            &mut state,
            false,
            &HashSet::new(),
        );
        assert!(exposures.is_empty());
    }

    #[test]
    fn wildcard_keyword_matches() {
        let catalog = catalog(vec![
            ToolDescriptor::builder("lights")
                .keywords(["light*"])
                .build(),
        ]);
        let mut state = ExposureState::new();
        let selector = ExposureSelector::new(4);

        let exposures = selector.select(
            "turn on the lights please",
            &catalog,
            &mut state,
            false,
            &HashSet::new(),
        );
        assert_eq!(names(&exposures), ["lights"]);
    }

    #[test]
    fn decay_decrements_and_expires() {
        let catalog = catalog(vec![weather_tool()]);
        let mut state = ExposureState::new();
        let selector = ExposureSelector::new(4);

        selector.select("weather?", &catalog, &mut state, false, &HashSet::new());
        assert_eq!(state.remaining("weather_lookup"), 4);

        // Four unrelated turns: exposed with 3, 2, 1, 0 follow turns left.
        for expected_left in [3, 2, 1, 0] {
            let exposures = selector.select(
                "tell me a story",
                &catalog,
                &mut state,
                false,
                &HashSet::new(),
            );
            assert_eq!(names(&exposures), ["weather_lookup"]);
            assert_eq!(exposures[0].reason, ExposeReason::FollowUp(expected_left));
        }
        assert_eq!(state.remaining("weather_lookup"), 0);

        // Fifth unrelated turn: gone.
        let exposures = selector.select(
            "tell me a story",
            &catalog,
            &mut state,
            false,
            &HashSet::new(),
        );
        assert!(exposures.is_empty());
    }

    #[test]
    fn fresh_match_resets_decay() {
        let catalog = catalog(vec![weather_tool()]);
        let mut state = ExposureState::new();
        let selector = ExposureSelector::new(4);

        selector.select("weather?", &catalog, &mut state, false, &HashSet::new());
        selector.select("unrelated", &catalog, &mut state, false, &HashSet::new());
        assert_eq!(state.remaining("weather_lookup"), 3);

        selector.select("temperature outside?", &catalog, &mut state, false, &HashSet::new());
        assert_eq!(state.remaining("weather_lookup"), 4);
    }

    #[test]
    fn extend_never_shortens_a_window() {
        let mut state = ExposureState::new();
        state.grant("weather_lookup", 3);

        state.extend("weather_lookup", 1);
        assert_eq!(state.remaining("weather_lookup"), 3);

        state.extend("weather_lookup", 5);
        assert_eq!(state.remaining("weather_lookup"), 5);

        // A tool without a grant gets one.
        state.extend("notes", 2);
        assert_eq!(state.remaining("notes"), 2);

        // Zero is a no-op, not a clear.
        state.extend("notes", 0);
        assert_eq!(state.remaining("notes"), 2);
    }

    #[test]
    fn force_all_overrides_keywords() {
        let catalog = catalog(vec![weather_tool(), notes_tool()]);
        let mut state = ExposureState::new();
        let selector = ExposureSelector::new(4);

        let exposures = selector.select(
            "nothing relevant here",
            &catalog,
            &mut state,
            true,
            &HashSet::new(),
        );
        assert_eq!(names(&exposures), ["weather_lookup", "notes"]);
        assert_eq!(exposures[0].reason, ExposeReason::Forced);
        // Forced exposure grants no carry-over.
        assert_eq!(state.remaining("weather_lookup"), 0);
    }

    #[test]
    fn excluded_tool_is_skipped_even_with_match() {
        let catalog = catalog(vec![weather_tool(), notes_tool()]);
        let mut state = ExposureState::new();
        let selector = ExposureSelector::new(4);

        let mut excluded = HashSet::new();
        excluded.insert("weather_lookup".to_string());

        let exposures = selector.select(
            "what's the weather",
            &catalog,
            &mut state,
            false,
            &excluded,
        );
        assert_eq!(names(&exposures), ["notes"]);
    }

    #[test]
    fn overlapping_keywords_fire_independently_in_catalog_order() {
        let catalog = catalog(vec![
            ToolDescriptor::builder("forecast")
                .keywords(["weather"])
                .build(),
            ToolDescriptor::builder("climate_report")
                .keywords(["weather", "climate"])
                .build(),
        ]);
        let mut state = ExposureState::new();
        let selector = ExposureSelector::new(4);

        let exposures = selector.select(
            "how is the weather",
            &catalog,
            &mut state,
            false,
            &HashSet::new(),
        );
        assert_eq!(names(&exposures), ["forecast", "climate_report"]);
    }
}
