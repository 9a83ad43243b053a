//! Semantic segmentation of oversized blocks.
//!
//! A block over the paragraph ceiling is split by verse markers when it has them, by
//! oracle-suggested breaks otherwise, and by a hard character split when neither works.
//! Every split is checked for integrity before it is accepted, and pieces that are still
//! too long are split again until they fit or `max_depth` is reached.

use std::sync::Arc;

use crate::config::SegmentationConfig;
use crate::oracle::SegmentationOracle;

pub mod anchors;
pub mod hard_split;
pub mod integrity;
pub mod language;

pub use hard_split::hard_split;
pub use integrity::check_integrity;
pub use language::{detect_language, LanguageHint};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitMethod {
    /// The block already fit.
    None,
    VerseMarkers,
    Oracle,
    HardSplit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub text: String,
    /// How the piece was produced (the last split applied to it).
    pub method: SplitMethod,
}

#[derive(Debug, Clone, Default)]
pub struct SegmentOutcome {
    pub segments: Vec<Segment>,
    pub oracle_used: bool,
}

impl SegmentOutcome {
    pub fn texts(&self) -> Vec<String> {
        self.segments.iter().map(|s| s.text.clone()).collect()
    }
}

pub struct Segmenter {
    config: SegmentationConfig,
    oracle: Option<Arc<dyn SegmentationOracle>>,
}

/// Pending work item: a piece of text, how it was made, and how deep it sits.
struct Pending {
    text: String,
    method: SplitMethod,
    depth: usize,
}

impl Segmenter {
    pub fn new(config: SegmentationConfig, oracle: Option<Arc<dyn SegmentationOracle>>) -> Self {
        Self { config, oracle }
    }

    pub fn config(&self) -> &SegmentationConfig {
        &self.config
    }

    fn fits(&self, text: &str) -> bool {
        text.chars().count() <= self.config.max_paragraph_chars
    }

    /// Segment one block. Always completes: oracle failures degrade to hard splitting.
    ///
    /// `language` is the document language when known; otherwise it is detected per block.
    pub async fn segment(&self, text: &str, language: Option<&str>) -> SegmentOutcome {
        let mut outcome = SegmentOutcome::default();
        let text = text.trim();
        if text.is_empty() {
            return outcome;
        }

        // depth-first, children pushed in reverse so output keeps text order
        let mut stack = vec![Pending {
            text: text.to_string(),
            method: SplitMethod::None,
            depth: 0,
        }];

        while let Some(item) = stack.pop() {
            if self.fits(&item.text) {
                outcome.segments.push(Segment { text: item.text, method: item.method });
                continue;
            }

            let hint = match language {
                Some(code) => LanguageHint::from_code(code),
                None => detect_language(&item.text),
            };

            if item.depth >= self.config.max_depth {
                log::warn!(
                    "Segmentation depth {} reached, hard splitting {} chars",
                    item.depth,
                    item.text.chars().count()
                );
                self.push_hard_split(&mut outcome, &item.text);
                continue;
            }

            let (pieces, method) = match self.split_once(&item.text, &hint, &mut outcome).await {
                Some(split) => split,
                None => {
                    self.push_hard_split(&mut outcome, &item.text);
                    continue;
                }
            };

            for piece in pieces.into_iter().rev() {
                stack.push(Pending {
                    text: piece,
                    method,
                    depth: item.depth + 1,
                });
            }
        }

        outcome
    }

    fn push_hard_split(&self, outcome: &mut SegmentOutcome, text: &str) {
        for piece in hard_split(text, self.config.max_paragraph_chars) {
            outcome.segments.push(Segment { text: piece, method: SplitMethod::HardSplit });
        }
    }

    /// One level of splitting by verse markers or oracle. `None` when neither produced an
    /// accepted split of at least two pieces.
    async fn split_once(
        &self,
        text: &str,
        hint: &LanguageHint,
        outcome: &mut SegmentOutcome,
    ) -> Option<(Vec<String>, SplitMethod)> {
        if language::count_verse_markers(text) >= 3 {
            let pieces = self.split_by_verse_markers(text);
            if pieces.len() > 1 && self.verified(text, &pieces) {
                return Some((pieces, SplitMethod::VerseMarkers));
            }
        }

        let oracle = self.oracle.as_ref()?;
        let target = text
            .chars()
            .count()
            .div_ceil(self.config.target_chunk_chars.max(1))
            .max(2);

        let reply = tokio::time::timeout(
            self.config.oracle_timeout(),
            oracle.suggest_breaks(text, hint.code.as_deref(), target),
        )
        .await;
        outcome.oracle_used = true;

        let plan = match reply {
            Ok(Ok(plan)) => plan,
            Ok(Err(e)) => {
                log::warn!("Segmentation oracle failed, falling back to hard split: {}", e);
                return None;
            }
            Err(_) => {
                log::warn!(
                    "Segmentation oracle timed out after {:?}, falling back to hard split",
                    self.config.oracle_timeout()
                );
                return None;
            }
        };

        let offsets = anchors::resolve_breaks(
            text,
            &plan.breaks,
            self.config.snap_window_chars,
            hint.is_arabic(),
        );
        if offsets.is_empty() {
            log::warn!("No oracle break could be resolved in a {}-char block", text.chars().count());
            return None;
        }

        let pieces = anchors::cut_at(text, &offsets);
        if pieces.len() < 2 || !self.verified(text, &pieces) {
            return None;
        }
        log::debug!("Oracle split {} chars into {} pieces", text.chars().count(), pieces.len());
        Some((pieces, SplitMethod::Oracle))
    }

    fn verified(&self, text: &str, pieces: &[String]) -> bool {
        match check_integrity(text, pieces, self.config.integrity_tolerance) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Rejecting split: {}", e);
                false
            }
        }
    }

    /// Cut after each verse marker, then pack consecutive verses up to the target size.
    fn split_by_verse_markers(&self, text: &str) -> Vec<String> {
        let verses = anchors::cut_at(text, &language::verse_marker_ends(text));
        let target = self.config.target_chunk_chars.max(1);

        let mut pieces: Vec<String> = Vec::new();
        let mut current = String::new();
        let mut current_chars = 0;
        for verse in verses {
            let verse_chars = verse.chars().count();
            if !current.is_empty() && current_chars + 1 + verse_chars > target {
                pieces.push(std::mem::take(&mut current));
                current_chars = 0;
            }
            if !current.is_empty() {
                current.push(' ');
                current_chars += 1;
            }
            current.push_str(&verse);
            current_chars += verse_chars;
        }
        if !current.is_empty() {
            pieces.push(current);
        }
        pieces
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Result, SifterError};
    use crate::oracle::{BreakPlan, BreakSuggestion};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config(max: usize, target: usize) -> SegmentationConfig {
        SegmentationConfig {
            max_paragraph_chars: max,
            target_chunk_chars: target,
            ..SegmentationConfig::default()
        }
    }

    fn squash(s: &str) -> String {
        s.chars().filter(|c| !c.is_whitespace()).collect()
    }

    /// Breaks before every sentence that starts with a capital letter
    struct SentenceOracle {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SegmentationOracle for SentenceOracle {
        async fn suggest_breaks(&self, text: &str, _language: Option<&str>, _target: usize) -> Result<BreakPlan> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let sentences: Vec<&str> = text.split_inclusive(". ").collect();
            let breaks = sentences
                .windows(2)
                .map(|w| BreakSuggestion {
                    end_phrase: w[0].trim().to_string(),
                    start_phrase: w[1].split_whitespace().take(3).collect::<Vec<_>>().join(" "),
                })
                .collect();
            Ok(BreakPlan { breaks, confidence: 0.9, reasoning: String::new() })
        }
    }

    struct FailingOracle;

    #[async_trait]
    impl SegmentationOracle for FailingOracle {
        async fn suggest_breaks(&self, _: &str, _: Option<&str>, _: usize) -> Result<BreakPlan> {
            Err(SifterError::Oracle("service unavailable".to_string()))
        }
    }

    /// Anchors that do not occur in the text
    struct HallucinatingOracle;

    #[async_trait]
    impl SegmentationOracle for HallucinatingOracle {
        async fn suggest_breaks(&self, _: &str, _: Option<&str>, _: usize) -> Result<BreakPlan> {
            Ok(BreakPlan {
                breaks: vec![BreakSuggestion {
                    end_phrase: "words never written".to_string(),
                    start_phrase: "nor these".to_string(),
                }],
                ..BreakPlan::default()
            })
        }
    }

    fn long_text() -> String {
        [
            "Blessed is the spot and the house and the place.",
            "Blessed is the city and the heart and the mountain.",
            "Blessed is the refuge and the cave and the valley.",
            "Blessed is the land and the sea and the island.",
        ]
        .join(" ")
    }

    #[tokio::test]
    async fn test_short_block_unchanged() {
        let segmenter = Segmenter::new(config(100, 50), None);
        let outcome = segmenter.segment("  A short paragraph.  ", None).await;
        assert_eq!(outcome.texts(), vec!["A short paragraph.".to_string()]);
        assert_eq!(outcome.segments[0].method, SplitMethod::None);
        assert!(!outcome.oracle_used);
    }

    #[tokio::test]
    async fn test_oracle_split_preserves_content() {
        let oracle = Arc::new(SentenceOracle { calls: AtomicUsize::new(0) });
        let segmenter = Segmenter::new(config(120, 60), Some(oracle.clone()));
        let text = long_text();
        let outcome = segmenter.segment(&text, Some("en")).await;

        assert!(outcome.oracle_used);
        assert_eq!(outcome.segments.len(), 4);
        assert!(outcome.segments.iter().all(|s| s.method == SplitMethod::Oracle));
        assert!(outcome.segments.iter().all(|s| s.text.chars().count() <= 120));
        assert_eq!(squash(&outcome.texts().concat()), squash(&text));
        assert!(outcome.segments[1].text.starts_with("Blessed is the city"));
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_oracle_failure_falls_back_to_hard_split() {
        let segmenter = Segmenter::new(config(60, 30), Some(Arc::new(FailingOracle)));
        let text = long_text();
        let outcome = segmenter.segment(&text, None).await;
        assert!(outcome.oracle_used);
        assert!(outcome.segments.iter().all(|s| s.method == SplitMethod::HardSplit));
        assert!(outcome.segments.iter().all(|s| s.text.chars().count() <= 60));
        assert_eq!(squash(&outcome.texts().concat()), squash(&text));
    }

    #[tokio::test]
    async fn test_unresolvable_anchors_fall_back() {
        let segmenter = Segmenter::new(config(60, 30), Some(Arc::new(HallucinatingOracle)));
        let text = long_text();
        let outcome = segmenter.segment(&text, None).await;
        assert!(outcome.segments.iter().all(|s| s.method == SplitMethod::HardSplit));
        assert_eq!(squash(&outcome.texts().concat()), squash(&text));
    }

    #[tokio::test]
    async fn test_no_oracle_hard_splits() {
        let segmenter = Segmenter::new(config(50, 25), None);
        let outcome = segmenter.segment(&long_text(), None).await;
        assert!(!outcome.oracle_used);
        assert!(outcome.segments.len() >= 4);
        assert!(outcome.segments.iter().all(|s| s.text.chars().count() <= 50));
    }

    #[tokio::test]
    async fn test_verse_markers_split_without_oracle() {
        let oracle = Arc::new(SentenceOracle { calls: AtomicUsize::new(0) });
        let segmenter = Segmenter::new(config(60, 40), Some(oracle.clone()));
        let text = "الحمد لله رب العالمين (١) الرحمن الرحيم (٢) مالك يوم الدين (٣) اياك نعبد واياك نستعين (٤) اهدنا الصراط المستقيم (٥)";
        let outcome = segmenter.segment(text, Some("ar")).await;

        assert_eq!(oracle.calls.load(Ordering::SeqCst), 0);
        assert!(outcome.segments.len() > 1);
        assert!(outcome.segments.iter().all(|s| s.method == SplitMethod::VerseMarkers));
        assert!(outcome.segments.iter().all(|s| s.text.chars().count() <= 60));
        assert!(outcome.segments[0].text.ends_with("(١)") || outcome.segments[0].text.ends_with("(٢)"));
        assert_eq!(squash(&outcome.texts().concat()), squash(text));
    }

    #[tokio::test]
    async fn test_depth_limit_hard_splits() {
        let segmenter = Segmenter::new(
            SegmentationConfig { max_depth: 0, ..config(40, 20) },
            Some(Arc::new(SentenceOracle { calls: AtomicUsize::new(0) })),
        );
        let outcome = segmenter.segment(&long_text(), None).await;
        assert!(!outcome.oracle_used);
        assert!(outcome.segments.iter().all(|s| s.method == SplitMethod::HardSplit));
    }
}
