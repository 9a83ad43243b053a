//! Segmentation and marker oracles implemented with prompts over any chat provider.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{
    BreakPlan, ChatMessage, ChatOptions, ChatProvider, MarkedParagraph, MarkerOracle,
    MarkerRequest, SegmentationOracle,
};
use crate::error::{Result, SifterError};
use crate::markers;

const SEGMENT_SYSTEM_PROMPT: &str = "You divide long passages of sacred and classical texts into \
paragraphs by meaning. Texts may lack punctuation entirely. Never rewrite, translate or correct \
the text. For every break you choose, quote verbatim the last few words before it (endPhrase) \
and the first few words after it (startPhrase), copied exactly as they appear. Reply with a JSON \
object: {\"breaks\": [{\"endPhrase\": \"...\", \"startPhrase\": \"...\"}], \"confidence\": 0.0-1.0, \
\"reasoning\": \"...\"}.";

const MARKER_SYSTEM_PROMPT: &str = "You identify sentence boundaries in passages of sacred and \
classical texts, including texts without punctuation. Copy every sentence verbatim and in order; \
never rewrite, translate, normalize or skip text. Reply with a JSON object: {\"paragraphs\": \
[{\"id\": <number>, \"sentences\": [\"...\"]}]}.";

/// Oracle backed by a chat model
pub struct LlmOracle {
    provider: Arc<dyn ChatProvider>,
    options: ChatOptions,
}

impl LlmOracle {
    pub fn new(provider: Arc<dyn ChatProvider>, options: ChatOptions) -> Self {
        Self { provider, options }
    }

    pub fn model(&self) -> &str {
        self.provider.model()
    }

    async fn ask<T: for<'de> Deserialize<'de>>(&self, system: &str, user: String) -> Result<T> {
        let messages = [ChatMessage::system(system), ChatMessage::user(user)];
        let reply = self.provider.chat(&messages, &self.options).await?;
        let json = extract_json(&reply)
            .ok_or_else(|| SifterError::Parse(format!("no JSON object in oracle reply: {:.80}", reply)))?;
        serde_json::from_str(json).map_err(|e| SifterError::Parse(format!("oracle reply: {}", e)))
    }
}

/// The outermost `{...}` of a model reply, ignoring code fences and surrounding prose
pub fn extract_json(reply: &str) -> Option<&str> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    (end > start).then(|| &reply[start..=end])
}

fn language_line(language: Option<&str>) -> String {
    match language {
        Some(code) => format!("Language: {}\n", code),
        None => String::new(),
    }
}

#[async_trait]
impl SegmentationOracle for LlmOracle {
    async fn suggest_breaks(
        &self,
        text: &str,
        language: Option<&str>,
        target_chunks: usize,
    ) -> Result<BreakPlan> {
        let breaks = target_chunks.saturating_sub(1).max(1);
        let user = format!(
            "{}Split the following text into about {} paragraphs ({} breaks).\n\nTEXT:\n{}",
            language_line(language),
            target_chunks.max(2),
            breaks,
            text
        );
        let plan: BreakPlan = self.ask(SEGMENT_SYSTEM_PROMPT, user).await?;
        log::debug!(
            "Oracle suggested {} breaks (confidence {:.2})",
            plan.breaks.len(),
            plan.confidence
        );
        Ok(plan)
    }
}

#[derive(Serialize)]
struct MarkerInput<'a> {
    id: usize,
    text: &'a str,
}

#[derive(Deserialize)]
struct MarkerReply {
    #[serde(default)]
    paragraphs: Vec<SentenceList>,
}

#[derive(Deserialize)]
struct SentenceList {
    id: usize,
    #[serde(default)]
    sentences: Vec<String>,
}

#[async_trait]
impl MarkerOracle for LlmOracle {
    /// The model only lists sentences; markers are placed locally so the model can never
    /// alter the paragraph text. Paragraphs whose sentences cannot be located are omitted.
    async fn add_sentence_markers(
        &self,
        paragraphs: &[MarkerRequest],
        language: Option<&str>,
    ) -> Result<Vec<MarkedParagraph>> {
        if paragraphs.is_empty() {
            return Ok(Vec::new());
        }
        let inputs: Vec<MarkerInput> = paragraphs
            .iter()
            .map(|p| MarkerInput { id: p.id, text: &p.text })
            .collect();
        let payload = serde_json::to_string(&inputs)
            .map_err(|e| SifterError::Parse(format!("marker request: {}", e)))?;
        let user = format!("{}PARAGRAPHS:\n{}", language_line(language), payload);

        let reply: MarkerReply = self.ask(MARKER_SYSTEM_PROMPT, user).await?;

        let mut marked = Vec::with_capacity(reply.paragraphs.len());
        for list in reply.paragraphs {
            let Some(request) = paragraphs.iter().find(|p| p.id == list.id) else {
                continue;
            };
            if let Some((marked_text, sentence_count)) = markers::mark_sentences(&request.text, &list.sentences) {
                marked.push(MarkedParagraph {
                    id: request.id,
                    marked_text,
                    sentence_count,
                });
            }
        }
        Ok(marked)
    }
}
