//! Paragraph diff keyed by word hash.
//!
//! A stored paragraph whose words still appear is reused verbatim (markers, id and
//! embedding survive); everything else is inserted or tombstoned. Positions always come
//! out as `0..n`.

use std::collections::{HashMap, VecDeque};

use crate::ingest::metadata::{content_hash, normalized_hash, word_hash};
use crate::store::{NewParagraph, ParagraphPlan, ParagraphRecord, ParagraphUpdate};

/// A paragraph produced by the parse and segment stages
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingParagraph {
    pub text: String,
    pub heading: Option<String>,
    pub block_type: String,
}

pub fn diff_paragraphs(existing: &[ParagraphRecord], incoming: &[IncomingParagraph]) -> ParagraphPlan {
    let mut by_word_hash: HashMap<&str, VecDeque<&ParagraphRecord>> = HashMap::new();
    let mut ordered: Vec<&ParagraphRecord> = existing.iter().collect();
    ordered.sort_by_key(|p| (p.position, p.id));
    for paragraph in ordered {
        by_word_hash
            .entry(paragraph.word_hash.as_str())
            .or_default()
            .push_back(paragraph);
    }

    let mut plan = ParagraphPlan::default();
    for (position, paragraph) in incoming.iter().enumerate() {
        let position = position as i64;
        let hash = word_hash(&paragraph.text);

        match by_word_hash.get_mut(hash.as_str()).and_then(VecDeque::pop_front) {
            Some(stored) => {
                let changed = stored.position != position
                    || stored.heading != paragraph.heading
                    || stored.block_type != paragraph.block_type;
                if changed {
                    plan.updates.push(ParagraphUpdate {
                        id: stored.id,
                        position,
                        heading: paragraph.heading.clone(),
                        block_type: paragraph.block_type.clone(),
                    });
                } else {
                    plan.unchanged += 1;
                }
            }
            None => plan.inserts.push(NewParagraph {
                position,
                text: paragraph.text.clone(),
                content_hash: content_hash(&paragraph.text),
                word_hash: hash,
                normalized_hash: normalized_hash(&paragraph.text),
                heading: paragraph.heading.clone(),
                block_type: paragraph.block_type.clone(),
            }),
        }
    }

    let mut deletes: Vec<i64> = by_word_hash.into_values().flatten().map(|p| p.id).collect();
    deletes.sort_unstable();
    plan.deletes = deletes;
    plan
}
