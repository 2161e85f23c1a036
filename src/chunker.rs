//! Hierarchical chunking: leveled document units are recursively re-split
//! into a multi-level node tree.
//!
//! Each split level indexes into the configured `chunk_sizes` list and uses
//! its own size budget; the budget counts the serialized chunking-time
//! metadata against the chunk size, which is why metadata is reduced to a
//! minimal subset before splitting. The final output is the concatenation
//! of the nodes produced at every level — parents remain retrievable as
//! coarser-grained chunks alongside their children.
//!
//! Splitting occurs on paragraph boundaries (`\n\n`) where possible, with a
//! hard split backtracking to a newline or space when a single paragraph
//! exceeds the budget. Consecutive chunks share the configured overlap.

use serde_json::json;
use uuid::Uuid;

use crate::config::ChunkingConfig;
use crate::error::PipelineError;
use crate::metadata;
use crate::models::{ChunkNode, ContentType, DocumentUnit};
use crate::progress::ProgressTracker;

pub struct HierarchicalChunker {
    chunk_sizes: Vec<usize>,
    chunk_overlap: usize,
}

impl HierarchicalChunker {
    pub fn new(chunk_sizes: Vec<usize>, chunk_overlap: usize) -> Result<Self, PipelineError> {
        if chunk_sizes.is_empty() {
            return Err(PipelineError::Configuration(
                "chunk_sizes must not be empty".to_string(),
            ));
        }
        if chunk_sizes.iter().any(|&s| s == 0) {
            return Err(PipelineError::Configuration(
                "chunk_sizes entries must be > 0".to_string(),
            ));
        }
        let smallest = *chunk_sizes.iter().min().unwrap();
        if chunk_overlap >= smallest {
            return Err(PipelineError::Configuration(format!(
                "chunk_overlap ({chunk_overlap}) must be smaller than the smallest chunk size ({smallest})"
            )));
        }
        Ok(Self {
            chunk_sizes,
            chunk_overlap,
        })
    }

    pub fn from_config(config: &ChunkingConfig) -> Result<Self, PipelineError> {
        Self::new(config.chunk_sizes.clone(), config.chunk_overlap)
    }

    /// Number of configured split levels.
    pub fn levels(&self) -> usize {
        self.chunk_sizes.len()
    }

    /// Split the leveled units of one document into the full multi-level
    /// node list. Progress is reported per unit and per node within each
    /// level.
    pub async fn chunk_units(
        &self,
        units: &[DocumentUnit],
        tracker: Option<&ProgressTracker>,
    ) -> Result<Vec<ChunkNode>, PipelineError> {
        report(tracker, "Starting unit processing", 0, units.len() as u64).await;

        let mut all_nodes = Vec::new();
        for (i, unit) in units.iter().enumerate() {
            report(
                tracker,
                &format!(
                    "Processing unit {}/{} of document {}",
                    i + 1,
                    units.len(),
                    unit.ref_doc_id
                ),
                (i + 1) as u64,
                units.len() as u64,
            )
            .await;

            // The root stands for the unit itself and is not emitted; its
            // split products are the level-0 nodes.
            let mut root = [self.root_node(unit)];
            let mut current = self.split_generation(&mut root, 0, tracker).await?;

            for level in 1..self.chunk_sizes.len() {
                let next = self.split_generation(&mut current, level, tracker).await?;
                // The parents now carry their child ids and are final.
                all_nodes.append(&mut current);
                current = next;
            }
            // Deepest level: no children.
            all_nodes.append(&mut current);
        }

        report(
            tracker,
            &format!("Completed processing {} units", units.len()),
            units.len() as u64,
            units.len() as u64,
        )
        .await;

        tracing::debug!(
            units = units.len(),
            nodes = all_nodes.len(),
            "hierarchical chunking complete"
        );
        Ok(all_nodes)
    }

    /// Synthetic root standing for one document unit. Not emitted; its
    /// split products become the level-0 nodes.
    fn root_node(&self, unit: &DocumentUnit) -> ChunkNode {
        ChunkNode {
            id: Uuid::new_v4().to_string(),
            text: unit.text.clone(),
            content_type: unit.content_type,
            hierarchical_level: unit.hierarchical_level,
            split_level: 0,
            importance_score: unit.importance_score,
            page_number: unit.page_number,
            document_id: unit.ref_doc_id.clone(),
            parent_id: None,
            child_ids: Vec::new(),
            metadata: unit.metadata.clone(),
        }
    }

    /// Split one generation of nodes with the splitter configured for
    /// `level`, returning the produced sub-nodes. Parents receive their
    /// child ids; sub-nodes at level > 0 receive parent links and
    /// relationship metadata.
    ///
    /// A level at or beyond the configured number of splitters is a
    /// contract violation and fails fast rather than clamping.
    async fn split_generation(
        &self,
        nodes: &mut [ChunkNode],
        level: usize,
        tracker: Option<&ProgressTracker>,
    ) -> Result<Vec<ChunkNode>, PipelineError> {
        if level >= self.chunk_sizes.len() {
            return Err(PipelineError::LevelOutOfRange {
                level,
                splitters: self.chunk_sizes.len(),
            });
        }

        report(
            tracker,
            &format!("Processing level {level} nodes"),
            0,
            nodes.len() as u64,
        )
        .await;

        let total = nodes.len();
        let mut sub_nodes = Vec::new();
        for (i, node) in nodes.iter_mut().enumerate() {
            report(
                tracker,
                &format!("Processing level {} node {}/{}", level, i + 1, total),
                (i + 1) as u64,
                total as u64,
            )
            .await;

            // The splitter counts serialized chunking-time metadata
            // against the size budget.
            let metadata_len =
                metadata::serialized_len(&metadata::filter_for_chunking(&node.metadata));
            let budget = self.chunk_sizes[level]
                .saturating_sub(metadata_len)
                .max(1);

            for piece in split_text(&node.text, budget, self.chunk_overlap) {
                let mut child = ChunkNode {
                    id: Uuid::new_v4().to_string(),
                    text: piece,
                    content_type: node.content_type,
                    hierarchical_level: node.hierarchical_level,
                    split_level: level,
                    importance_score: node.importance_score,
                    page_number: node.page_number,
                    document_id: node.document_id.clone(),
                    parent_id: None,
                    child_ids: Vec::new(),
                    metadata: node.metadata.clone(),
                };
                if level > 0 {
                    attach_relationships(node, &mut child);
                    node.child_ids.push(child.id.clone());
                }
                sub_nodes.push(child);
            }
        }

        Ok(sub_nodes)
    }
}

async fn report(tracker: Option<&ProgressTracker>, message: &str, current: u64, total: u64) {
    if let Some(t) = tracker {
        t.update_stage_progress(message, current, total).await;
    }
}

/// Attach the parent-child relationship plus content-type specific
/// relationship metadata to a freshly split node.
fn attach_relationships(parent: &ChunkNode, child: &mut ChunkNode) {
    child.parent_id = Some(parent.id.clone());

    match child.content_type {
        // Headers are important structural elements.
        ContentType::Header => {
            child
                .metadata
                .insert("structural_importance".into(), json!("high"));
        }
        // Tables reference their parent context.
        ContentType::Table => {
            child
                .metadata
                .insert("table_parent_context".into(), json!(parent.id));
        }
        // List items know their list context.
        ContentType::ListItem => {
            child.metadata.insert("list_parent".into(), json!(parent.id));
        }
        _ => {}
    }

    child
        .metadata
        .insert("parent_level".into(), json!(parent.hierarchical_level));
    child
        .metadata
        .insert("child_level".into(), json!(child.hierarchical_level));
}

/// Split text into pieces of at most `max_chars`, preferring paragraph
/// boundaries and sharing `overlap` characters between consecutive pieces.
/// Returns an empty list for blank text, otherwise at least one piece.
fn split_text(text: &str, max_chars: usize, overlap: usize) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    if text.len() <= max_chars {
        return vec![text.trim().to_string()];
    }

    let overlap = overlap.min(max_chars.saturating_sub(1));
    let mut pieces = Vec::new();
    let mut buf = String::new();

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        let would_be = if buf.is_empty() {
            trimmed.len()
        } else {
            buf.len() + 2 + trimmed.len()
        };

        if would_be > max_chars && !buf.is_empty() {
            let carry = overlap_tail(&buf, overlap);
            pieces.push(std::mem::take(&mut buf));
            buf = carry;
        }

        if trimmed.len() > max_chars {
            if !buf.is_empty() {
                pieces.push(std::mem::take(&mut buf));
            }
            hard_split(trimmed, max_chars, overlap, &mut pieces);
        } else {
            // The overlap carry is best-effort: drop it when it would push
            // the piece past the budget.
            if !buf.is_empty() && buf.len() + 2 + trimmed.len() > max_chars {
                buf.clear();
            }
            if !buf.is_empty() {
                buf.push_str("\n\n");
            }
            buf.push_str(trimmed);
        }
    }

    if !buf.trim().is_empty() {
        pieces.push(buf);
    }

    if pieces.is_empty() {
        pieces.push(text.trim().to_string());
    }

    pieces
}

/// Hard-split an oversized paragraph at `max_chars` boundaries, backing up
/// to a newline or space where possible, stepping by `max_chars - overlap`.
fn hard_split(text: &str, max_chars: usize, overlap: usize, out: &mut Vec<String>) {
    let mut start = 0;
    while start < text.len() {
        let remaining = &text[start..];
        if remaining.len() <= max_chars {
            let piece = remaining.trim();
            if !piece.is_empty() {
                out.push(piece.to_string());
            }
            break;
        }

        let mut window_end = floor_char_boundary(remaining, max_chars);
        if window_end == 0 {
            window_end = ceil_char_boundary(remaining, 1);
        }
        let cut = remaining[..window_end]
            .rfind('\n')
            .or_else(|| remaining[..window_end].rfind(' '))
            .map(|pos| pos + 1)
            .filter(|&pos| pos > 1)
            .unwrap_or(window_end);

        let piece = remaining[..cut].trim();
        if !piece.is_empty() {
            out.push(piece.to_string());
        }

        let step = cut.saturating_sub(overlap).max(1);
        start = ceil_char_boundary(text, start + step);
    }
}

/// Last `overlap` characters of a flushed chunk, used to seed the next
/// buffer. Starts at a whitespace boundary when one falls inside the tail.
fn overlap_tail(text: &str, overlap: usize) -> String {
    if overlap == 0 || text.is_empty() {
        return String::new();
    }
    let start = floor_char_boundary(text, text.len().saturating_sub(overlap));
    let tail = &text[start..];
    match tail.find(char::is_whitespace) {
        Some(pos) => tail[pos..].trim_start().to_string(),
        None => tail.to_string(),
    }
}

/// Largest char boundary at or below `idx`.
fn floor_char_boundary(s: &str, idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    let mut i = idx;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Smallest char boundary at or above `idx`.
fn ceil_char_boundary(s: &str, idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    let mut i = idx;
    while i < s.len() && !s.is_char_boundary(i) {
        i += 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::classify;
    use crate::hierarchy;
    use crate::models::Block;
    use serde_json::Map;
    use std::collections::HashMap;

    fn unit(text: &str, block_type: &str, index: usize) -> DocumentUnit {
        let block = Block {
            content: text.to_string(),
            block_type: block_type.to_string(),
            block_index: index,
            page_number: 1,
            metadata: Map::new(),
        };
        hierarchy::build(classify(vec![block]), "doc-1").remove(0)
    }

    fn long_text(paragraphs: usize, words_per: usize) -> String {
        (0..paragraphs)
            .map(|p| {
                (0..words_per)
                    .map(|w| format!("word{p}x{w}"))
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    #[tokio::test]
    async fn small_units_yield_one_node_each() {
        let chunker = HierarchicalChunker::new(vec![4096], 100).unwrap();
        let units = vec![
            unit("Intro", "header", 0),
            unit("First paragraph.", "paragraph", 1),
            unit("Second paragraph.", "paragraph", 2),
        ];
        let nodes = chunker.chunk_units(&units, None).await.unwrap();
        assert!(nodes.len() >= 3);
        assert!(nodes.iter().all(|n| n.split_level == 0));
        assert!(nodes.iter().all(|n| n.parent_id.is_none()));
    }

    #[tokio::test]
    async fn child_split_level_is_parent_plus_one() {
        let chunker = HierarchicalChunker::new(vec![2000, 900, 400], 50).unwrap();
        let units = vec![unit(&long_text(12, 60), "paragraph", 0)];
        let nodes = chunker.chunk_units(&units, None).await.unwrap();

        let by_id: HashMap<&str, &ChunkNode> =
            nodes.iter().map(|n| (n.id.as_str(), n)).collect();

        let mut saw_child = false;
        for node in &nodes {
            match &node.parent_id {
                None => assert_eq!(node.split_level, 0),
                Some(parent_id) => {
                    saw_child = true;
                    let parent = by_id
                        .get(parent_id.as_str())
                        .expect("parent must exist in output");
                    assert_eq!(node.split_level, parent.split_level + 1);
                    assert!(parent.child_ids.contains(&node.id));
                }
            }
            // Deepest level never carries children.
            if node.split_level == 2 {
                assert!(node.child_ids.is_empty());
            }
        }
        assert!(saw_child, "expected deeper levels to produce children");
    }

    #[tokio::test]
    async fn output_contains_every_level_not_just_leaves() {
        let chunker = HierarchicalChunker::new(vec![2000, 900], 50).unwrap();
        let units = vec![unit(&long_text(10, 60), "paragraph", 0)];
        let nodes = chunker.chunk_units(&units, None).await.unwrap();

        let levels: Vec<usize> = nodes.iter().map(|n| n.split_level).collect();
        assert!(levels.contains(&0));
        assert!(levels.contains(&1));
    }

    #[tokio::test]
    async fn relationship_metadata_follows_content_type() {
        let chunker = HierarchicalChunker::new(vec![600, 300], 20).unwrap();

        for (block_type, key) in [
            ("header", "structural_importance"),
            ("table", "table_parent_context"),
            ("list_item", "list_parent"),
        ] {
            let units = vec![unit(&long_text(6, 40), block_type, 0)];
            let nodes = chunker.chunk_units(&units, None).await.unwrap();
            let child = nodes
                .iter()
                .find(|n| n.parent_id.is_some())
                .unwrap_or_else(|| panic!("no child node for {block_type}"));
            assert!(child.metadata.contains_key(key), "missing {key}");
            assert!(child.metadata.contains_key("parent_level"));
            assert!(child.metadata.contains_key("child_level"));
        }
    }

    #[tokio::test]
    async fn level_out_of_range_fails_fast() {
        let chunker = HierarchicalChunker::new(vec![512], 10).unwrap();
        let units = vec![unit("text", "paragraph", 0)];
        let mut root = [chunker.root_node(&units[0])];
        let err = chunker
            .split_generation(&mut root, 1, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::LevelOutOfRange {
                level: 1,
                splitters: 1
            }
        ));
    }

    #[tokio::test]
    async fn deterministic_across_runs() {
        let chunker = HierarchicalChunker::new(vec![800, 300], 40).unwrap();
        let units = vec![unit(&long_text(8, 50), "paragraph", 0)];
        let a = chunker.chunk_units(&units, None).await.unwrap();
        let b = chunker.chunk_units(&units, None).await.unwrap();
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.text, y.text);
            assert_eq!(x.split_level, y.split_level);
        }
    }

    #[test]
    fn split_text_respects_paragraph_boundaries() {
        let text = "First paragraph.\n\nSecond paragraph.\n\nThird paragraph.";
        let pieces = split_text(text, 700, 0);
        assert_eq!(pieces.len(), 1);
        assert!(pieces[0].contains("First paragraph."));
        assert!(pieces[0].contains("Third paragraph."));
    }

    #[test]
    fn split_text_empty_yields_nothing() {
        assert!(split_text("", 100, 10).is_empty());
        assert!(split_text("   \n\n  ", 100, 10).is_empty());
    }

    #[test]
    fn split_text_pieces_fit_budget() {
        let text = long_text(1, 400);
        let pieces = split_text(&text, 200, 20);
        assert!(pieces.len() > 1);
        for piece in &pieces {
            assert!(piece.len() <= 200, "piece length {}", piece.len());
        }
    }

    #[test]
    fn consecutive_pieces_share_overlap() {
        let text = long_text(6, 30);
        let pieces = split_text(&text, 400, 60);
        assert!(pieces.len() > 1);
        // The seed of each piece after the first comes from the previous
        // piece's tail.
        let first_words: Vec<&str> = pieces[1].split_whitespace().take(2).collect();
        assert!(
            pieces[0].contains(first_words[0]),
            "expected overlap seed {:?} in previous piece",
            first_words
        );
    }
}
