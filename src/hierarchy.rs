//! Hierarchy construction: classified blocks become leveled document units.
//!
//! Each content category carries a fixed semantic level and importance
//! weight. Paragraphs and list items are grouped by page and ordered by
//! block index within each page to preserve reading order; headers, tables,
//! and other content are emitted in original block order.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

use crate::blocks::CategorizedBlocks;
use crate::models::{Block, ContentType, DocumentUnit};

/// Build the leveled unit list for one document from its categorized blocks.
///
/// Emission order follows category level: headers (0), then paragraphs and
/// tables (1), then list items (2), then other content (3). Every unit is
/// stamped with `ref_doc_id` and a source relationship pointing at the
/// synthetic document node, which the deletion path later keys on.
pub fn build(groups: CategorizedBlocks, document_id: &str) -> Vec<DocumentUnit> {
    let mut units = Vec::with_capacity(groups.total());

    emit_in_block_order(groups.headers, ContentType::Header, document_id, &mut units);
    emit_by_page(
        groups.paragraphs,
        ContentType::Paragraph,
        document_id,
        &mut units,
    );
    emit_in_block_order(groups.tables, ContentType::Table, document_id, &mut units);
    emit_by_page(groups.lists, ContentType::ListItem, document_id, &mut units);
    emit_in_block_order(groups.other, ContentType::Other, document_id, &mut units);

    tracing::debug!(
        document_id,
        units = units.len(),
        "built hierarchical units from blocks"
    );
    units
}

fn emit_in_block_order(
    blocks: Vec<Block>,
    content_type: ContentType,
    document_id: &str,
    out: &mut Vec<DocumentUnit>,
) {
    for block in blocks {
        out.push(make_unit(block, content_type, document_id));
    }
}

/// Group by page, then sort by block index within each page. Pages are
/// visited in ascending order.
fn emit_by_page(
    blocks: Vec<Block>,
    content_type: ContentType,
    document_id: &str,
    out: &mut Vec<DocumentUnit>,
) {
    let mut pages: BTreeMap<u32, Vec<Block>> = BTreeMap::new();
    for block in blocks {
        pages.entry(block.page_number).or_default().push(block);
    }

    for (_, mut page_blocks) in pages {
        page_blocks.sort_by_key(|b| b.block_index);
        for block in page_blocks {
            out.push(make_unit(block, content_type, document_id));
        }
    }
}

fn make_unit(block: Block, content_type: ContentType, document_id: &str) -> DocumentUnit {
    let level = content_type.hierarchical_level();
    let importance = content_type.importance_score();

    let mut metadata = unit_metadata(&block, content_type, level, importance, document_id);
    // Parser provenance rides along for storage-time filtering.
    for (key, value) in &block.metadata {
        metadata.entry(key.clone()).or_insert_with(|| value.clone());
    }

    DocumentUnit {
        text: block.content,
        content_type,
        hierarchical_level: level,
        importance_score: importance,
        page_number: block.page_number,
        block_index: block.block_index,
        ref_doc_id: document_id.to_string(),
        metadata,
    }
}

fn unit_metadata(
    block: &Block,
    content_type: ContentType,
    level: u8,
    importance: f32,
    document_id: &str,
) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert("document_id".into(), json!(document_id));
    metadata.insert("content_type".into(), json!(content_type.as_str()));
    metadata.insert("block_type".into(), json!(block.block_type));
    metadata.insert("block_index".into(), json!(block.block_index));
    metadata.insert("page_number".into(), json!(block.page_number));
    metadata.insert("hierarchical_level".into(), json!(level));
    metadata.insert("importance_score".into(), json!(importance));
    metadata.insert("ref_doc_id".into(), json!(document_id));
    // Source relationship: a synthetic node standing for the whole
    // document, used for cascade deletion.
    metadata.insert("source_node_id".into(), json!(document_id));
    metadata.insert("source_node_type".into(), json!("document"));
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::classify;

    fn block(block_type: &str, index: usize, page: u32) -> Block {
        Block {
            content: format!("{block_type} {index}"),
            block_type: block_type.to_string(),
            block_index: index,
            page_number: page,
            metadata: Map::new(),
        }
    }

    #[test]
    fn single_page_header_and_two_paragraphs() {
        let blocks = vec![
            block("header", 0, 1),
            block("paragraph", 1, 1),
            block("paragraph", 2, 1),
        ];
        let units = build(classify(blocks), "doc-1");

        assert_eq!(units.len(), 3);
        let levels: Vec<u8> = units.iter().map(|u| u.hierarchical_level).collect();
        assert_eq!(levels, vec![0, 1, 1]);
        let importance: Vec<f32> = units.iter().map(|u| u.importance_score).collect();
        assert_eq!(importance, vec![0.9, 0.7, 0.7]);
    }

    #[test]
    fn paragraphs_ordered_by_page_then_block_index() {
        let blocks = vec![
            block("paragraph", 5, 2),
            block("paragraph", 3, 1),
            block("paragraph", 4, 2),
            block("paragraph", 1, 1),
        ];
        let units = build(classify(blocks), "doc-1");
        let order: Vec<(u32, usize)> = units
            .iter()
            .map(|u| (u.page_number, u.block_index))
            .collect();
        assert_eq!(order, vec![(1, 1), (1, 3), (2, 4), (2, 5)]);
    }

    #[test]
    fn every_unit_carries_ref_doc_id_and_source_relationship() {
        let blocks = vec![block("header", 0, 1), block("figure", 1, 1)];
        let units = build(classify(blocks), "doc-9");
        for unit in &units {
            assert_eq!(unit.ref_doc_id, "doc-9");
            assert_eq!(unit.metadata["source_node_id"], "doc-9");
            assert_eq!(unit.metadata["source_node_type"], "document");
        }
    }

    #[test]
    fn tables_keep_original_block_order() {
        let blocks = vec![
            block("table", 7, 3),
            block("table", 2, 1),
            block("table", 5, 2),
        ];
        let units = build(classify(blocks), "doc-1");
        let indices: Vec<usize> = units.iter().map(|u| u.block_index).collect();
        assert_eq!(indices, vec![7, 2, 5]);
    }
}
