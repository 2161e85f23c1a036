//! Block classification: the fixed tag mapping and type grouping applied to
//! parsed content blocks before hierarchy construction.
//!
//! The tag mapping is total — any tag the layout parser emits resolves to a
//! block-type name, and anything unrecognized falls back to `text`. This
//! table is the single source of truth for downstream level assignment.

use crate::models::{Block, ContentType};

/// Map a source-parser tag to a block-type name.
///
/// Known structural tags keep their canonical names; auxiliary tags
/// (figure, caption, footnote, abstract, title) keep their own names and
/// later classify as `other`.
pub fn map_tag_to_block_type(tag: &str) -> &'static str {
    match tag {
        "header" => "header",
        "para" => "paragraph",
        "table" => "table",
        "list_item" => "list_item",
        "figure" => "figure",
        "caption" => "caption",
        "footnote" => "footnote",
        "abstract" => "abstract",
        "title" => "title",
        _ => "text",
    }
}

/// Resolve a block-type name to its canonical content type.
pub fn content_type_for(block_type: &str) -> ContentType {
    match block_type {
        "header" => ContentType::Header,
        "paragraph" => ContentType::Paragraph,
        "table" => ContentType::Table,
        "list_item" => ContentType::ListItem,
        _ => ContentType::Other,
    }
}

/// Blocks grouped by content category, order preserved within each group.
#[derive(Debug, Default)]
pub struct CategorizedBlocks {
    pub headers: Vec<Block>,
    pub paragraphs: Vec<Block>,
    pub tables: Vec<Block>,
    pub lists: Vec<Block>,
    pub other: Vec<Block>,
}

impl CategorizedBlocks {
    pub fn total(&self) -> usize {
        self.headers.len()
            + self.paragraphs.len()
            + self.tables.len()
            + self.lists.len()
            + self.other.len()
    }
}

/// Group blocks by content category for specialized processing.
///
/// Deterministic: input order is preserved within each category, and
/// unknown block types always land in `other`. There are no error
/// conditions.
pub fn classify(blocks: Vec<Block>) -> CategorizedBlocks {
    let mut groups = CategorizedBlocks::default();

    for block in blocks {
        match content_type_for(&block.block_type) {
            ContentType::Header => groups.headers.push(block),
            ContentType::Paragraph => groups.paragraphs.push(block),
            ContentType::Table => groups.tables.push(block),
            ContentType::ListItem => groups.lists.push(block),
            ContentType::Other => groups.other.push(block),
        }
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn block(block_type: &str, index: usize) -> Block {
        Block {
            content: format!("block {index}"),
            block_type: block_type.to_string(),
            block_index: index,
            page_number: 1,
            metadata: Map::new(),
        }
    }

    #[test]
    fn tag_mapping_is_total() {
        assert_eq!(map_tag_to_block_type("header"), "header");
        assert_eq!(map_tag_to_block_type("para"), "paragraph");
        assert_eq!(map_tag_to_block_type("table"), "table");
        assert_eq!(map_tag_to_block_type("list_item"), "list_item");
        assert_eq!(map_tag_to_block_type("caption"), "caption");
        assert_eq!(map_tag_to_block_type("something_new"), "text");
        assert_eq!(map_tag_to_block_type(""), "text");
    }

    #[test]
    fn auxiliary_types_classify_as_other() {
        for t in ["figure", "caption", "footnote", "abstract", "title", "text"] {
            assert_eq!(content_type_for(t), ContentType::Other, "type {t}");
        }
    }

    #[test]
    fn grouping_preserves_order_within_category() {
        let blocks = vec![
            block("paragraph", 0),
            block("header", 1),
            block("paragraph", 2),
            block("figure", 3),
            block("paragraph", 4),
        ];
        let groups = classify(blocks);
        assert_eq!(groups.headers.len(), 1);
        assert_eq!(groups.other.len(), 1);
        let indices: Vec<usize> = groups.paragraphs.iter().map(|b| b.block_index).collect();
        assert_eq!(indices, vec![0, 2, 4]);
    }

    #[test]
    fn classification_is_idempotent() {
        let blocks = vec![
            block("header", 0),
            block("table", 1),
            block("list_item", 2),
            block("unknown", 3),
        ];
        let first = classify(blocks.clone());
        let second = classify(blocks);

        let shape = |g: &CategorizedBlocks| {
            (
                g.headers.iter().map(|b| b.block_index).collect::<Vec<_>>(),
                g.tables.iter().map(|b| b.block_index).collect::<Vec<_>>(),
                g.lists.iter().map(|b| b.block_index).collect::<Vec<_>>(),
                g.other.iter().map(|b| b.block_index).collect::<Vec<_>>(),
            )
        };
        assert_eq!(shape(&first), shape(&second));
    }
}
