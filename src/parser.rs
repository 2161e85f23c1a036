//! Document parser collaborators.
//!
//! Block extraction is an external concern: the structured path talks to a
//! layout parsing service over HTTP and receives typed blocks with tags,
//! nesting levels, bounding boxes, and constituent sentences; the flat path
//! reads plain UTF-8 text formats directly. Either way the pipeline sees an
//! ordered list of typed [`Block`]s.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::blocks::map_tag_to_block_type;
use crate::config::ParserConfig;
use crate::error::PipelineError;
use crate::models::Block;

/// Extensions handled by the structured layout parser.
const STRUCTURED_EXTENSIONS: &[&str] = &[
    "pdf", "html", "htm", "docx", "doc", "ppt", "pptx", "md", "markdown",
];

/// Produces typed blocks from a source file.
#[async_trait]
pub trait DocumentParser: Send + Sync {
    /// Whether this parser handles the file's extension.
    fn is_supported(&self, path: &Path) -> bool;

    /// Parse the document into an ordered list of typed blocks.
    async fn parse(&self, path: &Path) -> Result<Vec<Block>, PipelineError>;
}

/// HTTP client for an nlm-ingestor-style layout parsing service.
///
/// The service returns one JSON block per layout element:
/// `{tag, block_class, level, page_idx, block_idx, bbox, sentences}`.
/// Tags are mapped to block types through the fixed table in
/// [`crate::blocks`]; blocks with no sentence content are dropped.
#[derive(Debug)]
pub struct LayoutParserClient {
    client: reqwest::Client,
    endpoint: String,
}

impl LayoutParserClient {
    pub fn new(config: &ParserConfig) -> Result<Self, PipelineError> {
        if config.ingestor_url.is_empty() {
            return Err(PipelineError::Configuration(
                "parser.ingestor_url is required for structured parsing".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PipelineError::Configuration(e.to_string()))?;

        let base = config.ingestor_url.trim_end_matches('/');
        Ok(Self {
            client,
            endpoint: format!("{base}/api/parseDocument?renderFormat=all&useNewIndentParser=true"),
        })
    }

    fn extension(path: &Path) -> String {
        path.extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase()
    }
}

#[async_trait]
impl DocumentParser for LayoutParserClient {
    fn is_supported(&self, path: &Path) -> bool {
        STRUCTURED_EXTENSIONS.contains(&Self::extension(path).as_str())
    }

    async fn parse(&self, path: &Path) -> Result<Vec<Block>, PipelineError> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("document")
            .to_string();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| PipelineError::Parse(format!("failed to read {}: {e}", path.display())))?;

        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| PipelineError::Parse(format!("layout service unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Parse(format!(
                "layout service returned {status}: {body}"
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| PipelineError::Parse(format!("invalid layout response: {e}")))?;

        let blocks = parse_layout_response(&payload)?;
        tracing::info!(
            path = %path.display(),
            blocks = blocks.len(),
            "parsed document with layout service"
        );
        Ok(blocks)
    }
}

/// Convert the layout service response into ordered blocks.
fn parse_layout_response(payload: &Value) -> Result<Vec<Block>, PipelineError> {
    let raw_blocks = payload
        .pointer("/return_dict/result/blocks")
        .or_else(|| payload.get("blocks"))
        .and_then(Value::as_array)
        .ok_or_else(|| {
            PipelineError::Parse("layout response carries no block list".to_string())
        })?;

    let mut blocks = Vec::with_capacity(raw_blocks.len());
    let mut block_index = 0usize;

    for raw in raw_blocks {
        if let Some(block) = process_raw_block(raw, block_index) {
            blocks.push(block);
            block_index += 1;
        }
    }

    Ok(blocks)
}

/// Build one [`Block`] from a raw layout element; `None` when the element
/// carries no content.
fn process_raw_block(raw: &Value, block_index: usize) -> Option<Block> {
    let tag = raw.get("tag").and_then(Value::as_str).unwrap_or("unknown");
    let block_class = raw
        .get("block_class")
        .and_then(Value::as_str)
        .unwrap_or("");
    let level = raw.get("level").and_then(Value::as_u64).unwrap_or(0);
    let page_idx = raw.get("page_idx").and_then(Value::as_u64).unwrap_or(0);
    let source_block_idx = raw.get("block_idx").and_then(Value::as_u64).unwrap_or(0);
    let bbox = raw.get("bbox").cloned().unwrap_or(Value::Null);
    let sentences: Vec<String> = raw
        .get("sentences")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let content = sentences.join(" ");
    if content.trim().is_empty() {
        return None;
    }

    let block_type = map_tag_to_block_type(tag);
    // 1-based page numbering downstream.
    let page_number = (page_idx + 1) as u32;

    let mut metadata = Map::new();
    metadata.insert("layout_tag".into(), json!(tag));
    metadata.insert("layout_block_class".into(), json!(block_class));
    metadata.insert("layout_level".into(), json!(level));
    metadata.insert("layout_page_idx".into(), json!(page_idx));
    metadata.insert("layout_block_idx".into(), json!(source_block_idx));
    metadata.insert("layout_bbox".into(), bbox);
    metadata.insert("layout_sentences".into(), json!(sentences));
    metadata.insert("content_length".into(), json!(content.len()));

    Some(Block {
        content,
        block_type: block_type.to_string(),
        block_index,
        page_number,
        metadata,
    })
}

/// Image formats the flat reader cannot extract text from without an OCR
/// backend.
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "tiff", "webp"];

/// Fallback reader for formats the layout parser does not handle (csv and
/// other plain-text files): the whole file becomes a single `text` block
/// that the chunker splits directly. Binary content without valid UTF-8
/// text is a parse error rather than a silent empty ingest.
pub struct FlatFileReader;

#[async_trait]
impl DocumentParser for FlatFileReader {
    fn is_supported(&self, _path: &Path) -> bool {
        true
    }

    async fn parse(&self, path: &Path) -> Result<Vec<Block>, PipelineError> {
        let extension = LayoutParserClient::extension(path);
        if IMAGE_EXTENSIONS.contains(&extension.as_str()) {
            return Err(PipelineError::UnsupportedFormat(format!(".{extension}")));
        }

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| PipelineError::Parse(format!("failed to read {}: {e}", path.display())))?;

        let content = String::from_utf8(bytes).map_err(|_| {
            PipelineError::Parse(format!(
                "{} has no extractable text content",
                path.display()
            ))
        })?;

        if content.trim().is_empty() {
            return Err(PipelineError::Parse(format!(
                "{} is empty",
                path.display()
            )));
        }

        let mut metadata = Map::new();
        metadata.insert("source".into(), json!("flat_reader"));
        metadata.insert(
            "file_type".into(),
            json!(LayoutParserClient::extension(path)),
        );

        Ok(vec![Block {
            content,
            block_type: "text".to_string(),
            block_index: 0,
            page_number: 1,
            metadata,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn structured_extensions_match() {
        let config = ParserConfig {
            ingestor_url: "http://localhost:5010".to_string(),
            timeout_secs: 5,
        };
        let client = LayoutParserClient::new(&config).unwrap();
        assert!(client.is_supported(Path::new("report.pdf")));
        assert!(client.is_supported(Path::new("notes.MD")));
        assert!(!client.is_supported(Path::new("data.csv")));
        assert!(!client.is_supported(Path::new("photo.png")));
    }

    #[test]
    fn missing_ingestor_url_is_a_configuration_error() {
        let err = LayoutParserClient::new(&ParserConfig::default()).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn layout_response_blocks_are_ordered_and_typed() {
        let payload = json!({
            "return_dict": { "result": { "blocks": [
                { "tag": "header", "level": 0, "page_idx": 0, "block_idx": 0,
                  "sentences": ["Introduction"] },
                { "tag": "para", "level": 1, "page_idx": 0, "block_idx": 1,
                  "sentences": ["First sentence.", "Second sentence."] },
                { "tag": "para", "level": 1, "page_idx": 0, "block_idx": 2,
                  "sentences": [] },
                { "tag": "mystery", "level": 0, "page_idx": 1, "block_idx": 3,
                  "sentences": ["Odd one out."] }
            ]}}
        });

        let blocks = parse_layout_response(&payload).unwrap();
        assert_eq!(blocks.len(), 3); // empty block dropped
        assert_eq!(blocks[0].block_type, "header");
        assert_eq!(blocks[1].block_type, "paragraph");
        assert_eq!(blocks[1].content, "First sentence. Second sentence.");
        assert_eq!(blocks[2].block_type, "text"); // unknown tag falls back
        assert_eq!(blocks[2].page_number, 2); // 1-based pages
        let indices: Vec<usize> = blocks.iter().map(|b| b.block_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn flat_reader_reads_text_files() {
        let mut file = tempfile::NamedTempFile::with_suffix(".csv").unwrap();
        writeln!(file, "name,value\nalpha,1\nbeta,2").unwrap();

        let blocks = FlatFileReader.parse(file.path()).await.unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].block_type, "text");
        assert!(blocks[0].content.contains("alpha,1"));
    }

    #[tokio::test]
    async fn flat_reader_rejects_image_formats() {
        let mut file = tempfile::NamedTempFile::with_suffix(".png").unwrap();
        file.write_all(&[0x89, 0x50, 0x4e, 0x47, 0xff, 0xfe]).unwrap();

        let err = FlatFileReader.parse(file.path()).await.unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedFormat(_)));
    }

    #[tokio::test]
    async fn flat_reader_rejects_binary_content() {
        let mut file = tempfile::NamedTempFile::with_suffix(".dat").unwrap();
        file.write_all(&[0x00, 0xff, 0xfe, 0x01]).unwrap();

        let err = FlatFileReader.parse(file.path()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Parse(_)));
    }
}
