//! Documents, nodes and metadata rendering

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Which metadata keys to render in front of node text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataMode {
    /// Every metadata key
    All,
    /// Keys not excluded from embedding
    Embed,
    /// Keys not excluded from the LLM prompt
    Llm,
    /// Text only
    None,
}

/// A loaded source document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub excluded_embed_metadata_keys: Vec<String>,
    #[serde(default)]
    pub excluded_llm_metadata_keys: Vec<String>,
}

impl Document {
    /// Create a document with no metadata
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            metadata: Map::new(),
            excluded_embed_metadata_keys: Vec::new(),
            excluded_llm_metadata_keys: Vec::new(),
        }
    }

    /// Add a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Render text with its metadata header
    pub fn content(&self, mode: MetadataMode) -> String {
        render_content(
            &self.text,
            &self.metadata,
            &self.excluded_embed_metadata_keys,
            &self.excluded_llm_metadata_keys,
            mode,
        )
    }
}

/// A chunk of a document; the unit that gets embedded and retrieved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextNode {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub excluded_embed_metadata_keys: Vec<String>,
    #[serde(default)]
    pub excluded_llm_metadata_keys: Vec<String>,
    pub ref_doc_id: Option<String>,
    pub start_char_idx: Option<usize>,
    pub end_char_idx: Option<usize>,
}

impl TextNode {
    /// Create a node carrying over the document's metadata settings
    pub fn from_document_chunk(
        id: impl Into<String>,
        document: &Document,
        text: impl Into<String>,
        start_char_idx: usize,
        end_char_idx: usize,
    ) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            metadata: document.metadata.clone(),
            excluded_embed_metadata_keys: document.excluded_embed_metadata_keys.clone(),
            excluded_llm_metadata_keys: document.excluded_llm_metadata_keys.clone(),
            ref_doc_id: Some(document.id.clone()),
            start_char_idx: Some(start_char_idx),
            end_char_idx: Some(end_char_idx),
        }
    }

    /// Render text with its metadata header
    pub fn content(&self, mode: MetadataMode) -> String {
        render_content(
            &self.text,
            &self.metadata,
            &self.excluded_embed_metadata_keys,
            &self.excluded_llm_metadata_keys,
            mode,
        )
    }
}

/// A retrieved node and its similarity to the query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeWithScore {
    pub node: TextNode,
    pub score: Option<f32>,
}

fn render_content(
    text: &str,
    metadata: &Map<String, Value>,
    excluded_embed: &[String],
    excluded_llm: &[String],
    mode: MetadataMode,
) -> String {
    let excluded: &[String] = match mode {
        MetadataMode::All => &[],
        MetadataMode::Embed => excluded_embed,
        MetadataMode::Llm => excluded_llm,
        MetadataMode::None => return text.to_string(),
    };

    let header = metadata
        .iter()
        .filter(|(key, _)| !excluded.contains(key))
        .map(|(key, value)| match value {
            Value::String(s) => format!("{}: {}", key, s),
            other => format!("{}: {}", key, other),
        })
        .collect::<Vec<_>>()
        .join("\n");

    if header.is_empty() {
        text.to_string()
    } else {
        format!("{}\n\n{}", header, text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Document {
        let mut doc = Document::new("doc-1", "Reset your password from the portal.")
            .with_metadata("file_path", "/docs/it.txt")
            .with_metadata("file_size", 38);
        doc.excluded_embed_metadata_keys = vec!["file_size".to_string()];
        doc.excluded_llm_metadata_keys = vec!["file_path".to_string(), "file_size".to_string()];
        doc
    }

    #[test]
    fn test_content_modes() {
        let doc = sample();
        assert_eq!(
            doc.content(MetadataMode::All),
            "file_path: /docs/it.txt\nfile_size: 38\n\nReset your password from the portal."
        );
        assert_eq!(
            doc.content(MetadataMode::Embed),
            "file_path: /docs/it.txt\n\nReset your password from the portal."
        );
        assert_eq!(doc.content(MetadataMode::Llm), "Reset your password from the portal.");
        assert_eq!(doc.content(MetadataMode::None), "Reset your password from the portal.");
    }

    #[test]
    fn test_node_inherits_document_settings() {
        let doc = sample();
        let node = TextNode::from_document_chunk("node-1", &doc, "Reset your password", 0, 19);
        assert_eq!(node.ref_doc_id.as_deref(), Some("doc-1"));
        assert_eq!(node.metadata, doc.metadata);
        assert_eq!(node.content(MetadataMode::Llm), "Reset your password");
        assert_eq!(node.end_char_idx, Some(19));
    }
}
