//! Tests for the terminal helpers

#[cfg(test)]
mod ui_tests {
    use crate::format_sources;
    use crate::logging::default_directive;
    use insta::assert_json_snapshot;
    use kbqa_core::{Document, NodeWithScore, TextNode};

    fn node(doc: Document, score: Option<f32>) -> NodeWithScore {
        NodeWithScore {
            node: TextNode::from_document_chunk("node-1", &doc, "chunk", 0, 5),
            score,
        }
    }

    #[test]
    fn test_format_sources_snapshot() {
        let nodes = vec![
            node(
                Document::new("d1", "text")
                    .with_metadata("file_name", "finance.txt")
                    .with_metadata("file_path", "/docs/finance.txt"),
                Some(0.87),
            ),
            node(Document::new("d2", "text").with_metadata("file_path", "/docs/tools.md"), Some(0.5)),
            node(Document::new("d3", "text"), None),
        ];

        assert_json_snapshot!(format_sources(&nodes), @r###"
        [
          "0.870  finance.txt",
          "0.500  /docs/tools.md",
          "-  d3"
        ]
        "###);
    }

    #[test]
    fn test_default_log_levels() {
        assert_eq!(default_directive(false), "error");
        assert_eq!(default_directive(true), "info");
    }
}
