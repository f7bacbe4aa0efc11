//! Response synthesis over retrieved nodes

use std::sync::Arc;

use kbqa_core::{ChatMessage, ChatModel, MetadataMode, NodeWithScore, PromptTemplate, Result, TokenStream};

use crate::prompts::{default_refine_prompt, default_text_qa_prompt};
use crate::splitter::SentenceSplitter;

/// Answer returned when retrieval found nothing
pub const EMPTY_RESPONSE: &str = "Empty Response";

pub const DEFAULT_MAX_CONTEXT_CHARS: usize = 24_000;

/// How retrieved context is fed to the chat model
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseMode {
    /// Pack as many nodes as fit into each call
    #[default]
    Compact,
    /// One call per node, refining the answer each time
    Refine,
}

/// Turns a query and its retrieved nodes into an answer stream.
///
/// The first context chunk is answered with the text QA template, every
/// further chunk refines the previous answer. Only the last call streams.
pub struct ResponseSynthesizer {
    llm: Arc<dyn ChatModel>,
    text_qa_template: PromptTemplate,
    refine_template: PromptTemplate,
    streaming: bool,
    response_mode: ResponseMode,
    max_context_chars: usize,
}

impl ResponseSynthesizer {
    pub fn new(llm: Arc<dyn ChatModel>) -> Self {
        Self {
            llm,
            text_qa_template: default_text_qa_prompt(),
            refine_template: default_refine_prompt(),
            streaming: true,
            response_mode: ResponseMode::default(),
            max_context_chars: DEFAULT_MAX_CONTEXT_CHARS,
        }
    }

    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn with_response_mode(mut self, response_mode: ResponseMode) -> Self {
        self.response_mode = response_mode;
        self
    }

    /// Maximum characters of retrieved context sent in one call
    pub fn with_max_context_chars(mut self, max_context_chars: usize) -> Self {
        self.max_context_chars = max_context_chars.max(1);
        self
    }

    pub fn text_qa_template(&self) -> &PromptTemplate {
        &self.text_qa_template
    }

    pub fn refine_template(&self) -> &PromptTemplate {
        &self.refine_template
    }

    pub(crate) fn set_text_qa_template(&mut self, template: PromptTemplate) {
        self.text_qa_template = template;
    }

    pub(crate) fn set_refine_template(&mut self, template: PromptTemplate) {
        self.refine_template = template;
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub async fn synthesize(&self, query: &str, nodes: &[NodeWithScore]) -> Result<TokenStream> {
        if nodes.is_empty() {
            return Ok(single_chunk(EMPTY_RESPONSE.to_string()));
        }

        let chunks = self.context_chunks(nodes)?;
        let Some((last, earlier)) = chunks.split_last() else {
            return Ok(single_chunk(EMPTY_RESPONSE.to_string()));
        };
        tracing::debug!(
            nodes = nodes.len(),
            calls = chunks.len(),
            mode = ?self.response_mode,
            "synthesizing response"
        );

        let mut answer: Option<String> = None;
        for context in earlier {
            let messages = self.messages_for(query, context, answer.as_deref())?;
            answer = Some(self.llm.chat(&messages).await?.content);
        }

        let messages = self.messages_for(query, last, answer.as_deref())?;
        self.final_call(&messages).await
    }

    fn messages_for(
        &self,
        query: &str,
        context: &str,
        existing_answer: Option<&str>,
    ) -> Result<Vec<ChatMessage>> {
        match existing_answer {
            None => self
                .text_qa_template
                .format_messages(&[("context_str", context), ("query_str", query)]),
            Some(existing) => self.refine_template.format_messages(&[
                ("query_str", query),
                ("existing_answer", existing),
                ("context_msg", context),
            ]),
        }
    }

    async fn final_call(&self, messages: &[ChatMessage]) -> Result<TokenStream> {
        if self.streaming {
            self.llm.stream_chat(messages).await
        } else {
            let response = self.llm.chat(messages).await?;
            Ok(single_chunk(response.content))
        }
    }

    /// Node contents grouped into chunks of at most `max_context_chars`
    fn context_chunks(&self, nodes: &[NodeWithScore]) -> Result<Vec<String>> {
        let budget = self.max_context_chars;
        let splitter = SentenceSplitter::new(budget, 0)?;

        let mut pieces = Vec::new();
        for node in nodes {
            let text = node.node.content(MetadataMode::Llm);
            if text.chars().count() > budget {
                pieces.extend(splitter.split_text(&text));
            } else {
                pieces.push(text);
            }
        }

        if self.response_mode == ResponseMode::Refine {
            pieces.retain(|piece| !piece.trim().is_empty());
            return Ok(pieces);
        }

        let mut chunks = Vec::new();
        let mut current = String::new();
        let mut current_chars = 0;
        for piece in pieces {
            let piece_chars = piece.chars().count();
            if piece_chars == 0 {
                continue;
            }
            if !current.is_empty() && current_chars + 2 + piece_chars > budget {
                chunks.push(std::mem::take(&mut current));
                current_chars = 0;
            }
            if !current.is_empty() {
                current.push_str("\n\n");
                current_chars += 2;
            }
            current.push_str(&piece);
            current_chars += piece_chars;
        }
        if !current.is_empty() {
            chunks.push(current);
        }
        Ok(chunks)
    }
}

fn single_chunk(text: String) -> TokenStream {
    Box::pin(futures::stream::iter(vec![Ok(text)]))
}
