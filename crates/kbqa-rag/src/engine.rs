//! Retriever-backed query engine and its responses

use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;

use futures::StreamExt;

use kbqa_core::{ChatModel, Error, NodeWithScore, PromptTemplate, Result, TokenStream, collect_stream};

use crate::index::VectorStoreIndex;
use crate::prompts::{REFINE_TEMPLATE_KEY, REFINE_VARS, TEXT_QA_TEMPLATE_KEY, TEXT_QA_VARS};
use crate::retriever::{DEFAULT_SIMILARITY_TOP_K, VectorIndexRetriever};
use crate::synthesizer::{DEFAULT_MAX_CONTEXT_CHARS, ResponseMode, ResponseSynthesizer};

/// Query engine settings
#[derive(Debug, Clone)]
pub struct QueryEngineOptions {
    pub similarity_top_k: usize,
    pub streaming: bool,
    pub response_mode: ResponseMode,
    pub max_context_chars: usize,
}

impl Default for QueryEngineOptions {
    fn default() -> Self {
        Self {
            similarity_top_k: DEFAULT_SIMILARITY_TOP_K,
            streaming: true,
            response_mode: ResponseMode::Compact,
            max_context_chars: DEFAULT_MAX_CONTEXT_CHARS,
        }
    }
}

/// Retrieves context for a query and synthesizes the answer
pub struct RetrieverQueryEngine<'a> {
    retriever: VectorIndexRetriever<'a>,
    synthesizer: ResponseSynthesizer,
}

impl<'a> RetrieverQueryEngine<'a> {
    pub fn new(retriever: VectorIndexRetriever<'a>, synthesizer: ResponseSynthesizer) -> Self {
        Self { retriever, synthesizer }
    }

    pub(crate) fn from_options(
        index: &'a VectorStoreIndex,
        llm: Arc<dyn ChatModel>,
        options: QueryEngineOptions,
    ) -> Self {
        let synthesizer = ResponseSynthesizer::new(llm)
            .with_streaming(options.streaming)
            .with_response_mode(options.response_mode)
            .with_max_context_chars(options.max_context_chars);
        Self::new(index.as_retriever(options.similarity_top_k), synthesizer)
    }

    pub fn retriever(&self) -> &VectorIndexRetriever<'a> {
        &self.retriever
    }

    pub fn synthesizer(&self) -> &ResponseSynthesizer {
        &self.synthesizer
    }

    pub async fn retrieve(&self, query: &str) -> Result<Vec<NodeWithScore>> {
        self.retriever.retrieve(query).await
    }

    /// Retrieve context and start answering
    pub async fn query(&self, query: &str) -> Result<StreamingResponse> {
        let source_nodes = self.retrieve(query).await?;
        let stream = self.synthesizer.synthesize(query, &source_nodes).await?;
        Ok(StreamingResponse { stream, source_nodes })
    }

    /// Prompt templates by slot key
    pub fn get_prompts(&self) -> BTreeMap<String, PromptTemplate> {
        BTreeMap::from([
            (TEXT_QA_TEMPLATE_KEY.to_string(), self.synthesizer.text_qa_template().clone()),
            (REFINE_TEMPLATE_KEY.to_string(), self.synthesizer.refine_template().clone()),
        ])
    }

    /// Replace prompt templates by slot key.
    ///
    /// Every entry is checked before any is applied: unknown keys and
    /// templates using placeholders the slot cannot fill are rejected.
    pub fn update_prompts<I>(&mut self, prompts: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, PromptTemplate)>,
    {
        let prompts: Vec<(String, PromptTemplate)> = prompts.into_iter().collect();
        for (key, template) in &prompts {
            let allowed = match key.as_str() {
                TEXT_QA_TEMPLATE_KEY => TEXT_QA_VARS,
                REFINE_TEMPLATE_KEY => REFINE_VARS,
                other => return Err(Error::Prompt(format!("Unknown prompt key '{}'", other))),
            };
            let vars = template.template_vars()?;
            if let Some(unknown) = vars.iter().find(|v| !allowed.contains(&v.as_str())) {
                return Err(Error::Prompt(format!(
                    "Template for '{}' uses unknown placeholder '{{{}}}' (allowed: {})",
                    key,
                    unknown,
                    allowed.join(", ")
                )));
            }
            if key == TEXT_QA_TEMPLATE_KEY && !vars.iter().any(|v| v == "context_str") {
                tracing::warn!("Text QA template has no {{context_str}}; retrieved context will not reach the model");
            }
        }

        for (key, template) in prompts {
            if key == TEXT_QA_TEMPLATE_KEY {
                self.synthesizer.set_text_qa_template(template);
            } else {
                self.synthesizer.set_refine_template(template);
            }
        }
        Ok(())
    }
}

/// An answer arriving as text chunks, with the nodes it was built from
pub struct StreamingResponse {
    stream: TokenStream,
    pub source_nodes: Vec<NodeWithScore>,
}

impl StreamingResponse {
    pub fn new(stream: TokenStream, source_nodes: Vec<NodeWithScore>) -> Self {
        Self { stream, source_nodes }
    }

    /// Print chunks to stdout as they arrive and return the full text
    pub async fn print_response_stream(self) -> Result<String> {
        self.print_response_stream_to(&mut io::stdout()).await
    }

    /// Write chunks to `writer` as they arrive, flushing after each one
    pub async fn print_response_stream_to<W: Write>(mut self, writer: &mut W) -> Result<String> {
        let mut text = String::new();
        while let Some(chunk) = self.stream.next().await {
            let chunk = chunk?;
            writer.write_all(chunk.as_bytes())?;
            writer.flush()?;
            text.push_str(&chunk);
        }
        Ok(text)
    }

    /// Collect the whole answer without printing
    pub async fn get_response(self) -> Result<Response> {
        let response = collect_stream(self.stream).await?;
        Ok(Response {
            response,
            source_nodes: self.source_nodes,
        })
    }
}

/// A complete answer
#[derive(Debug, Clone)]
pub struct Response {
    pub response: String,
    pub source_nodes: Vec<NodeWithScore>,
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.response)
    }
}
