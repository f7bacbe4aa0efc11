//! Default prompt templates used by the response synthesizer

use kbqa_core::PromptTemplate;

/// Prompt slot answering a query from retrieved context
pub const TEXT_QA_TEMPLATE_KEY: &str = "response_synthesizer:text_qa_template";
/// Prompt slot refining an earlier answer with more context
pub const REFINE_TEMPLATE_KEY: &str = "response_synthesizer:refine_template";

/// Placeholders the text QA slot fills in
pub(crate) const TEXT_QA_VARS: &[&str] = &["context_str", "query_str"];
/// Placeholders the refine slot fills in
pub(crate) const REFINE_VARS: &[&str] = &["query_str", "existing_answer", "context_msg"];

const QA_SYSTEM_PROMPT: &str = "You are an expert Q&A system that is trusted around the world.\n\
Always answer the query using the provided context information, and not prior knowledge.\n\
Some rules to follow:\n\
1. Never directly reference the given context in your answer.\n\
2. Avoid statements like 'Based on the context, ...' or 'The context information ...' or anything along those lines.";

const TEXT_QA_PROMPT: &str = "Context information is below.\n\
---------------------\n\
{context_str}\n\
---------------------\n\
Given the context information and not prior knowledge, answer the query.\n\
Query: {query_str}\n\
Answer: ";

const REFINE_PROMPT: &str = "The original query is as follows: {query_str}\n\
We have provided an existing answer: {existing_answer}\n\
We have the opportunity to refine the existing answer (only if needed) with some more context below.\n\
------------\n\
{context_msg}\n\
------------\n\
Given the new context, refine the original answer to better answer the query. \
If the context isn't useful, return the original answer.\n\
Refined Answer: ";

/// Company help-desk assistant prompt ("公司小蜜")
pub const DEFAULT_ASSISTANT_PROMPT: &str = "你叫公司小蜜，是公司的答疑机器人。你需要仔细阅读参考信息，然后回答大家提出的问题。\
注意事项：\n\
1. 根据上下文信息而非先验知识来回答问题。\n\
2. 如果是工具咨询类问题，请务必给出下载地址链接。\n\
3. 如果员工部门查询问题，请务必注意有同名员工的情况，可能有2个、3个甚至更多同名的人\n\
以下是参考信息。\
---------------------\n\
{context_str}\n\
---------------------\n\
问题：{query_str}\n。\
回答：";

pub fn default_text_qa_prompt() -> PromptTemplate {
    PromptTemplate::new(TEXT_QA_PROMPT).with_system(QA_SYSTEM_PROMPT)
}

pub fn default_refine_prompt() -> PromptTemplate {
    PromptTemplate::new(REFINE_PROMPT)
}
