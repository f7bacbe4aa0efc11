//! End-to-end tests for indexing, persistence and querying

#[cfg(test)]
mod rag_tests {
    use crate::{
        ChatMessage, ChatModel, DEFAULT_ASSISTANT_PROMPT, Document, Error, LocalHashEmbedding,
        PromptTemplate, QueryEngineOptions, REFINE_TEMPLATE_KEY, Result, SentenceSplitter,
        TEXT_QA_TEMPLATE_KEY, VectorStoreIndex, ask, create_index, create_query_engine,
        create_query_engine_with, indexing, indexing_with, load_index, update_prompt_template,
        DirectoryReader, EmbeddingModel, TextType,
    };
    use async_trait::async_trait;
    use insta::assert_json_snapshot;
    use kbqa_core::{ChatResponse, MessageRole, TokenStream};
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum CallKind {
        Chat,
        Stream,
    }

    /// Chat model that records what it was sent and answers from a script
    struct ScriptedChat {
        calls: Mutex<Vec<(CallKind, Vec<ChatMessage>)>>,
    }

    impl ScriptedChat {
        fn new() -> Arc<Self> {
            Arc::new(Self { calls: Mutex::new(Vec::new()) })
        }

        fn calls(&self) -> Vec<(CallKind, Vec<ChatMessage>)> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, kind: CallKind, messages: &[ChatMessage]) {
            self.calls.lock().unwrap().push((kind, messages.to_vec()));
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedChat {
        async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatResponse> {
            self.record(CallKind::Chat, messages);
            Ok(ChatResponse {
                content: "draft answer".to_string(),
                model_id: "scripted".to_string(),
                tokens_used: None,
            })
        }

        async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<TokenStream> {
            self.record(CallKind::Stream, messages);
            let chunks: Vec<Result<String>> = vec![Ok("final ".to_string()), Ok("answer".to_string())];
            Ok(Box::pin(futures::stream::iter(chunks)))
        }

        fn model_id(&self) -> &str {
            "scripted"
        }
    }

    /// Local embeddings that fail from the `fail_from`-th call on
    struct FailingEmbedding {
        inner: LocalHashEmbedding,
        calls: AtomicUsize,
        fail_from: usize,
    }

    #[async_trait]
    impl EmbeddingModel for FailingEmbedding {
        async fn embed(&self, texts: &[String], text_type: TextType) -> Result<Vec<Vec<f32>>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call >= self.fail_from {
                return Err(Error::Network("connection reset".to_string()));
            }
            self.inner.embed(texts, text_type).await
        }

        fn model_name(&self) -> &str {
            self.inner.model_name()
        }

        fn batch_size(&self) -> usize {
            self.inner.batch_size()
        }
    }

    fn write_docs(dir: &TempDir) -> std::path::PathBuf {
        let docs = dir.path().join("tree_docs");
        fs::create_dir_all(&docs).unwrap();
        fs::write(docs.join("finance.txt"), "张三在财务部工作。财务部负责报销和预算。").unwrap();
        fs::write(docs.join("tools.md"), "# Tools\n\nDownload the VPN client from the intranet portal.").unwrap();
        fs::write(docs.join("teams.txt"), "The platform team runs the Rust services and the build cluster.").unwrap();
        docs
    }

    fn local_embedding() -> Arc<LocalHashEmbedding> {
        Arc::new(LocalHashEmbedding::default())
    }

    async fn plain_index(texts: &[(&str, &str)]) -> VectorStoreIndex {
        let documents = texts
            .iter()
            .map(|(id, text)| Document::new(*id, *text))
            .collect();
        VectorStoreIndex::from_documents(documents, local_embedding(), SentenceSplitter::default())
            .await
            .unwrap()
    }

    fn user_text(messages: &[ChatMessage]) -> &str {
        &messages
            .iter()
            .find(|m| m.role == MessageRole::User)
            .unwrap()
            .content
    }

    #[tokio::test]
    async fn test_persisted_index_retrieves_the_same_nodes() {
        let dir = TempDir::new().unwrap();
        let docs = write_docs(&dir);
        let persist = dir.path().join("knowledge_base").join("tree_test");

        let built = indexing(&docs, &persist, local_embedding()).await.unwrap();
        let loaded = load_index(&persist, local_embedding()).unwrap();

        assert_eq!(loaded.index_id(), built.index_id());
        assert_eq!(loaded.node_count(), built.node_count());
        assert_eq!(built.node_count(), 3);

        for query in ["财务部负责什么？", "where do I download the VPN client", "Rust services"] {
            let a = built.as_retriever(2).retrieve(query).await.unwrap();
            let b = loaded.as_retriever(2).retrieve(query).await.unwrap();
            assert_eq!(a.len(), 2);
            assert_eq!(a.len(), b.len());
            for (x, y) in a.iter().zip(&b) {
                assert_eq!(x.node.id, y.node.id);
                assert_eq!(x.node.text, y.node.text);
                assert!((x.score.unwrap() - y.score.unwrap()).abs() < 1e-6);
            }
        }
    }

    #[tokio::test]
    async fn test_best_match_comes_first() {
        let dir = TempDir::new().unwrap();
        let index = create_index(write_docs(&dir), local_embedding()).await.unwrap();

        let hits = index.as_retriever(2).retrieve("download the VPN client").await.unwrap();
        assert!(hits[0].node.text.contains("VPN client"));
        assert!(hits[0].score >= hits[1].score);
        assert!(hits[0].node.metadata.contains_key("file_path"));
    }

    #[tokio::test]
    async fn test_load_with_different_embedding_model_fails() {
        let dir = TempDir::new().unwrap();
        let persist = dir.path().join("persist");
        indexing(write_docs(&dir), &persist, local_embedding()).await.unwrap();

        let err = load_index(&persist, Arc::new(LocalHashEmbedding::new(128))).unwrap_err();
        match err {
            Error::EmbeddingModelMismatch { expected, found } => {
                assert_eq!(expected, "local-hash-384");
                assert_eq!(found, "local-hash-128");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_paths_are_errors() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nowhere");

        assert!(matches!(
            create_index(&missing, local_embedding()).await,
            Err(Error::Reader(_))
        ));
        assert!(matches!(load_index(&missing, local_embedding()), Err(Error::Storage(_))));
    }

    #[tokio::test]
    async fn test_default_prompt_sends_system_and_context() {
        let index = plain_index(&[("a", "Alpha team owns the billing service.")]).await;
        let chat = ScriptedChat::new();
        let engine = create_query_engine(&index, chat.clone());

        let response = engine.query("Who owns billing?").await.unwrap();
        assert_eq!(response.source_nodes.len(), 1);
        assert_eq!(response.get_response().await.unwrap().response, "final answer");

        let calls = chat.calls();
        assert_eq!(calls.len(), 1);
        let (kind, messages) = &calls[0];
        assert_eq!(*kind, CallKind::Stream);
        assert_eq!(messages[0].role, MessageRole::System);
        assert!(user_text(messages).contains("Alpha team owns the billing service."));
        assert!(user_text(messages).contains("Query: Who owns billing?\nAnswer: "));
    }

    #[tokio::test]
    async fn test_update_prompt_template_changes_sent_text() {
        let index = plain_index(&[("a", "张三在财务部工作。")]).await;
        let chat = ScriptedChat::new();
        let engine = create_query_engine(&index, chat.clone());
        let engine = update_prompt_template(engine, DEFAULT_ASSISTANT_PROMPT).unwrap();

        assert_eq!(
            engine.get_prompts()[TEXT_QA_TEMPLATE_KEY].template(),
            DEFAULT_ASSISTANT_PROMPT
        );

        engine.query("张三在哪个部门？").await.unwrap().get_response().await.unwrap();

        let calls = chat.calls();
        let messages = &calls[0].1;
        assert_eq!(messages.len(), 1);
        assert!(messages[0].content.starts_with("你叫公司小蜜"));
        assert!(messages[0].content.contains("张三在财务部工作。"));
        assert!(messages[0].content.contains("问题：张三在哪个部门？"));
    }

    #[tokio::test]
    async fn test_update_prompts_is_validated_atomically() {
        let index = plain_index(&[("a", "text")]).await;
        let mut engine = create_query_engine(&index, ScriptedChat::new());
        let before = engine.get_prompts();
        assert_eq!(
            before.keys().collect::<Vec<_>>(),
            vec![REFINE_TEMPLATE_KEY, TEXT_QA_TEMPLATE_KEY]
        );

        let err = engine
            .update_prompts([
                (TEXT_QA_TEMPLATE_KEY.to_string(), PromptTemplate::new("{context_str} {query_str}")),
                ("response_synthesizer:summary_template".to_string(), PromptTemplate::new("x")),
            ])
            .unwrap_err();
        assert!(matches!(err, Error::Prompt(_)));
        assert_eq!(engine.get_prompts(), before);

        let err = engine
            .update_prompts([(
                REFINE_TEMPLATE_KEY.to_string(),
                PromptTemplate::new("{query_str} {context_str}"),
            )])
            .unwrap_err();
        assert!(err.to_string().contains("context_str"));

        assert!(update_prompt_template(engine, "{context_str").is_err());
    }

    #[tokio::test]
    async fn test_empty_index_answers_empty_response() {
        let index = plain_index(&[("blank", "   \n  ")]).await;
        assert_eq!(index.node_count(), 0);

        let chat = ScriptedChat::new();
        let engine = create_query_engine(&index, chat.clone());
        let response = engine.query("anything?").await.unwrap();

        assert!(response.source_nodes.is_empty());
        assert_eq!(response.get_response().await.unwrap().response, "Empty Response");
        assert!(chat.calls().is_empty());
    }

    #[tokio::test]
    async fn test_refine_when_context_exceeds_budget() {
        let index = plain_index(&[
            ("a", "Alpha team owns the billing service."),
            ("b", "Beta team owns the search service."),
        ])
        .await;
        let chat = ScriptedChat::new();
        let options = QueryEngineOptions { max_context_chars: 40, ..Default::default() };
        let engine = create_query_engine_with(&index, chat.clone(), options);

        let text = engine
            .query("Which team owns which service?")
            .await
            .unwrap()
            .get_response()
            .await
            .unwrap()
            .response;
        assert_eq!(text, "final answer");

        let calls = chat.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, CallKind::Chat);
        assert_eq!(calls[1].0, CallKind::Stream);
        assert!(user_text(&calls[0].1).starts_with("Context information is below."));
        let refine = user_text(&calls[1].1);
        assert!(refine.contains("We have provided an existing answer: draft answer"));
        assert!(refine.contains("The original query is as follows: Which team owns which service?"));
    }

    #[tokio::test]
    async fn test_non_streaming_engine_uses_one_shot_call() {
        let index = plain_index(&[("a", "Alpha team owns the billing service.")]).await;
        let chat = ScriptedChat::new();
        let options = QueryEngineOptions { streaming: false, ..Default::default() };
        let engine = create_query_engine_with(&index, chat.clone(), options);

        let mut out = Vec::new();
        let text = engine
            .query("Who owns billing?")
            .await
            .unwrap()
            .print_response_stream_to(&mut out)
            .await
            .unwrap();

        assert_eq!(text, "draft answer");
        assert_eq!(String::from_utf8(out).unwrap(), "draft answer");
        assert_eq!(chat.calls()[0].0, CallKind::Chat);
    }

    #[tokio::test]
    async fn test_ask_prints_answer() {
        let index = plain_index(&[("a", "Alpha team owns the billing service.")]).await;
        let chat = ScriptedChat::new();
        let engine = create_query_engine(&index, chat.clone());

        ask("Who owns billing?", &engine).await.unwrap();
        assert_eq!(chat.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_and_delete() {
        let mut index = plain_index(&[("a", "Alpha text."), ("b", "Beta text.")]).await;
        assert_eq!(index.node_count(), 2);

        let flags = index
            .refresh(vec![
                Document::new("a", "Alpha text."),
                Document::new("b", "Beta text, revised."),
                Document::new("c", "Gamma text."),
            ])
            .await
            .unwrap();
        assert_eq!(flags, vec![false, true, true]);
        assert_eq!(index.node_count(), 3);

        let docstore = &index.storage_context().docstore;
        let b_nodes = &docstore.ref_doc_info("b").unwrap().node_ids;
        assert_eq!(b_nodes.len(), 1);
        assert_eq!(docstore.get_node(&b_nodes[0]).unwrap().text, "Beta text, revised.");

        index.delete_ref_doc("a").unwrap();
        assert_eq!(index.node_count(), 2);
        assert_eq!(index.index_struct().unwrap().node_ids.len(), 2);
        assert!(index.storage_context().docstore.ref_doc_info("a").is_none());
    }

    #[tokio::test]
    async fn test_index_struct_snapshot() {
        let index = plain_index(&[("a", "Alpha text.")]).await;

        assert_json_snapshot!(index.index_struct().unwrap(), {
            ".index_id" => "[index_id]",
            ".node_ids[]" => "[node_id]",
            ".created_at" => "[created_at]",
        }, @r###"
        {
          "index_id": "[index_id]",
          "node_ids": [
            "[node_id]"
          ],
          "embed_model": "local-hash-384",
          "dimensions": 384,
          "created_at": "[created_at]"
        }
        "###);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_nodes() {
        let embed_model = Arc::new(FailingEmbedding {
            inner: LocalHashEmbedding::default(),
            calls: AtomicUsize::new(0),
            fail_from: 2,
        });
        let mut index = VectorStoreIndex::from_documents(
            vec![Document::new("a", "Alpha text.")],
            embed_model,
            SentenceSplitter::default(),
        )
        .await
        .unwrap();

        let err = index
            .refresh(vec![Document::new("a", "Alpha text, revised.")])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Network(_)));

        assert_eq!(index.node_count(), 1);
        assert_eq!(index.index_struct().unwrap().node_ids.len(), 1);
        let docstore = &index.storage_context().docstore;
        let node_ids = &docstore.ref_doc_info("a").unwrap().node_ids;
        assert_eq!(docstore.get_node(&node_ids[0]).unwrap().text, "Alpha text.");
    }

    #[tokio::test]
    async fn test_indexing_with_recursive_reader() {
        let dir = TempDir::new().unwrap();
        let docs = write_docs(&dir);
        fs::create_dir_all(docs.join("hr")).unwrap();
        fs::write(docs.join("hr").join("leave.txt"), "Annual leave requests go to HR.").unwrap();
        let persist = dir.path().join("persist");

        let flat = indexing(&docs, &persist, local_embedding()).await.unwrap();
        assert_eq!(flat.node_count(), 3);

        let reader = DirectoryReader::new(&docs).recursive(true);
        let nested = indexing_with(&reader, &persist, local_embedding()).await.unwrap();
        assert_eq!(nested.node_count(), 4);

        let loaded = load_index(&persist, local_embedding()).unwrap();
        assert_eq!(loaded.index_id(), nested.index_id());
        assert!(format!("{:?}", loaded).contains("local-hash-384"));
    }
}
