use std::fs;
use std::path::Path;

use clap::Parser;
use futures_util::StreamExt;
use helpdesk_rag::config::{CorpusArgs, EmbeddingArgs, GenerationArgs};
use helpdesk_rag::{HelpdeskPipeline, LiveUnit, RelayError};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TICKET: &str = "Reset your password via the portal.";
const QUERY: &str = "I forgot my password";

#[derive(Parser, Debug)]
struct TestCli {
    #[command(flatten)]
    corpus: CorpusArgs,
    #[command(flatten)]
    embedding: EmbeddingArgs,
    #[command(flatten)]
    generation: GenerationArgs,
}

fn write_corpus(dir: &Path) -> String {
    let corpus = dir.join("tickets.jsonl");
    fs::write(&corpus, format!("{}\n", json!({ "text": TICKET }))).expect("write corpus");
    corpus.to_str().expect("utf8 path").to_string()
}

fn cli(server: &MockServer, corpus: &str, extra: &[&str]) -> TestCli {
    let embed_base = format!("{}/v1", server.uri());
    let generate = format!("{}/api/generate", server.uri());
    let mut args = vec![
        "test",
        "--corpus",
        corpus,
        "--embed-base-url",
        embed_base.as_str(),
        "--ollama-url",
        generate.as_str(),
        "--context-limit",
        "1000",
    ];
    args.extend_from_slice(extra);
    TestCli::try_parse_from(args).expect("parse args")
}

async fn mount_embeddings(server: &MockServer, expected_calls: Option<u64>) {
    let mock = Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "embedding": [0.25, 0.5, 1.0], "index": 0 }]
        })));
    let mock = match expected_calls {
        Some(calls) => mock.expect(calls),
        None => mock,
    };
    mock.mount(server).await;
}

async fn bootstrap(cli: &TestCli) -> HelpdeskPipeline {
    HelpdeskPipeline::bootstrap(&cli.corpus, &cli.embedding, &cli.generation)
        .await
        .expect("bootstrap")
}

// the embedding client is blocking and must not be dropped on an async worker
async fn release(pipeline: HelpdeskPipeline) {
    tokio::task::spawn_blocking(move || drop(pipeline))
        .await
        .expect("release pipeline");
}

#[tokio::test(flavor = "multi_thread")]
async fn answers_from_the_nearest_ticket() {
    let server = MockServer::start().await;
    mount_embeddings(&server, None).await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_string_contains(TICKET))
        .and(body_string_contains(QUERY))
        .respond_with(ResponseTemplate::new(200).set_body_string(concat!(
            "{\"response\":\"Use the \",\"done\":false}\n",
            "{\"response\":\"self-service portal.\",\"done\":false}\n",
            "{\"response\":\"\",\"done\":true,\"eval_count\":2}\n",
        )))
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().expect("tempdir");
    let corpus = write_corpus(dir.path());
    let pipeline = bootstrap(&cli(&server, &corpus, &[])).await;

    let history = pipeline.retriever().retrieve(QUERY).await;
    assert_eq!(history.text, TICKET);
    assert!(!history.truncated);

    let prompt = pipeline.prepare(QUERY).await;
    assert!(prompt.as_str().contains(TICKET));
    assert!(prompt.as_str().contains(QUERY));

    let reply = pipeline.reply(QUERY).await.expect("reply");
    assert_eq!(reply, "Use the self-service portal.");

    let units: Vec<LiveUnit> = pipeline.stream_reply(QUERY).await.collect().await;
    assert_eq!(
        units,
        vec![
            LiveUnit::Token("Use the ".to_string()),
            LiveUnit::Token("self-service portal.".to_string()),
            LiveUnit::End,
        ]
    );
    release(pipeline).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn unavailable_backend_yields_no_tokens() {
    let server = MockServer::start().await;
    mount_embeddings(&server, None).await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(503).set_body_string("model is loading"))
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().expect("tempdir");
    let corpus = write_corpus(dir.path());
    let pipeline = bootstrap(&cli(&server, &corpus, &[])).await;

    match pipeline.reply(QUERY).await {
        Err(err @ RelayError::Backend { .. }) => {
            assert!(err.to_string().contains("model is loading"));
        }
        other => panic!("expected backend error, got {other:?}"),
    }

    let units: Vec<LiveUnit> = pipeline.stream_reply(QUERY).await.collect().await;
    assert_eq!(units.len(), 1);
    assert!(matches!(&units[0], LiveUnit::Error(detail) if detail.contains("503")));
    release(pipeline).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_query_embedding_still_answers_without_history() {
    let server = MockServer::start().await;
    // corpus embedding succeeds once, the query embedding afterwards fails
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "embedding": [1.0, 0.0], "index": 0 }]
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(500).set_body_string("embedder crashed"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "{\"response\":\"Try restarting.\",\"done\":false}\n{\"done\":true}\n",
        ))
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().expect("tempdir");
    let corpus = write_corpus(dir.path());
    let pipeline = bootstrap(&cli(&server, &corpus, &[])).await;

    let history = pipeline.retriever().retrieve(QUERY).await;
    assert_eq!(history.text, "");
    let prompt = pipeline.prepare(QUERY).await;
    assert!(!prompt.as_str().contains(TICKET));
    assert_eq!(pipeline.reply(QUERY).await.expect("reply"), "Try restarting.");
    release(pipeline).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn embedding_cache_skips_reembedding_on_restart() {
    let server = MockServer::start().await;
    // one corpus batch on the first start, one validation embedding on the second
    mount_embeddings(&server, Some(2)).await;
    let dir = tempfile::tempdir().expect("tempdir");
    let corpus = write_corpus(dir.path());
    let cache = dir.path().join("embeddings.jsonl");
    let cache_arg = cache.to_str().expect("utf8 path").to_string();
    let cli = cli(&server, &corpus, &["--embedding-cache", cache_arg.as_str()]);

    let first = bootstrap(&cli).await;
    assert!(cache.exists());
    release(first).await;
    let second = bootstrap(&cli).await;
    release(second).await;
}
