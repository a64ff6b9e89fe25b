use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use helpdesk_rag::config::{
    init_tracing, parse_origins, CorpusArgs, EmbeddingArgs, GenerationArgs,
    DEFAULT_ALLOWED_ORIGINS,
};
use helpdesk_rag::pipeline::HelpdeskPipeline;
use helpdesk_rag::service;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "helpdesk-api",
    about = "HTTP API answering IT helpdesk questions from similar historical tickets"
)]
struct ApiCli {
    /// Address to bind the HTTP server to (host:port).
    #[arg(long, env = "HELPDESK_BIND", default_value = "127.0.0.1:8000")]
    bind: String,

    /// Comma-separated browser origins allowed by CORS.
    #[arg(long, env = "HELPDESK_ALLOWED_ORIGINS", default_value = DEFAULT_ALLOWED_ORIGINS)]
    allowed_origins: String,

    #[command(flatten)]
    corpus: CorpusArgs,

    #[command(flatten)]
    embedding: EmbeddingArgs,

    #[command(flatten)]
    generation: GenerationArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = ApiCli::parse();
    let pipeline = Arc::new(
        HelpdeskPipeline::bootstrap(&cli.corpus, &cli.embedding, &cli.generation).await?,
    );
    let origins = parse_origins(&cli.allowed_origins);
    let app = service::router(Arc::clone(&pipeline), &origins)?;

    let addr: SocketAddr = cli
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", cli.bind))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, origins = ?origins, "helpdesk-api listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server shutdown")?;

    // the embedding client blocks on drop; release it off the runtime
    tokio::task::spawn_blocking(move || drop(pipeline))
        .await
        .context("failed to release pipeline")?;
    info!("helpdesk-api stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // no signal handler available; serve until the process is killed
        std::future::pending::<()>().await;
    }
}
