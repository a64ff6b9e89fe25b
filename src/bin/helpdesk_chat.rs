use std::io::Write;

use anyhow::{Context, Result};
use clap::Parser;
use futures_util::StreamExt;
use helpdesk_rag::adapters::{LiveUnit, ERROR_PREFIX};
use helpdesk_rag::config::{init_tracing, CorpusArgs, EmbeddingArgs, GenerationArgs};
use helpdesk_rag::pipeline::HelpdeskPipeline;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(
    name = "helpdesk-chat",
    about = "Console chat answering IT helpdesk questions from similar historical tickets"
)]
struct ChatCli {
    /// Answer a single question and exit instead of reading stdin
    #[arg(long)]
    query: Option<String>,

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
    let cli = ChatCli::parse();
    let pipeline =
        HelpdeskPipeline::bootstrap(&cli.corpus, &cli.embedding, &cli.generation).await?;

    if let Some(query) = cli.query.as_deref() {
        answer(&pipeline, query).await?;
    } else {
        println!("Helpdesk chat is ready.");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            print!("Ask a helpdesk question (or type 'exit'): ");
            std::io::stdout().flush()?;
            let Some(line) = lines.next_line().await.context("failed to read stdin")? else {
                break;
            };
            let query = line.trim();
            if query.eq_ignore_ascii_case("exit") {
                break;
            }
            if query.is_empty() {
                continue;
            }
            answer(&pipeline, query).await?;
        }
    }

    // the embedding client blocks on drop; release it off the runtime
    tokio::task::spawn_blocking(move || drop(pipeline))
        .await
        .context("failed to release pipeline")?;
    Ok(())
}

async fn answer(pipeline: &HelpdeskPipeline, query: &str) -> Result<()> {
    println!("\nQuery: {query}\n");
    let mut stdout = std::io::stdout();
    let mut units = pipeline.stream_reply(query).await;
    while let Some(unit) = units.next().await {
        match unit {
            LiveUnit::Token(text) => {
                stdout.write_all(text.as_bytes())?;
                stdout.flush()?;
            }
            LiveUnit::End => writeln!(stdout, "\n")?,
            LiveUnit::Error(detail) => eprintln!("\n{ERROR_PREFIX} {detail}\n"),
        }
    }
    Ok(())
}
