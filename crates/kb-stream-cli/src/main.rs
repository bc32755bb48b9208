//! Command-line client for the streaming knowledge-base backend.

mod render;

use std::path::PathBuf;
use std::sync::Arc;

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser, Subcommand};
use kb_stream::prelude::*;
use kb_stream::{LogSettings, LogSink, init_logging};

use crate::render::Tail;

#[derive(Parser)]
#[command(name = "kb-stream", about = "Stream chat answers, product details and catalogs")]
struct Cli {
    /// Backend base URL; overrides KB_STREAM_BASE_URL.
    #[arg(long, global = true)]
    base_url: Option<String>,
    /// Log filter directives; falls back to RUST_LOG, then `info`.
    #[arg(long, global = true, env = "KB_STREAM_LOG_LEVEL")]
    log_level: Option<String>,
    /// Write JSON lines to this file instead of logging to stderr.
    #[arg(long, global = true, env = "KB_STREAM_JSON_LOG_PATH")]
    json_log: Option<PathBuf>,
    /// Set to false to turn logging off.
    #[arg(
        long,
        global = true,
        env = "KB_STREAM_OBSERVABILITY_ENABLED",
        default_value_t = true,
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    logging: bool,
    #[command(subcommand)]
    command: Command,
}

impl Cli {
    fn log_settings(&self) -> LogSettings {
        let sink = match (&self.json_log, self.logging) {
            (_, false) => LogSink::Disabled,
            (Some(path), true) => LogSink::JsonFile(path.clone()),
            (None, true) => LogSink::Console,
        };
        LogSettings {
            filter: self.log_level.clone(),
            sink,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Ask one or more questions in a single conversation.
    Chat {
        /// Style modifier sent with every question.
        #[arg(long)]
        modifier: Option<String>,
        #[arg(required = true)]
        questions: Vec<String>,
    },
    /// Stream the writeup for a product.
    Product { name: String },
    /// Stream a catalog of the given size.
    Catalog {
        #[arg(long, default_value_t = 6)]
        count: usize,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(&cli.log_settings())?;

    let mut config = ClientConfig::from_env()?;
    if let Some(base_url) = cli.base_url {
        config = config.base_url(base_url);
    }
    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(config.clone())?);

    match cli.command {
        Command::Chat {
            modifier,
            questions,
        } => chat(transport, &config, modifier, &questions).await?,
        Command::Product { name } => {
            let products = ProductDetailAdapter::new(transport, &config);
            if let Some(detail) = products.load(&name).await?.completed() {
                render::product(&name, &detail);
            }
        }
        Command::Catalog { count } => {
            let mut catalog = CatalogAdapter::new(transport, &config);
            if let Some(list) = catalog.load(count).await?.completed() {
                render::catalog(&list);
            }
        }
    }
    Ok(())
}

async fn chat(
    transport: Arc<dyn Transport>,
    config: &ClientConfig,
    modifier: Option<String>,
    questions: &[String],
) -> Result<(), ClientError> {
    let mut chat = ChatAdapter::new(transport, config);
    if let Some(modifier) = modifier {
        chat.set_prompt_modifier(modifier);
    }
    let mut updates = chat.subscribe();

    for question in questions {
        println!("> {question}");
        let mut tail = Tail::default();
        let reply = {
            let ask = chat.ask(question);
            tokio::pin!(ask);
            loop {
                tokio::select! {
                    result = &mut ask => break result?,
                    changed = updates.changed() => {
                        if changed.is_err() {
                            break ask.await?;
                        }
                        let view = updates.borrow_and_update().clone();
                        if let Some(reply) = view.projection.last_reply() {
                            tail.write(&reply.text);
                        }
                    }
                }
            }
        };
        if let Some(reply) = reply {
            tail.write(&reply.text);
            println!();
            if let Some(sources) = reply.sources.filter(|s| !s.is_empty()) {
                println!("Helpful links:");
                for source in sources {
                    println!("  {source}");
                }
            }
            if let Some(viz) = reply.visualization {
                println!("[{} chart] {}: {}", viz.chart_type, viz.title, viz.description);
                let rows = viz.data.into_iter().map(serde_json::Value::Object).collect();
                println!("{}", serde_json::Value::Array(rows));
            }
        }
        println!();
    }
    tracing::debug!(turns = chat.transcript().turns.len(), "conversation finished");
    Ok(())
}
