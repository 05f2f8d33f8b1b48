mod config;
mod context;
mod embedder;
mod llm;
mod retriever;
mod server;
mod speech;
mod utils;
mod vector_db;

use anyhow::Result;
use config::{Command, Config};
use context::AppContext;
use std::io::Write;
use std::sync::Arc;
use tracing::{error, warn};
use utils::normalize_query;

async fn ask_once(ctx: &AppContext, question: &str) -> Result<()> {
    let Some(question) = normalize_query(question) else {
        anyhow::bail!("question is empty");
    };
    let answer = ctx.answer(&question).await?;
    println!("{}\n", answer.text);
    Ok(())
}

async fn ask_interactive(ctx: &AppContext) -> Result<()> {
    println!("Enter your questions (Ctrl+D to exit)");

    loop {
        let mut query = String::new();
        print!("> ");
        std::io::stdout().flush()?;

        if std::io::stdin().read_line(&mut query)? == 0 {
            break; // EOF (Ctrl+D)
        }

        let Some(query) = normalize_query(&query) else {
            continue;
        };

        match ctx.answer(&query).await {
            Ok(answer) => println!("{}\n", answer.text),
            Err(e) => error!("{e}"),
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let (config, dotenv_error) = Config::load();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    if let Some(e) = dotenv_error {
        warn!(error = %e, "failed to load .env, continuing with the process environment");
    }

    let ctx = Arc::new(AppContext::from_config(&config)?);

    match &config.command {
        None | Some(Command::Serve) => {
            server::serve(ctx, &config.bind_address(), &config.index_page).await
        }
        Some(Command::Ask {
            question: Some(question),
        }) => ask_once(&ctx, question).await,
        Some(Command::Ask { question: None }) => ask_interactive(&ctx).await,
    }
}
