//! Interactive NPC dialogue session.
//!
//! Builds the world stores, selects a generative backend from
//! configuration, and runs a read-eval loop where each line of input is one
//! dialogue turn. With `--trace`, every pipeline stage is recorded and a
//! live viewer is served on localhost.

mod config;

use clap::Parser;
use config::AppConfig;
use dialogue_core::index::HttpSimilarityIndex;
use dialogue_core::{
    serve_viewer, DialoguePipeline, FactStore, KnowledgeGraph, NpcProfile, TraceRecorder,
};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "World dialogue system - NPC chat session")]
struct Args {
    /// Path to configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Backend provider override ("gemini" or "lmstudio")
    #[arg(long)]
    provider: Option<String>,

    /// Record pipeline traces and serve the live viewer
    #[arg(long)]
    trace: bool,

    /// Trace viewer port (overrides config)
    #[arg(long)]
    viewer_port: Option<u16>,
}

fn create_sample_npc() -> NpcProfile {
    NpcProfile {
        name: "Aldric".to_string(),
        age: 45,
        location: "The Crooked Tavern, Port Valor".to_string(),
        profession: "Tavern Keeper".to_string(),
        traits: vec![
            "observant".to_string(),
            "gruff".to_string(),
            "curious".to_string(),
            "skeptical".to_string(),
        ],
        childhood_backstory: "Born to a fisherman's family in Port Valor. Spent youth \
            learning the docks and the people who sailed them. Lost his father to a \
            storm at sea when he was twelve."
            .to_string(),
        adult_backstory: "Inherited the Crooked Tavern from his uncle at 25. Has run it \
            for twenty years, making it a hub for sailors, merchants, and adventurers. \
            Has heard countless stories and seen the rise and fall of fortunes."
            .to_string(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(provider) = args.provider {
        config.backend.provider = provider;
    }
    if let Some(port) = args.viewer_port {
        config.trace.viewer_port = port;
    }

    let backend = llm::backend_from_config(&config.backend)?;

    let index = Arc::new(HttpSimilarityIndex::new(&config.index.base_url));
    let graph = Arc::new(KnowledgeGraph::load(
        &config.world.entities,
        &config.world.edges,
    )?);
    let facts = Arc::new(FactStore::load(&config.world.facts, index)?);
    if let Err(e) = facts.build_index().await {
        warn!("failed to seed the similarity index: {e}");
    }

    let trace = if args.trace {
        Arc::new(TraceRecorder::to_dir(&config.trace.output_dir)?)
    } else {
        Arc::new(TraceRecorder::disabled())
    };
    if trace.is_enabled() {
        let recorder = trace.clone();
        let port = config.trace.viewer_port;
        tokio::spawn(async move {
            if let Err(e) = serve_viewer(recorder, port).await {
                warn!("trace viewer stopped: {e}");
            }
        });
    }

    let pipeline = DialoguePipeline::new(graph, facts, backend, trace);
    let npc = create_sample_npc();

    println!("{}", "=".repeat(60));
    println!("World Dialogue System - NPC Chat Session");
    println!("{}", "=".repeat(60));
    println!("(Type 'quit' or 'exit' to end the session)");
    println!("(Type 'clear' to clear conversation history)");
    println!("{}", "=".repeat(60));
    println!();
    println!("You are speaking with: {}\n", npc.name);

    let mut conversation_history = String::new();
    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        print!("You: ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next() else {
            break;
        };
        let user_input = line?.trim().to_string();

        if user_input.is_empty() {
            continue;
        }
        match user_input.to_lowercase().as_str() {
            "quit" | "exit" => {
                println!("Goodbye!");
                break;
            }
            "clear" => {
                conversation_history.clear();
                println!("[Conversation history cleared]");
                continue;
            }
            _ => {}
        }

        match pipeline
            .run_turn(&npc, &user_input, &conversation_history)
            .await
        {
            Ok(response) => {
                println!("\n{}: {response}\n", npc.name);
                conversation_history
                    .push_str(&format!("Human: {user_input}\n{}: {response}\n\n", npc.name));
            }
            Err(e) => {
                println!("Error: {e}");
                println!("Please try again.\n");
            }
        }
    }

    Ok(())
}
