use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use client_core::{
    AccessGate, BoardEvent, BoardSync, ContentCache, ContentController, HttpContentSource,
};
use futures::StreamExt;
use remote_store::HttpStore;
use shared::domain::{Board, Column, ContentId, DocumentKey, TaskId};
use tokio_stream::wrappers::BroadcastStream;
use tracing::info;

mod config;

use config::{content_base_url, load_settings, Settings};

#[derive(Parser, Debug)]
struct Args {
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    passcode: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the current board.
    Board,
    /// Add a task to a column.
    Add {
        title: String,
        #[arg(long, default_value = "backlog")]
        column: Column,
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Move a task to a position in a column.
    Move {
        task_id: TaskId,
        column: Column,
        #[arg(default_value_t = 0)]
        index: usize,
    },
    /// Remove a task.
    Remove { task_id: TaskId },
    /// Fetch and print a knowledge-base article.
    Show { content_id: String },
    /// Follow board updates until interrupted.
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();

    let mut settings = load_settings();
    if let Some(server_url) = args.server_url {
        settings.server_url = server_url;
    }

    let gate = match &settings.passcode {
        Some(passcode) => AccessGate::with_passcode(passcode.clone()),
        None => AccessGate::open(),
    };
    if !gate.unlock(args.passcode.as_deref().unwrap_or_default()) {
        return Err(anyhow!("board is passcode-gated; pass --passcode"));
    }

    match args.command {
        Command::Show { content_id } => show_content(&settings, &content_id).await,
        command => {
            let store = HttpStore::connect(&settings.server_url)?;
            let sync = BoardSync::new(store, DocumentKey::new(settings.board_document.clone()));
            let board = sync.load().await?;
            info!(server_url = %settings.server_url, "connected to board server");
            run_board_command(&sync, board, command).await
        }
    }
}

async fn run_board_command(sync: &Arc<BoardSync>, board: Board, command: Command) -> Result<()> {
    match command {
        Command::Board => print_board(&board),
        Command::Add {
            title,
            column,
            tags,
        } => {
            let task = sync
                .add_task(title, tags.into_iter().collect(), column)
                .await?;
            println!("added {} to {}", task.id, task.status);
        }
        Command::Move {
            task_id,
            column,
            index,
        } => {
            let board = sync.move_task(task_id, column, index).await?;
            print_board(&board);
        }
        Command::Remove { task_id } => {
            sync.remove_task(task_id).await?;
            println!("removed {task_id}");
        }
        Command::Watch => watch_board(sync, board).await,
        Command::Show { .. } => unreachable!("handled before the board connects"),
    }
    Ok(())
}

async fn show_content(settings: &Settings, content_id: &str) -> Result<()> {
    let cache = Arc::new(ContentCache::new());
    let source = Arc::new(HttpContentSource::new(content_base_url(settings)));
    let controller = ContentController::new(cache, source);
    let mut events = controller.subscribe_events();

    let view = controller.request(Some(ContentId::new(content_id))).await;
    if view.is_loading {
        let _ = events.recv().await?;
    }

    let view = controller.snapshot().await;
    if let Some(error) = view.error {
        return Err(anyhow!("failed to load '{content_id}': {error}"));
    }
    let Some(content) = view.content else {
        return Err(anyhow!("no content for '{content_id}'"));
    };

    println!("# {}", content.title);
    if !content.tags.is_empty() {
        println!("[{}]", content.tags.join(", "));
    }
    println!();
    println!("{}", content.body);
    Ok(())
}

async fn watch_board(sync: &Arc<BoardSync>, initial: Board) {
    sync.start().await;
    print_board(&initial);
    println!("watching for board updates (ctrl-c to stop)");

    let mut events = BroadcastStream::new(sync.subscribe_events());
    while let Some(event) = events.next().await {
        match event {
            Ok(BoardEvent::Updated(board)) => print_board(&board),
            Ok(BoardEvent::PersistFailed { message }) => eprintln!("persist failed: {message}"),
            // Lagged; the next update reprints the whole board anyway.
            Err(_) => continue,
        }
    }
}

fn print_board(board: &Board) {
    for column in Column::ALL {
        let tasks = board.tasks_in(column);
        println!("{} ({})", column, tasks.len());
        for task in tasks {
            let tags = if task.tags.is_empty() {
                String::new()
            } else {
                let tags: Vec<_> = task.tags.iter().cloned().collect();
                format!(" ({})", tags.join(", "))
            };
            println!("  {}. {}{}  [{}]", task.position + 1, task.title, tags, task.id);
        }
    }
}
