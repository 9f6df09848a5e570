//! Chat with the assistant in the terminal.

#[macro_use]
extern crate tracing;

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use rapport::core::{Notice, Role, TurnStatus};
use rapport::store::{
    ConversationRecord, DocumentStore, FileStore, InMemoryStore, MemoryRecord,
};
use rapport::{DirectoryLibrary, Session, SessionBuilder};
use rapport_gemini_model::{GeminiConfigBuilder, GeminiProvider};
use tokio::io::{self, AsyncBufReadExt};
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::sleep;

const BAR_CHAR: &str = "▎";

const HELP: &str = "\
/new            start a new conversation
/save           keep saving this conversation
/title <title>  rename this conversation
/delete         delete this conversation and start a new one
/history        list saved conversations
/load <n|id>    continue a saved conversation
/memories       list saved memories
/remember <m>   save a memory
/forget <n|id>  delete a memory
/quit           leave";

#[derive(Debug, Parser)]
#[command(version, about = "A relationship assistant that remembers the people in your life.")]
struct Args {
    /// API key of the Gemini API.
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    api_key: String,

    /// Base URL of the Gemini API, e.g. a proxy.
    #[arg(long, env = "GEMINI_BASE_URL")]
    base_url: Option<String>,

    /// The user chatting with the assistant.
    #[arg(long, env = "RAPPORT_USER", default_value = rapport::DEFAULT_USER_ID)]
    user: String,

    /// Directory holding profiles, people, memories and conversations.
    #[arg(long, env = "RAPPORT_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Directory holding the reference documents.
    #[arg(long, env = "RAPPORT_KNOWLEDGE_DIR", default_value = rapport::DEFAULT_KNOWLEDGE_DIR)]
    knowledge_dir: PathBuf,

    /// Keep everything in memory instead of the data directory.
    #[arg(long)]
    ephemeral: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let mut config = GeminiConfigBuilder::with_api_key(args.api_key);
    if let Some(base_url) = args.base_url {
        config = config.with_base_url(base_url);
    }
    let model_provider = GeminiProvider::new(config.build());

    let store: Arc<dyn DocumentStore> = if args.ephemeral {
        Arc::new(InMemoryStore::new())
    } else {
        std::fs::create_dir_all(&args.data_dir).with_context(|| {
            format!("cannot create {}", args.data_dir.display())
        })?;
        Arc::new(FileStore::new(&args.data_dir))
    };

    let (notice_tx, mut notice_rx) = mpsc::unbounded_channel();

    let mut session = SessionBuilder::with_model_provider(model_provider)
        .with_user(args.user)
        .with_store(store)
        .with_library(Arc::new(DirectoryLibrary::new(args.knowledge_dir)))
        .on_notice(move |notice| {
            notice_tx.send(notice).ok();
        })
        .build()
        .await;

    let progress_style = ProgressStyle::with_template("{spinner} {wide_msg}")?
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");

    println!("{} {}", "●".bright_cyan(), session.title().bold());
    println!("{}", "Type /help for commands.".dimmed());

    let mut listing: Vec<ConversationRecord> = vec![];
    let mut memories: Vec<MemoryRecord> = vec![];
    'outer: loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = read_line().await else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix('/') {
            let (command, argument) = command
                .split_once(char::is_whitespace)
                .map(|(command, argument)| (command, argument.trim()))
                .unwrap_or((command, ""));
            match command {
                "quit" | "exit" => break,
                "help" => println!("{HELP}"),
                "new" => {
                    if session.has_unsaved_messages() {
                        print!("Save this conversation first? [y/N]: ");
                        std::io::stdout().flush()?;
                        let Some(answer) = read_line().await else {
                            break 'outer;
                        };
                        if answer.trim().eq_ignore_ascii_case("y") {
                            report(session.enable_saving().await.map(|_| ()));
                        }
                    }
                    session.reset().await;
                    toast(&format!("New conversation: {}", session.title()));
                }
                "save" => match session.enable_saving().await {
                    Ok(true) => toast(&format!("Saving {}", session.title())),
                    Ok(false) => toast("This conversation is already saved."),
                    Err(err) => print_error(&err),
                },
                "title" => {
                    report(session.rename(argument).await);
                    toast(&format!("Title: {}", session.title()));
                }
                "delete" => {
                    report(session.delete_conversation().await);
                    toast(&format!("New conversation: {}", session.title()));
                }
                "history" => match session.conversations().await {
                    Ok(conversations) => {
                        print_listing(&conversations);
                        listing = conversations;
                    }
                    Err(err) => print_error(&err),
                },
                "load" => {
                    let id = argument
                        .parse::<usize>()
                        .ok()
                        .and_then(|n| listing.get(n.checked_sub(1)?))
                        .map(|conversation| conversation.id.clone())
                        .unwrap_or_else(|| argument.to_owned());
                    match session.load_conversation(&id).await {
                        Ok(()) => print_history(&session),
                        Err(err) => print_error(&err),
                    }
                }
                "memories" => match session.memories().await {
                    Ok(records) => {
                        print_memories(&records);
                        memories = records;
                    }
                    Err(err) => print_error(&err),
                },
                "remember" if !argument.is_empty() => {
                    match session.remember(argument).await {
                        Ok(record) => {
                            toast(&format!("💾 Memory saved: {}", record.text))
                        }
                        Err(err) => print_error(&err),
                    }
                }
                "forget" if !argument.is_empty() => {
                    let id = argument
                        .parse::<usize>()
                        .ok()
                        .and_then(|n| memories.get(n.checked_sub(1)?))
                        .map(|memory| memory.id.clone())
                        .unwrap_or_else(|| argument.to_owned());
                    match session.forget(&id).await {
                        Ok(()) => {
                            memories.retain(|memory| memory.id != id);
                            toast("Memory deleted.");
                        }
                        Err(err) => print_error(&err),
                    }
                }
                _ => println!("{HELP}"),
            }
            continue;
        }

        let mut stream = session.send_message(line).await;
        let mut progress_bar = None;
        let mut reply = ReplyPrinter::default();

        loop {
            if !reply.line_open {
                progress_bar
                    .get_or_insert_with(|| {
                        let progress_bar = ProgressBar::new_spinner();
                        progress_bar.set_style(progress_style.clone());
                        progress_bar.set_message("🤔 Thinking...");
                        progress_bar
                    })
                    .inc(1);
            }

            let sleep = sleep(Duration::from_millis(100));
            select! {
                biased;
                notice = notice_rx.recv() => {
                    let Some(notice) = notice else {
                        break 'outer;
                    };
                    finish_progress(&mut progress_bar);
                    reply.end_line();
                    print_notice(&notice);
                }
                text = stream.next() => {
                    let Some(text) = text else {
                        break;
                    };
                    finish_progress(&mut progress_bar);
                    reply.print(text)?;
                }
                _ = sleep => {}
            }
        }
        finish_progress(&mut progress_bar);

        let outcome = stream.finish().await;
        reply.end_line();
        while let Ok(notice) = notice_rx.try_recv() {
            print_notice(&notice);
        }
        if outcome.status != TurnStatus::Completed {
            debug!("turn ended with {:?}", outcome.status);
        }
        session.complete_turn(outcome).await;
        println!();
    }

    Ok(())
}

/// Prints a cumulative reply as it grows.
#[derive(Default)]
struct ReplyPrinter {
    printed: String,
    line_open: bool,
}

impl ReplyPrinter {
    fn print(&mut self, text: String) -> std::io::Result<()> {
        let mut stdout = std::io::stdout();
        let suffix = match text.strip_prefix(self.printed.as_str()) {
            Some(suffix) => suffix,
            None => {
                // The reply was replaced, e.g. by an apology.
                self.end_line();
                text.as_str()
            }
        };
        if !self.line_open {
            write!(stdout, "{}🤖 ", BAR_CHAR.bright_cyan())?;
            self.line_open = true;
        }
        write!(stdout, "{}", suffix.bright_white())?;
        stdout.flush()?;
        self.printed = text;
        Ok(())
    }

    fn end_line(&mut self) {
        if self.line_open {
            println!();
            self.line_open = false;
        }
    }
}

fn print_notice(notice: &Notice) {
    match notice {
        Notice::ToolExecuted { name, arguments } if name == "save_memory" => {
            let memory = arguments
                .get("memoria")
                .and_then(|value| value.as_str())
                .unwrap_or_default();
            toast(&format!("💾 Memory saved: {memory}"));
        }
        Notice::ToolExecuted { name, .. } => toast(&format!("Ran {name}")),
        Notice::UnknownTool { name } => {
            println!(
                "{}⚠️  The assistant asked for an unknown tool: {name}",
                BAR_CHAR.bright_yellow()
            );
        }
        Notice::BackendFailed { message } => {
            println!("{}{}", BAR_CHAR.bright_red(), message.red());
        }
        Notice::PassLimitExceeded { limit } => {
            println!(
                "{}⚠️  Gave up after {limit} model calls",
                BAR_CHAR.bright_yellow()
            );
        }
    }
}

fn print_listing(conversations: &[ConversationRecord]) {
    if conversations.is_empty() {
        toast("No saved conversations.");
        return;
    }
    for (n, conversation) in conversations.iter().enumerate() {
        println!(
            "{:>3}. {} {}",
            n + 1,
            conversation.title.bold(),
            conversation.start_time.dimmed()
        );
    }
}

fn print_memories(memories: &[MemoryRecord]) {
    if memories.is_empty() {
        toast("No saved memories.");
        return;
    }
    for (n, memory) in memories.iter().enumerate() {
        println!("{:>3}. {} {}", n + 1, memory.text, memory.recorded_at.dimmed());
    }
}

fn print_history(session: &Session) {
    println!("{} {}", "●".bright_cyan(), session.title().bold());
    for msg in session.transcript().visible() {
        match msg.role() {
            Role::User => println!("> {}", msg.content()),
            _ => println!(
                "{}🤖 {}",
                BAR_CHAR.bright_cyan(),
                msg.content().bright_white()
            ),
        }
    }
}

fn toast(message: &str) {
    println!("{}{}", BAR_CHAR.bright_green(), message.bright_white());
}

fn print_error(err: &dyn std::error::Error) {
    println!("{}{}", BAR_CHAR.bright_red(), err.red());
}

fn report<E: std::error::Error>(result: Result<(), E>) {
    if let Err(err) = result {
        print_error(&err);
    }
}

fn finish_progress(progress_bar: &mut Option<ProgressBar>) {
    if let Some(progress_bar) = progress_bar.take() {
        progress_bar.finish_and_clear();
    }
}

async fn read_line() -> Option<String> {
    let mut stdin = io::BufReader::new(io::stdin());
    let mut line = String::new();

    match stdin.read_line(&mut line).await {
        Ok(count) => {
            if count == 0 {
                return None;
            }
            Some(line)
        }
        Err(err) => {
            error!("error reading input: {}", err);
            None
        }
    }
}
