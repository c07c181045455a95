//! `ragflow chat` — Interactive question answering.
//!
//! Questions in one chat share a session, so follow-ups see earlier turns.
//! Ctrl+C cancels the question in flight without leaving the chat; at the
//! prompt it ends the chat.

use std::io::{self, Write};
use std::sync::Arc;

use ragflow_config::AppConfig;
use ragflow_core::{Query, SessionId};
use ragflow_workflow::{WorkflowEngine, WorkflowEvent};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio_util::sync::CancellationToken;

use crate::bootstrap;

#[derive(Debug, PartialEq)]
enum Input<'a> {
    Empty,
    Quit,
    Help,
    Clear,
    Ask(&'a str),
}

fn parse_input(line: &str) -> Input<'_> {
    let line = line.trim();
    match line {
        "" => Input::Empty,
        "quit" | "exit" => Input::Quit,
        "help" => Input::Help,
        "clear" => Input::Clear,
        _ => match line.strip_prefix("ask ") {
            Some(rest) => Input::Ask(rest.trim()),
            None => Input::Ask(line),
        },
    }
}

#[derive(Debug, PartialEq)]
enum Prompt {
    Line(String),
    Eof,
    Interrupted,
}

/// Wait for the next input line, or for `interrupt` to fire first.
async fn next_prompt<R>(lines: &mut Lines<R>, interrupt: impl Future<Output = io::Result<()>>) -> io::Result<Prompt>
where
    R: AsyncBufRead + Unpin,
{
    tokio::select! {
        line = lines.next_line() => Ok(line?.map_or(Prompt::Eof, Prompt::Line)),
        _ = interrupt => Ok(Prompt::Interrupted),
    }
}

pub async fn run(config: AppConfig, session: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let engine = bootstrap::build_engine(&config).await?;
    let stats = engine.index_stats().await;
    let session = session.map(SessionId::from).unwrap_or_default();

    println!();
    println!("  ╔══════════════════════════════════════════════╗");
    println!("  ║         RAGFlow — Interactive Mode           ║");
    println!("  ╚══════════════════════════════════════════════╝");
    println!();
    println!("  Provider:   {}", config.generator.provider);
    println!("  Model:      {}", engine.generator_model());
    println!("  Threshold:  {:.3}", config.retrieval.distance_threshold);
    println!("  Top-k:      {}", config.retrieval.top_k);
    println!("  Index:      {} documents, {} chunks", stats.documents, stats.chunks);
    println!("  Session:    {session}");
    println!();
    println!("  Type a question, or 'help' for commands.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("You > ");
        io::stdout().flush()?;

        // Once a question has run, SIGINT no longer kills the process
        let line = match next_prompt(&mut lines, tokio::signal::ctrl_c()).await? {
            Prompt::Line(line) => line,
            Prompt::Eof => break,
            Prompt::Interrupted => {
                println!();
                break;
            }
        };

        match parse_input(&line) {
            Input::Empty => continue,
            Input::Quit => break,
            Input::Help => print_help(),
            Input::Clear => {
                engine.reset_session(&session).await;
                println!("  Session history cleared.\n");
            }
            Input::Ask(text) => ask(&engine, &session, text).await?,
        }
    }

    println!();
    println!("  Goodbye!");
    println!();
    Ok(())
}

fn print_help() {
    println!();
    println!("  Commands:");
    println!("    ask <question>   Ask a question (or just type it)");
    println!("    clear            Forget this session's history");
    println!("    help             Show this help");
    println!("    quit | exit      Leave the chat");
    println!("  Ctrl+C cancels the question in progress, or leaves at the prompt.");
    println!();
}

async fn ask(engine: &Arc<WorkflowEngine>, session: &SessionId, text: &str) -> io::Result<()> {
    let query = match Query::new(text, session.clone()) {
        Ok(query) => query,
        Err(e) => {
            eprintln!("  [error] {e}\n");
            return Ok(());
        }
    };

    let cancel = CancellationToken::new();
    let mut rx = engine.stream(query, cancel.clone());
    let mut renderer = Renderer::default();
    let mut out = io::stdout();

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(event) => {
                    renderer.render(&event, &mut out)?;
                    out.flush()?;
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c(), if !cancel.is_cancelled() => cancel.cancel(),
        }
    }
    Ok(())
}

/// Writes workflow events as chat output.
#[derive(Default)]
struct Renderer {
    streaming: bool,
}

impl Renderer {
    fn render(&mut self, event: &WorkflowEvent, out: &mut impl Write) -> io::Result<()> {
        match event {
            // Step progress goes to the log
            WorkflowEvent::Step { .. } => {}
            WorkflowEvent::Documents { documents } => {
                writeln!(out, "\nRetrieved {} documents:", documents.len())?;
                for (i, doc) in documents.iter().enumerate() {
                    writeln!(out, "  {}. {} (distance: {:.3})", i + 1, doc.source, doc.score)?;
                    if let Some(preview) = &doc.preview {
                        writeln!(out, "     {}", preview.replace('\n', " "))?;
                    }
                }
            }
            WorkflowEvent::Token { content } => {
                if !self.streaming {
                    write!(out, "\n[assistant] ")?;
                    self.streaming = true;
                }
                write!(out, "{content}")?;
            }
            WorkflowEvent::Done { .. } => writeln!(out, "\n")?,
            WorkflowEvent::Failed { kind, message, partial, .. } => {
                if *partial {
                    writeln!(out, " …")?;
                }
                if kind == "cancelled" {
                    writeln!(out, "\n  [cancelled]\n")?;
                } else {
                    writeln!(out, "\n  [error] {message}\n")?;
                }
            }
        }
        Ok(())
    }
}
