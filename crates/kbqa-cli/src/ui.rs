//! UI utilities for the CLI

use colored::*;
use crossterm::{
    cursor::MoveToColumn,
    event::{self, Event, KeyCode, KeyEventKind},
    queue,
    terminal::{Clear, ClearType, disable_raw_mode, enable_raw_mode, size},
};
use std::io::{self, IsTerminal, Write};

use kbqa_core::{NodeWithScore, Result};

const PROMPT: &str = "kbqa>";

/// Display startup banner
pub fn display_banner(chat_model: &str, persist_path: &str) {
    let terminal_width = size().map(|(w, _)| w as usize).unwrap_or(80);
    let inner = std::cmp::min(63, terminal_width.saturating_sub(6));
    let border = "─".repeat(inner + 2);

    let lines = [
        format!("{}", "KBQA - Knowledge Base Q&A".blue().bold()),
        String::new(),
        format!("Chat model: {}", chat_model),
        format!("Index:      {}", persist_path),
        String::new(),
        format!("{}", "v0.1.0 • Powered by DashScope".dimmed()),
    ];

    println!();
    println!("{}", format!("┌{}┐", border).blue());
    for line in lines {
        println!("{} {}", "│".blue(), line);
    }
    println!("{}", format!("└{}┘", border).blue());
    println!();
    println!(
        "{}",
        "💡 Tip: Ask a question about your documents, or type 'help' for commands".dimmed()
    );
    println!();
}

fn redraw(input: &str) -> Result<()> {
    let mut stdout = io::stdout();
    queue!(stdout, MoveToColumn(0), Clear(ClearType::CurrentLine))?;
    write!(stdout, "{} {}", PROMPT.green().bold(), input)?;
    stdout.flush()?;
    Ok(())
}

/// Read one line, with ↑/↓ history navigation when attached to a terminal
pub fn handle_input_with_history(history: &mut Vec<String>) -> Result<String> {
    if !io::stdin().is_terminal() {
        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            return Ok("exit".to_string());
        }
        let input = input.trim().to_string();
        if !input.is_empty() {
            history.push(input.clone());
        }
        return Ok(input);
    }

    enable_raw_mode()?;
    let result = read_line_raw(history);
    disable_raw_mode()?;
    println!();

    let input = result?;
    if !input.is_empty() {
        history.push(input.clone());
    }
    Ok(input)
}

fn read_line_raw(history: &[String]) -> Result<String> {
    let mut input = String::new();
    let mut history_index: Option<usize> = None;
    redraw(&input)?;

    loop {
        let Event::Key(key_event) = event::read()? else {
            continue;
        };
        if key_event.kind != KeyEventKind::Press {
            continue;
        }
        match key_event.code {
            KeyCode::Enter => return Ok(input.trim().to_string()),
            KeyCode::Esc => return Ok(String::new()),
            KeyCode::Char(c) => {
                input.push(c);
                redraw(&input)?;
            }
            KeyCode::Backspace => {
                input.pop();
                redraw(&input)?;
            }
            KeyCode::Up if !history.is_empty() => {
                let idx = match history_index {
                    None => history.len() - 1,
                    Some(idx) => idx.saturating_sub(1),
                };
                history_index = Some(idx);
                input = history[idx].clone();
                redraw(&input)?;
            }
            KeyCode::Down => {
                if let Some(idx) = history_index {
                    if idx + 1 < history.len() {
                        history_index = Some(idx + 1);
                        input = history[idx + 1].clone();
                    } else {
                        history_index = None;
                        input.clear();
                    }
                    redraw(&input)?;
                }
            }
            _ => {}
        }
    }
}

/// Display help message
pub fn print_help() {
    println!("{}", "Available commands:".bold());
    println!("  {} - Ask a question about the indexed documents", "<question>".green());
    println!("  {} - Show the sources used for the last answer", "sources".green());
    println!("  {} - Show this help message", "help".green());
    println!("  {} - Exit the application", "exit/quit".green());
    println!();
    println!("{}", "Examples:".bold());
    println!("  张三是哪个部门的？");
    println!("  Where can I download the VPN client?");
}

/// One line per source node: similarity score and file name
pub fn format_sources(nodes: &[NodeWithScore]) -> Vec<String> {
    nodes
        .iter()
        .map(|n| {
            let score = n
                .score
                .map(|s| format!("{:.3}", s))
                .unwrap_or_else(|| "-".to_string());
            let metadata = &n.node.metadata;
            let name = ["file_name", "file_path"]
                .iter()
                .find_map(|key| metadata.get(*key).and_then(|v| v.as_str()))
                .or(n.node.ref_doc_id.as_deref())
                .unwrap_or(&n.node.id);
            format!("{}  {}", score, name)
        })
        .collect()
}

pub fn print_sources(nodes: &[NodeWithScore]) {
    if nodes.is_empty() {
        println!("{}", "No sources retrieved".dimmed());
        return;
    }
    println!("{}", "Sources:".bold());
    for line in format_sources(nodes) {
        println!("  {} {}", "📄".cyan(), line);
    }
}
