//! Interactive picker session for the terminal.
//!
//! Drives the [`Picker`](crate::picker::Picker) workflow over stdin
//! commands:
//!
//! ```text
//! ls              show the current listing
//! cd <N>          enter folder number N
//! up              go back one folder
//! sel <N>         toggle selection of entry number N
//! find <QUERY>    filter by name (empty to clear)
//! sort <KEY>      name_asc | name_desc | date_asc | date_desc
//! commit          create the knowledge base and trigger indexing
//! quit            exit
//! ```

use anyhow::{bail, Result};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::client::KbClient;
use crate::config::Config;
use crate::picker::{Picker, PickerState};

pub async fn run_browse(config: &Config, email: &str, password: &str) -> Result<()> {
    let client = KbClient::new(config)?;
    let mut picker = Picker::new(client);

    println!("Connecting as {}...", email);
    picker.connect(email, password).await;
    if let PickerState::Failed { message } = picker.state() {
        bail!("{}", message);
    }

    print_listing(&picker);

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    print!("> ");
    flush();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let (cmd, arg) = match line.split_once(' ') {
            Some((c, a)) => (c, a.trim()),
            None => (line, ""),
        };

        match cmd {
            "" => {}
            "ls" => print_listing(&picker),
            "cd" => {
                match entry_id(&picker, arg) {
                    Some(id) => picker.enter(&id).await,
                    None => println!("usage: cd <N>"),
                }
                report(&picker);
                print_listing(&picker);
            }
            "up" => {
                picker.back().await;
                report(&picker);
                print_listing(&picker);
            }
            "sel" => {
                match entry_id(&picker, arg) {
                    Some(id) => {
                        let selected = picker.toggle(&id);
                        println!(
                            "{} {}",
                            if selected { "selected" } else { "deselected" },
                            id
                        );
                        if let Some(w) = picker.warning() {
                            println!("warning: {}", w);
                        }
                    }
                    None => println!("usage: sel <N>"),
                }
            }
            "find" => {
                picker.set_query(arg);
                print_listing(&picker);
            }
            "sort" => match arg.parse() {
                Ok(key) => {
                    picker.set_sort(key);
                    print_listing(&picker);
                }
                Err(e) => println!("{}", e),
            },
            "commit" => {
                println!(
                    "Creating knowledge base from {} selected resource(s)...",
                    picker.selection().len()
                );
                picker.commit().await;
                match picker.state() {
                    PickerState::Done { kb_id, task_id } => {
                        println!("Knowledge base {} created.", kb_id);
                        match task_id {
                            Some(t) => println!("Indexing started (task {}).", t),
                            None => println!("Indexing triggered."),
                        }
                        return Ok(());
                    }
                    PickerState::Failed { message } => {
                        println!("{}", message);
                        println!("Selection kept; fix the issue and run commit again.");
                    }
                    _ => report(&picker),
                }
            }
            "quit" | "exit" | "q" => break,
            other => println!("unknown command: {}", other),
        }

        print!("> ");
        flush();
    }

    Ok(())
}

/// Resolves a 1-based listing index to a resource id.
fn entry_id(picker: &Picker<KbClient>, arg: &str) -> Option<String> {
    let idx: usize = arg.parse().ok()?;
    picker
        .visible()
        .get(idx.checked_sub(1)?)
        .map(|f| f.resource_id.clone())
}

fn report(picker: &Picker<KbClient>) {
    if let Some(e) = picker.last_error() {
        println!("{}", e);
    }
}

fn print_listing(picker: &Picker<KbClient>) {
    let crumb = picker.breadcrumb();
    if crumb.is_empty() {
        println!("/");
    } else {
        println!("/{}", crumb.replace(" / ", "/"));
    }

    for (i, f) in picker.visible().iter().enumerate() {
        let marker = if picker.selection().contains(&f.resource_id) {
            "*"
        } else {
            " "
        };
        let kind = if f.is_directory() { "d" } else { "-" };
        let status = f
            .status
            .map(|s| format!("{:?}", s).to_lowercase())
            .unwrap_or_default();
        println!("{:>3} {}{} {:<40} {}", i + 1, marker, kind, f.name(), status);
    }
    println!(
        "{} selected",
        picker.selection().len()
    );
}

fn flush() {
    use std::io::Write;
    let _ = std::io::stdout().flush();
}
