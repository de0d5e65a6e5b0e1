//! Operator console.
//!
//! Reads line commands from stdin while the server runs: list known
//! repositories, inspect one repository's object store, request orderly
//! shutdown.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::server::Server;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Repos,
    Objects(String),
    Shutdown,
    Help,
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next(), parts.next()) {
            (Some("repos"), None, _) => Some(ConsoleCommand::Repos),
            (Some("objects"), Some(repo), None) => Some(ConsoleCommand::Objects(repo.to_string())),
            (Some("shutdown"), None, _) | (Some("quit"), None, _) => Some(ConsoleCommand::Shutdown),
            (Some("help"), None, _) | (None, _, _) => Some(ConsoleCommand::Help),
            _ => None,
        }
    }
}

/// Run the console until shutdown is requested or stdin closes.
pub async fn run(server: Arc<Server>) -> std::io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    print_help();
    while let Some(line) = lines.next_line().await? {
        match ConsoleCommand::parse(&line) {
            Some(ConsoleCommand::Repos) => {
                let names = server.manager().names().await;
                if names.is_empty() {
                    println!("no repositories yet");
                }
                for name in names {
                    println!("{name}");
                }
            }
            Some(ConsoleCommand::Objects(name)) => match server.manager().get(&name).await {
                Some(managed) => match managed.repo.store().list() {
                    Ok(ids) => {
                        println!("{} object(s) in {name}", ids.len());
                        for id in ids {
                            println!("  {id}");
                        }
                    }
                    Err(e) => eprintln!("failed to list {name}: {e}"),
                },
                None => eprintln!("unknown repository: {name}"),
            },
            Some(ConsoleCommand::Shutdown) => {
                println!("shutting down; in-flight sessions will finish");
                server.shutdown();
                break;
            }
            Some(ConsoleCommand::Help) => print_help(),
            None => eprintln!("unrecognized command: {line}"),
        }
    }
    Ok(())
}

fn print_help() {
    println!("console commands:");
    println!("  repos            list known repositories");
    println!("  objects <repo>   list a repository's stored objects");
    println!("  shutdown         stop accepting connections and drain");
    println!("  help             show this message");
}
