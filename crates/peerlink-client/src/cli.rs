//! Command-line interface definition and the interactive loop.
//!
//! This is replaceable frontend glue: it parses commands, calls the session
//! operations, and renders events. All protocol behavior lives in the
//! library modules.

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::client::ChatClient;
use crate::error::ClientResult;
use crate::event::{Event, EventReceiver};

/// peerlink - rendezvous group chat with direct peer-to-peer sessions
#[derive(Debug, Parser)]
#[command(name = "peerlink")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Nickname to register with the server
    pub nickname: String,

    /// Rendezvous server host
    #[arg(long, default_value = "127.0.0.1", env = "PEERLINK_SERVER_HOST")]
    pub server_host: String,

    /// Rendezvous server port
    #[arg(long, default_value_t = 8888, env = "PEERLINK_SERVER_PORT")]
    pub server_port: u16,

    /// Seconds to wait for an answer to a chat request
    #[arg(long, default_value_t = 30)]
    pub request_timeout: u64,

    /// Enable debug output
    #[arg(long, short = 'v')]
    pub debug: bool,
}

/// Runs the interactive prompt until the user quits or the server goes away.
pub async fn run_interactive(client: ChatClient, mut events: EventReceiver) -> ClientResult<()> {
    print_help();

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        tokio::select! {
            maybe_event = events.recv() => {
                match maybe_event {
                    Some(Event::ServerClosed) => {
                        println!("server connection lost");
                        break;
                    }
                    Some(event) => print_event(&event),
                    None => break,
                }
            }
            maybe_line = lines.next_line() => {
                match maybe_line? {
                    Some(line) => {
                        if !handle_command(&client, line.trim()).await {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    client.shutdown().await;
    Ok(())
}

fn print_help() {
    println!("commands:");
    println!("  users                 list known users (asks the server)");
    println!("  chat <name>           request a direct chat");
    println!("  msg <name> <text>     send a message on an open chat");
    println!("  close <name>          close an open chat");
    println!("  chats                 list open chats");
    println!("  broadcast <text>      send a message to everyone");
    println!("  quit                  leave");
}

/// Executes one command line. Returns false when the user wants to quit.
async fn handle_command(client: &ChatClient, line: &str) -> bool {
    if line.is_empty() {
        return true;
    }
    let mut parts = line.splitn(3, ' ');
    let command = parts.next().unwrap_or_default();

    match command {
        "quit" | "exit" => return false,
        "help" => print_help(),
        "users" => {
            if let Err(e) = client.refresh_users() {
                println!("error: {}", e);
            }
        }
        "chats" => {
            let chats = client.active_chats().await;
            if chats.is_empty() {
                println!("no open chats");
            } else {
                println!("open chats: {}", chats.join(", "));
            }
        }
        "chat" => match parts.next() {
            Some(peer) => {
                if let Err(e) = client.request_chat(peer).await {
                    println!("error: {}", e);
                } else {
                    println!("chat request sent to {} - waiting for connection...", peer);
                }
            }
            None => println!("usage: chat <name>"),
        },
        "msg" => match (parts.next(), parts.next()) {
            (Some(peer), Some(text)) => {
                if let Err(e) = client.send_chat_message(peer, text).await {
                    println!("error: {}", e);
                }
            }
            _ => println!("usage: msg <name> <text>"),
        },
        "close" => match parts.next() {
            Some(peer) => {
                if let Err(e) = client.close_chat(peer).await {
                    println!("error: {}", e);
                }
            }
            None => println!("usage: close <name>"),
        },
        "broadcast" => {
            let rest: Vec<&str> = parts.collect();
            if rest.is_empty() {
                println!("usage: broadcast <text>");
            } else if let Err(e) = client.broadcast(&rest.join(" ")) {
                println!("error: {}", e);
            }
        }
        _ => println!("unknown command (try 'help')"),
    }
    true
}

fn print_event(event: &Event) {
    match event {
        Event::Registered { message } => println!("✓ {}", message),
        Event::ServerError { message } => println!("server error: {}", message),
        Event::ServerClosed => println!("server connection lost"),
        Event::UserJoined { nickname } => println!("{} joined", nickname),
        Event::UserLeft { nickname } => println!("{} left", nickname),
        Event::UserList { nicknames } => {
            if nicknames.is_empty() {
                println!("no other users online");
            } else {
                println!("users online: {}", nicknames.join(", "));
            }
        }
        Event::Broadcast { sender, message } => println!("[BROADCAST] {}: {}", sender, message),
        Event::BroadcastSent => println!("broadcast sent"),
        Event::ChatRequested { peer } => println!("chat request from {}", peer),
        Event::ChatResponse { peer, accepted } => {
            if *accepted {
                println!("{} accepted the chat request", peer);
            } else {
                println!("{} declined the chat request", peer);
            }
        }
        Event::ChatRequestExpired { peer } => {
            println!("no answer from {}, request cancelled", peer);
        }
        Event::ChatDialFailed { peer, reason } => {
            println!("could not connect to {}: {}", peer, reason);
        }
        Event::ChatOpened { peer } => println!("chat with {} started", peer),
        Event::ChatClosed { peer } => println!("chat with {} ended", peer),
        Event::ChatMessage {
            peer,
            timestamp,
            message,
        } => match timestamp {
            Some(ts) => println!("[{}] ({}): {}", peer, ts, message),
            None => println!("[{}]: {}", peer, message),
        },
    }
}
