//! Chat Trek terminal client
//!
//! A line-oriented client for the chat daemon. Every line typed is
//! broadcast to the room, except:
//!
//! ```text
//! /dm <name> <text>   private message to <name>
//! /quit               leave the chat room
//! ```
//!
//! # Usage
//!
//! ```text
//! trek                          # connect to 127.0.0.1:8080
//! trek --addr chat.example:8080
//! ```

use std::net::SocketAddr;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use trek_core::ChatMessage;
use trek_protocol::{decode_server_line, encode_line, ClientCommand, ServerMessage};

/// Chat Trek terminal client
#[derive(Parser, Debug)]
#[command(name = "trek", version, about)]
struct Args {
    /// Chat server address
    #[arg(short, long, default_value = "127.0.0.1:8080", env = "TREK_CHAT_ADDR")]
    addr: SocketAddr,
}

// ============================================================================
// Input
// ============================================================================

/// What a typed line asks for.
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Send(ClientCommand),
    Quit,
    Usage(&'static str),
    Nothing,
}

fn parse_input(line: &str) -> Input {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Input::Nothing;
    }

    if line.trim() == "/quit" {
        return Input::Quit;
    }

    if let Some(rest) = line.strip_prefix("/dm") {
        if !rest.is_empty() && !rest.starts_with(' ') {
            return Input::Send(ClientCommand::broadcast(line));
        }
        let mut parts = rest.trim_start().splitn(2, ' ');
        return match (parts.next(), parts.next()) {
            (Some(name), Some(text)) if !name.is_empty() && !text.trim().is_empty() => {
                Input::Send(ClientCommand::private(name, text))
            }
            _ => Input::Usage("usage: /dm <name> <text>"),
        };
    }

    Input::Send(ClientCommand::broadcast(line))
}

// ============================================================================
// Output
// ============================================================================

fn render(message: &ServerMessage) -> String {
    match message {
        ServerMessage::Welcome { name } => format!("*** Welcome aboard, {name}."),
        ServerMessage::Message(msg) => render_chat(msg),
        ServerMessage::Users { users } => {
            let names: Vec<&str> = users.iter().map(|n| n.as_str()).collect();
            format!("*** On deck: {}", names.join(", "))
        }
        ServerMessage::Error { error_code, message } => format!("!!! {message} ({error_code})"),
    }
}

fn render_chat(msg: &ChatMessage) -> String {
    match (msg.private, msg.from_me) {
        (true, true) => format!("[dm -> {}] {}", msg.recipient, msg.message),
        (true, false) => format!("[dm from {}] {}", msg.sender, msg.message),
        (false, true) => format!("<{} (you)> {}", msg.sender, msg.message),
        (false, false) => format!("<{}> {}", msg.sender, msg.message),
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive("trek=warn".parse()?))
        .init();

    let args = Args::parse();

    let stream = TcpStream::connect(args.addr)
        .await
        .with_context(|| format!("Failed to connect to {}", args.addr))?;
    let (reader, mut writer) = stream.into_split();

    let done = CancellationToken::new();

    let printer_done = done.clone();
    let printer = tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match decode_server_line(&line) {
                    Ok(message) => println!("{}", render(&message)),
                    Err(e) => warn!(error = %e, "Unreadable server line"),
                },
                Ok(None) => {
                    println!("*** Connection closed by server.");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Read failed");
                    break;
                }
            }
        }
        printer_done.cancel();
    });

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = done.cancelled() => break,
            line = stdin.next_line() => line.context("Failed to read stdin")?,
        };

        let Some(line) = line else {
            break;
        };

        match parse_input(&line) {
            Input::Send(command) => {
                let encoded = encode_line(&command)?;
                debug!(command = %encoded, "Sending");
                writer.write_all(encoded.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
            Input::Usage(text) => eprintln!("{text}"),
            Input::Quit => break,
            Input::Nothing => {}
        }
    }

    writer.shutdown().await.ok();
    printer.abort();
    Ok(())
}
