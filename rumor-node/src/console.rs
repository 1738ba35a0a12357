//! Line-oriented UI: stdin commands in, chat and events out on stdout.

use std::path::PathBuf;

use rumor_core::OutboundAction;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedSender;

/// What the user asked the node to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserAction {
    Chat(String),
    Private { dest: String, text: String },
    Search(String),
    AddPeer(String),
    Download(String),
    Share(PathBuf),
    Origins,
    Quit,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("unknown command /{0} (try /msg, /search, /peer, /get, /share, /origins, /quit)")]
    Unknown(String),
}

/// Parse one input line. Blank lines yield `None`; anything not starting with `/` is chat.
pub fn parse_command(line: &str) -> Result<Option<UserAction>, CommandError> {
    let line = line.trim_end_matches(&['\r', '\n'][..]);
    if line.trim().is_empty() {
        return Ok(None);
    }
    let Some(command) = line.strip_prefix('/') else {
        return Ok(Some(UserAction::Chat(line.to_string())));
    };
    let (name, rest) = command.split_once(char::is_whitespace).unwrap_or((command, ""));
    let rest = rest.trim();
    let action = match name {
        "msg" => {
            let (dest, text) = rest
                .split_once(char::is_whitespace)
                .ok_or(CommandError::Usage("/msg <origin> <text>"))?;
            UserAction::Private {
                dest: dest.to_string(),
                text: text.trim_start().to_string(),
            }
        }
        "search" => UserAction::Search(required(rest, "/search <filename>")?),
        "peer" => UserAction::AddPeer(required(rest, "/peer <host:port>")?),
        "get" => UserAction::Download(required(rest, "/get <filename>")?),
        "share" => UserAction::Share(PathBuf::from(required(rest, "/share <path>")?)),
        "origins" => UserAction::Origins,
        "quit" => UserAction::Quit,
        other => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(Some(action))
}

fn required(arg: &str, usage: &'static str) -> Result<String, CommandError> {
    if arg.is_empty() {
        Err(CommandError::Usage(usage))
    } else {
        Ok(arg.to_string())
    }
}

/// Read stdin until EOF, forwarding parsed commands to the reactor.
pub async fn read_commands(tx: UnboundedSender<UserAction>) -> std::io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match parse_command(&line) {
            Ok(Some(action)) => {
                if tx.send(action).is_err() {
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => notice(e),
        }
    }
    Ok(())
}

/// Text shown for a core notification; `None` for actions the transport carries out.
pub fn render(action: &OutboundAction) -> Option<String> {
    match action {
        OutboundAction::SendDatagram(..) | OutboundAction::ResolveHost { .. } => None,
        OutboundAction::ChatReceived { origin, text } => Some(format!("<{origin}> {text}")),
        OutboundAction::PrivateReceived { origin, text } => Some(format!("[private] <{origin}> {text}")),
        OutboundAction::OriginDiscovered(origin) => Some(format!("* new origin {origin}")),
        OutboundAction::SearchMatch { filename, origin } => {
            Some(format!("* found {filename} at {origin} (/get {filename})"))
        }
        OutboundAction::TransferComplete { filename, data } => {
            Some(format!("* downloaded {filename} ({} bytes)", data.len()))
        }
        OutboundAction::TransferFailed { filename, reason } => {
            Some(format!("* download of {filename} failed: {reason}"))
        }
    }
}

pub fn show(action: &OutboundAction) {
    if let Some(line) = render(action) {
        println!("{line}");
    }
}

pub fn notice(msg: impl std::fmt::Display) {
    println!("* {msg}");
}
