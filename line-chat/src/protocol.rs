use std::{fmt, io};

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// Command words a client may send, in the order `help` advertises them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Msg,
    PrivMsg,
    Login,
    Users,
    Joke,
    Help,
}

impl Command {
    pub const ALL: [Command; 6] = [
        Command::Msg,
        Command::PrivMsg,
        Command::Login,
        Command::Users,
        Command::Joke,
        Command::Help,
    ];

    /// Command words are matched case-sensitively.
    pub fn from_word(word: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|command| command.as_str() == word)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Command::Msg => "msg",
            Command::PrivMsg => "privmsg",
            Command::Login => "login",
            Command::Users => "users",
            Command::Joke => "joke",
            Command::Help => "help",
        }
    }
}

/// An inbound line split once on its first space.
///
/// `args` is everything after that space, untouched. Handlers that need more
/// structure split it further themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Line<'a> {
    pub command: &'a str,
    pub args: Option<&'a str>,
}

impl<'a> Line<'a> {
    pub fn split(line: &'a str) -> Self {
        match line.split_once(' ') {
            Some((command, args)) => Line {
                command,
                args: Some(args),
            },
            None => Line {
                command: line,
                args: None,
            },
        }
    }
}

/// Usernames are non-empty runs of ASCII letters and digits.
// Stricter than `[A-Za-z0-9]*`: the empty name is rejected as well.
pub fn is_valid_username(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Successful server replies and delivered messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    LoginOk,
    MsgOk { recipients: usize },
    Users(Vec<String>),
    Supported(Vec<String>),
    Joke(String),
    Msg { sender: String, text: String },
    PrivMsg { sender: String, text: String },
}

impl Response {
    pub fn supported() -> Self {
        Response::Supported(
            Command::ALL
                .iter()
                .map(|command| command.as_str().to_string())
                .collect(),
        )
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::LoginOk => f.write_str("loginok"),
            Response::MsgOk { recipients } => write!(f, "msgok {recipients}"),
            Response::Users(names) => write_list(f, "users", names),
            Response::Supported(commands) => write_list(f, "supported", commands),
            Response::Joke(text) => write!(f, "joke {text}"),
            Response::Msg { sender, text } => write!(f, "msg {sender} {text}"),
            Response::PrivMsg { sender, text } => write!(f, "privmsg {sender} {text}"),
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, word: &str, items: &[String]) -> fmt::Result {
    f.write_str(word)?;
    for item in items {
        write!(f, " {item}")?;
    }
    Ok(())
}

/// Per-request failures reported back to the offending peer.
///
/// The `Display` form of each variant is the exact line put on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("loginerr username already in use")]
    UsernameTaken,
    #[error("loginerr incorrect username format")]
    IncorrectUsernameFormat,
    #[error("msgerr incorrect recipient")]
    IncorrectRecipient,
    #[error("msgerr unauthorized")]
    Unauthorized,
    #[error("cmderr command not supported")]
    CommandNotSupported,
}

impl ProtocolError {
    const ALL: [ProtocolError; 5] = [
        ProtocolError::UsernameTaken,
        ProtocolError::IncorrectUsernameFormat,
        ProtocolError::IncorrectRecipient,
        ProtocolError::Unauthorized,
        ProtocolError::CommandNotSupported,
    ];
}

/// Outcome of one dispatched request.
pub type Reply = Result<Response, ProtocolError>;

pub fn encode_reply(reply: &Reply) -> String {
    match reply {
        Ok(response) => response.to_string(),
        Err(error) => error.to_string(),
    }
}

/// Decodes a server line. Returns `None` for lines this protocol does not define.
pub fn decode_reply(line: &str) -> Option<Reply> {
    if let Some(error) = ProtocolError::ALL
        .into_iter()
        .find(|error| error.to_string() == line)
    {
        return Some(Err(error));
    }

    let Line { command, args } = Line::split(line);
    let response = match command {
        "loginok" => Response::LoginOk,
        "msgok" => Response::MsgOk {
            recipients: args?.trim().parse().ok()?,
        },
        "users" => Response::Users(split_words(args)),
        "supported" => Response::Supported(split_words(args)),
        "joke" => Response::Joke(args.unwrap_or_default().to_string()),
        "msg" | "privmsg" => {
            let (sender, text) = split_sender(args?);
            if command == "msg" {
                Response::Msg { sender, text }
            } else {
                Response::PrivMsg { sender, text }
            }
        }
        _ => return None,
    };
    Some(Ok(response))
}

fn split_words(args: Option<&str>) -> Vec<String> {
    args.unwrap_or_default()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

fn split_sender(args: &str) -> (String, String) {
    match args.split_once(' ') {
        Some((sender, text)) => (sender.to_string(), text.to_string()),
        None => (args.to_string(), String::new()),
    }
}

/// Reads protocol lines from a buffered byte stream.
///
/// Partially received bytes live in the reader, not in the pending future, so
/// a `next_line` call dropped by `select!` loses nothing. Invalid UTF-8 is
/// replaced with U+FFFD rather than failing the read.
#[derive(Debug)]
pub struct LineReader<R> {
    reader: R,
    buffer: Vec<u8>,
}

impl<R> LineReader<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: Vec::new(),
        }
    }

    /// Reads the next non-blank line, without its terminator. `None` means EOF.
    ///
    /// Cancel safe.
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        loop {
            let bytes = self.reader.read_until(b'\n', &mut self.buffer).await?;
            if bytes == 0 && self.buffer.is_empty() {
                return Ok(None);
            }

            let line = String::from_utf8_lossy(&self.buffer)
                .trim_end_matches(LINE_ENDINGS)
                .to_string();
            self.buffer.clear();
            if line.is_empty() {
                continue;
            }

            return Ok(Some(line));
        }
    }
}

/// Writes one line, appends `\n`, and flushes so the peer sees it promptly.
pub async fn write_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut encoded = Vec::with_capacity(line.len() + 1);
    encoded.extend_from_slice(line.as_bytes());
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}
