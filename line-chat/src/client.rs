use anyhow::{Context, Result};
use tokio::{
    io::{self, AsyncWriteExt, BufReader, Stdin},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
};
use tracing::{info, warn};

use crate::{
    cli::ClientArgs,
    protocol::{
        Command, LineReader, ProtocolError, Reply, Response, decode_reply, write_line,
    },
};

pub async fn run(args: ClientArgs) -> Result<()> {
    let (mut reader, mut writer) = establish_connection(&args).await?;
    let mut pending_login = None;
    if let Some(username) = &args.username {
        write_line(&mut writer, &format!("{} {username}", Command::Login.as_str())).await?;
        pending_login = Some(username.clone());
    }

    let mut stdin = LineReader::new(BufReader::new(tokio::io::stdin()));

    run_client_loop(&mut reader, &mut writer, &mut stdin, &mut pending_login).await?;
    shutdown_connection(&mut writer).await;

    Ok(())
}

async fn establish_connection(
    args: &ClientArgs,
) -> Result<(LineReader<BufReader<OwnedReadHalf>>, OwnedWriteHalf)> {
    let stream = TcpStream::connect(args.server)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;

    info!("connected to {}", args.server);

    let (reader, writer) = stream.into_split();
    Ok((LineReader::new(BufReader::new(reader)), writer))
}

async fn run_client_loop(
    reader: &mut LineReader<BufReader<OwnedReadHalf>>,
    writer: &mut OwnedWriteHalf,
    stdin: &mut LineReader<BufReader<Stdin>>,
    pending_login: &mut Option<String>,
) -> Result<()> {
    loop {
        select! {
            server_line = reader.next_line() => {
                if !handle_server_line(server_line, pending_login).await? {
                    break;
                }
            }
            input = stdin.next_line() => {
                if !handle_stdin_input(input, writer, pending_login).await? {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c);
                break;
            }
        }
    }
    Ok(())
}

async fn handle_server_line(
    line: io::Result<Option<String>>,
    pending_login: &mut Option<String>,
) -> Result<bool> {
    let Some(line) = line? else {
        write_stdout("*** server closed the connection").await?;
        return Ok(false);
    };

    match decode_reply(&line) {
        Some(reply) => render_reply(reply, pending_login).await?,
        None => warn!(%line, "unsupported line from server"),
    }
    Ok(true)
}

/// What a line typed at the terminal asks for.
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Send { line: String, login: Option<String> },
    Quit,
    Ignore,
}

fn parse_input(text: &str) -> Input {
    let text = text.trim_end();
    if text.is_empty() {
        return Input::Ignore;
    }

    let Some(slash_command) = text.strip_prefix('/') else {
        return Input::Send {
            line: format!("{} {text}", Command::Msg.as_str()),
            login: None,
        };
    };

    let (word, rest) = slash_command
        .split_once(' ')
        .map_or((slash_command, None), |(word, rest)| (word, Some(rest)));
    let with_args = |command: Command| match rest {
        Some(rest) => format!("{} {rest}", command.as_str()),
        None => command.as_str().to_string(),
    };

    let send = |line: String| Input::Send { line, login: None };
    match word.to_ascii_lowercase().as_str() {
        "quit" => Input::Quit,
        "login" => Input::Send {
            line: with_args(Command::Login),
            login: rest.map(str::to_string),
        },
        "w" | "msg" => send(with_args(Command::PrivMsg)),
        "users" => send(with_args(Command::Users)),
        "joke" => send(with_args(Command::Joke)),
        "help" => send(with_args(Command::Help)),
        "raw" => send(rest.unwrap_or_default().to_string()),
        _ => send(format!("{} {text}", Command::Msg.as_str())),
    }
}

async fn handle_stdin_input(
    input: io::Result<Option<String>>,
    writer: &mut OwnedWriteHalf,
    pending_login: &mut Option<String>,
) -> Result<bool> {
    let Some(input) = input? else {
        return Ok(false);
    };

    match parse_input(&input) {
        Input::Ignore => Ok(true),
        Input::Quit => {
            write_stdout("*** leaving chat").await?;
            Ok(false)
        }
        Input::Send { line, login } => {
            if login.is_some() {
                *pending_login = login;
            }
            write_line(writer, &line).await?;
            Ok(true)
        }
    }
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

async fn shutdown_connection(writer: &mut OwnedWriteHalf) {
    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown client writer cleanly");
    }
}

async fn render_reply(reply: Reply, pending_login: &mut Option<String>) -> io::Result<()> {
    match reply {
        Ok(Response::LoginOk) => match pending_login.take() {
            Some(username) => write_stdout(&format!("*** logged in as {username}")).await,
            None => write_stdout("*** logged in").await,
        },
        Ok(Response::MsgOk { .. }) => Ok(()),
        Ok(Response::Users(names)) => {
            write_stdout(&format!("*** online: {}", names.join(", "))).await
        }
        Ok(Response::Supported(commands)) => {
            write_stdout(&format!("*** supported commands: {}", commands.join(" "))).await
        }
        Ok(Response::Joke(text)) => write_stdout(&format!("*** joke: {text}")).await,
        Ok(Response::Msg { sender, text }) => write_stdout(&format!("<{sender}> {text}")).await,
        Ok(Response::PrivMsg { sender, text }) => {
            write_stdout(&format!("*{sender}* {text}")).await
        }
        Err(error @ (ProtocolError::UsernameTaken | ProtocolError::IncorrectUsernameFormat)) => {
            pending_login.take();
            write_stderr(&format!("!!! {error}")).await
        }
        Err(error) => write_stderr(&format!("!!! {error}")).await,
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

async fn write_stderr(line: &str) -> io::Result<()> {
    let mut stderr = tokio::io::stderr();
    stderr.write_all(line.as_bytes()).await?;
    stderr.write_all(b"\n").await?;
    stderr.flush().await
}
