use std::{net::SocketAddr, path::PathBuf};

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the chat server, accepting TCP connections.
    Serve(ServeArgs),
    /// Connect to a chat server from the terminal.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Socket address the server should bind to. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "127.0.0.1:1300")]
    pub listen: SocketAddr,

    /// JSON file with the jokes served by `joke`, either `["..."]` or `{"jokes": ["..."]}`.
    #[arg(long)]
    pub jokes: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Address of the chat server to connect to.
    #[arg(long, default_value = "127.0.0.1:1300")]
    pub server: SocketAddr,

    /// Log in with this username right after connecting.
    #[arg(long)]
    pub username: Option<String>,
}
