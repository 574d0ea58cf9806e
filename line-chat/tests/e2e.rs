use std::{path::Path, process::Stdio, time::Duration};

use anyhow::{Context, Result, anyhow};
use line_chat::protocol::{LineReader, write_line};
use tokio::{
    io::BufReader,
    process::{Child, ChildStdin, ChildStdout, Command},
    time::timeout,
};

const READ_TIMEOUT: Duration = Duration::from_secs(3);

#[tokio::test]
async fn cli_chat_end_to_end() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("line_chat");

    let mut server = Process::spawn(&binary, &["serve", "--listen", "127.0.0.1:0"], "info")?;
    let banner = server.next_line().await?;
    let (_, addr) = banner
        .split_once("chat server listening on ")
        .with_context(|| format!("unexpected server banner '{banner}'"))?;
    let addr = addr.trim().to_string();

    let mut alice = Process::client(&binary, &addr, "alice").await?;
    let mut bob = Process::client(&binary, &addr, "bob").await?;

    // Public messages reach everyone except the sender.
    alice.say("Hello from Alice").await?;
    assert_eq!(bob.next_line().await?, "<alice> Hello from Alice");

    // Private messages are tagged with the sender.
    bob.say("/w alice psst").await?;
    assert_eq!(alice.next_line().await?, "*bob* psst");

    alice.say("/users").await?;
    assert_eq!(alice.next_line().await?, "*** online: alice, bob");

    bob.say("/help").await?;
    assert_eq!(
        bob.next_line().await?,
        "*** supported commands: msg privmsg login users joke help"
    );

    for client in [&mut alice, &mut bob] {
        client.say("/quit").await?;
        assert_eq!(client.next_line().await?, "*** leaving chat");
        let status = timeout(READ_TIMEOUT, client.child.wait()).await??;
        assert!(status.success(), "client exited with {status}");
    }

    // The server keeps running after clients leave.
    server.child.kill().await?;
    Ok(())
}

/// A spawned `line_chat` process with piped stdio.
struct Process {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: LineReader<BufReader<ChildStdout>>,
}

impl Process {
    fn spawn(binary: &Path, args: &[&str], log_level: &str) -> Result<Self> {
        let mut child = Command::new(binary)
            .args(args)
            .env("RUST_LOG", log_level)
            .env("NO_COLOR", "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {args:?}"))?;
        let stdout = child.stdout.take().context("stdout not piped")?;

        Ok(Self {
            stdin: child.stdin.take(),
            stdout: LineReader::new(BufReader::new(stdout)),
            child,
        })
    }

    async fn client(binary: &Path, addr: &str, username: &str) -> Result<Self> {
        // Client logs share stdout with the chat, so keep them quiet.
        let mut client = Self::spawn(
            binary,
            &["client", "--server", addr, "--username", username],
            "warn",
        )?;
        let banner = client.next_line().await?;
        if banner != format!("*** logged in as {username}") {
            return Err(anyhow!("expected login banner for {username}, got '{banner}'"));
        }
        Ok(client)
    }

    async fn say(&mut self, line: &str) -> Result<()> {
        let stdin = self.stdin.as_mut().context("stdin closed")?;
        write_line(stdin, line)
            .await
            .with_context(|| format!("failed to type '{line}'"))
    }

    async fn next_line(&mut self) -> Result<String> {
        timeout(READ_TIMEOUT, self.stdout.next_line())
            .await
            .context("timed out waiting for output")??
            .context("process closed its stdout")
    }
}
