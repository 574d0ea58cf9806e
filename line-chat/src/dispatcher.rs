use std::sync::Arc;

use tracing::{debug, info};

use crate::{
    jokes::JokeSource,
    protocol::{Command, Line, ProtocolError, Reply, Response, is_valid_username},
    registry::Registry,
    session::SessionState,
};

/// Interprets inbound lines against a session's login state.
///
/// Anything addressed to other sessions goes through the [`Registry`]; the
/// returned [`Reply`] is meant for the sender alone.
pub struct Dispatcher {
    registry: Arc<Registry>,
    jokes: Arc<dyn JokeSource>,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>, jokes: Arc<dyn JokeSource>) -> Self {
        Self { registry, jokes }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub async fn dispatch(&self, session: &mut SessionState, line: &str) -> Reply {
        let Line { command, args } = Line::split(line);

        match Command::from_word(command) {
            Some(Command::Login) => self.login(session, args).await,
            Some(Command::Msg) => self.public_message(session, args).await,
            Some(Command::PrivMsg) => self.private_message(session, args).await,
            Some(Command::Users) => Ok(Response::Users(self.registry.usernames().await)),
            Some(Command::Help) => Ok(Response::supported()),
            Some(Command::Joke) => Ok(Response::Joke(self.jokes.random_joke())),
            None => {
                debug!(session = session.id(), command, "unsupported command");
                Err(ProtocolError::CommandNotSupported)
            }
        }
    }

    async fn login(&self, session: &mut SessionState, args: Option<&str>) -> Reply {
        let username = args
            .filter(|name| is_valid_username(name))
            .ok_or(ProtocolError::IncorrectUsernameFormat)?;

        if !self.registry.try_claim(session.handle(), username).await {
            return Err(ProtocolError::UsernameTaken);
        }

        info!(
            session = session.id(),
            from = session.username(),
            to = username,
            "client logged in"
        );
        session.log_in(username.to_string());
        Ok(Response::LoginOk)
    }

    async fn public_message(&self, session: &SessionState, args: Option<&str>) -> Reply {
        let text = args.ok_or(ProtocolError::CommandNotSupported)?;

        let line = Response::Msg {
            sender: session.username().to_string(),
            text: text.to_string(),
        }
        .to_string();
        let recipients = self
            .registry
            .forward_to_all_except(session.id(), &line)
            .await;

        Ok(Response::MsgOk { recipients })
    }

    async fn private_message(&self, session: &SessionState, args: Option<&str>) -> Reply {
        if !session.is_logged_in() {
            return Err(ProtocolError::Unauthorized);
        }

        let (recipient, text) = args
            .and_then(|args| args.split_once(' '))
            .ok_or(ProtocolError::CommandNotSupported)?;

        let line = Response::PrivMsg {
            sender: session.username().to_string(),
            text: text.to_string(),
        }
        .to_string();
        if !self.registry.forward_to_one(recipient, &line).await {
            return Err(ProtocolError::IncorrectRecipient);
        }

        Ok(Response::MsgOk { recipients: 1 })
    }
}
