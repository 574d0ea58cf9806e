use std::{fs, path::Path};

use anyhow::{Context, Result, bail};
use rand::seq::SliceRandom;
use serde::Deserialize;

/// Supplies the text for `joke` replies. Called synchronously while dispatching.
pub trait JokeSource: Send + Sync {
    fn random_joke(&self) -> String;
}

const BUILTIN_JOKES: &[&str] = &[
    "There are 10 kinds of people: those who understand binary and those who don't.",
    "A TCP packet walks into a bar and says: I'd like a beer. The barman replies: You'd like a beer? Yes, a beer.",
    "Why do programmers prefer dark mode? Because light attracts bugs.",
    "I would tell you a UDP joke, but you might not get it.",
    "The best thing about a boolean is that even if you are wrong, you are only off by a bit.",
    "Knock knock. Race condition. Who's there?",
];

/// A fixed, non-empty list of one-line jokes.
#[derive(Debug, Clone)]
pub struct JokeBook {
    jokes: Vec<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JokeFile {
    List(Vec<String>),
    Object { jokes: Vec<String> },
}

impl JokeBook {
    pub fn builtin() -> Self {
        Self {
            jokes: BUILTIN_JOKES.iter().map(|joke| joke.to_string()).collect(),
        }
    }

    /// Builds a book from arbitrary text, flattening each joke onto one line.
    pub fn new<I>(jokes: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let jokes: Vec<String> = jokes
            .into_iter()
            .map(|joke| joke.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|joke| !joke.is_empty())
            .collect();

        if jokes.is_empty() {
            bail!("joke list is empty");
        }
        Ok(Self { jokes })
    }

    /// Loads either a JSON array of strings or an object with a `jokes` array.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read jokes from {}", path.display()))?;
        let parsed: JokeFile = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse jokes in {}", path.display()))?;
        let jokes = match parsed {
            JokeFile::List(jokes) | JokeFile::Object { jokes } => jokes,
        };
        Self::new(jokes).with_context(|| format!("no usable jokes in {}", path.display()))
    }

    pub fn len(&self) -> usize {
        self.jokes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jokes.is_empty()
    }
}

impl JokeSource for JokeBook {
    fn random_joke(&self) -> String {
        self.jokes
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_default()
    }
}
