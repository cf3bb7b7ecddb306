//! Canned-reply automation surface for running the server without a browser.
//!
//! ```json
//! {
//!   "replies": [{"contains": "ping", "reply": "pong"}],
//!   "default": "I am a fixture.",
//!   "reveal_after": 2,
//!   "chunks": 3
//! }
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use webchat_scheduler::{AutomationSurface, SurfaceError};

const QUESTION_MARKER: &str = "[问题]";

#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("failed to read fixture {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse fixture {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FixtureReply {
    pub contains: String,
    pub reply: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FixtureBook {
    #[serde(default)]
    pub replies: Vec<FixtureReply>,
    #[serde(default = "default_reply")]
    pub default: String,
    /// Samples after a submit that still show no reply.
    #[serde(default = "default_reveal_after")]
    pub reveal_after: u32,
    /// The reply grows over this many samples once it starts showing.
    #[serde(default = "default_chunks")]
    pub chunks: u32,
    /// `false` simulates a page without a chat input.
    #[serde(default = "default_accept_input")]
    pub accept_input: bool,
}

fn default_reply() -> String {
    "This is a fixture reply.".to_string()
}

fn default_reveal_after() -> u32 {
    2
}

fn default_chunks() -> u32 {
    1
}

fn default_accept_input() -> bool {
    true
}

impl Default for FixtureBook {
    fn default() -> Self {
        Self {
            replies: Vec::new(),
            default: default_reply(),
            reveal_after: default_reveal_after(),
            chunks: default_chunks(),
            accept_input: default_accept_input(),
        }
    }
}

impl FixtureBook {
    /// First reply whose `contains` occurs in the question, else the default.
    pub fn reply_for(&self, prompt: &str) -> &str {
        let question = question_part(prompt);
        self.replies
            .iter()
            .find(|entry| !entry.contains.is_empty() && question.contains(&entry.contains))
            .map(|entry| entry.reply.as_str())
            .unwrap_or(self.default.as_str())
    }
}

/// Text after the last `[问题]` marker of a flattened prompt.
fn question_part(prompt: &str) -> &str {
    prompt
        .rfind(QUESTION_MARKER)
        .map(|idx| prompt[idx + QUESTION_MARKER.len()..].trim())
        .unwrap_or(prompt)
}

#[derive(Default)]
struct FixtureState {
    reply: String,
    samples_since_submit: u32,
    submits: u64,
}

pub struct FixtureSurface {
    book: FixtureBook,
    state: Mutex<FixtureState>,
}

impl FixtureSurface {
    pub fn new(book: FixtureBook) -> Self {
        Self {
            book,
            state: Mutex::new(FixtureState::default()),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, FixtureError> {
        let raw = std::fs::read_to_string(path).map_err(|source| FixtureError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let book = serde_json::from_str(&raw).map_err(|source| FixtureError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(book))
    }

    pub fn book(&self) -> &FixtureBook {
        &self.book
    }

    pub fn submits(&self) -> u64 {
        self.state.lock().submits
    }
}

#[async_trait]
impl AutomationSurface for FixtureSurface {
    async fn submit(&self, prompt: &str) -> Result<bool, SurfaceError> {
        if !self.book.accept_input {
            return Ok(false);
        }
        let reply = self.book.reply_for(prompt).to_string();
        let mut state = self.state.lock();
        debug!(chars = reply.chars().count(), "fixture reply selected");
        state.reply = reply;
        state.samples_since_submit = 0;
        state.submits += 1;
        Ok(true)
    }

    async fn sample_reply(&self) -> Result<String, SurfaceError> {
        let mut state = self.state.lock();
        state.samples_since_submit = state.samples_since_submit.saturating_add(1);
        if state.samples_since_submit <= self.book.reveal_after {
            return Ok(String::new());
        }

        let chunks = self.book.chunks.max(1) as usize;
        let shown = (state.samples_since_submit - self.book.reveal_after) as usize;
        let total = state.reply.chars().count();
        let visible = (total * shown.min(chunks) + chunks - 1) / chunks;
        Ok(state.reply.chars().take(visible).collect())
    }

    fn name(&self) -> &str {
        "fixture"
    }
}
