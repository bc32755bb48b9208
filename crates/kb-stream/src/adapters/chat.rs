use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, warn};

use super::run_session;
use crate::config::ClientConfig;
use crate::errors::ClientError;
use crate::event::Visualization;
use crate::session::{Merge, Projection, StreamView};
use crate::transport::{StreamRequest, Transport};

/// Style hint sent with every question unless overridden.
pub const DEFAULT_PROMPT_MODIFIER: &str = "Informative, empathetic, and friendly";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Author {
    User,
    Bot,
}

/// One entry of the conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub author: Author,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visualization: Option<Visualization>,
}

impl ChatTurn {
    fn user(text: impl Into<String>) -> Self {
        Self {
            author: Author::User,
            text: text.into(),
            sources: None,
            visualization: None,
        }
    }

    fn bot() -> Self {
        Self {
            author: Author::Bot,
            text: String::new(),
            sources: None,
            visualization: None,
        }
    }
}

/// Whole conversation; the session grows its trailing bot turn.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub turns: Vec<ChatTurn>,
}

impl Transcript {
    /// Most recent bot-authored turn, if the transcript ends with one.
    pub fn last_reply(&self) -> Option<&ChatTurn> {
        self.turns.last().filter(|t| t.author == Author::Bot)
    }

    /// The trailing bot turn, opening one if the transcript ends with a user turn.
    fn reply_mut(&mut self) -> &mut ChatTurn {
        let needs_new = self
            .turns
            .last()
            .is_none_or(|turn| turn.author == Author::User);
        if needs_new {
            self.turns.push(ChatTurn::bot());
        }
        let last = self.turns.len() - 1;
        &mut self.turns[last]
    }
}

/// Cached full answer.
#[derive(Deserialize)]
pub struct CachedReply {
    #[serde(alias = "answer")]
    text: String,
    #[serde(default)]
    sources: Option<Vec<String>>,
    #[serde(default)]
    visualization: Option<Visualization>,
}

impl Projection for Transcript {
    type Snapshot = CachedReply;

    fn append_text(&mut self, text: &str) -> Merge {
        self.reply_mut().text.push_str(text);
        Merge::Applied
    }

    fn replace_sources(&mut self, sources: Vec<String>) -> Merge {
        self.reply_mut().sources = Some(sources);
        Merge::Applied
    }

    fn replace_visualization(&mut self, visualization: Visualization) -> Merge {
        self.reply_mut().visualization = Some(visualization);
        Merge::Applied
    }

    fn reset(&mut self) -> Merge {
        match self.turns.last_mut() {
            Some(turn) if turn.author == Author::Bot => {
                turn.text.clear();
                Merge::Applied
            }
            _ => Merge::ignored("no bot turn to reset"),
        }
    }

    fn replace(&mut self, snapshot: CachedReply) {
        let reply = self.reply_mut();
        reply.text = snapshot.text;
        reply.sources = snapshot.sources;
        reply.visualization = snapshot.visualization;
    }
}

/// Conversational adapter. Taking `&mut self` per question keeps at most one
/// session in flight.
pub struct ChatAdapter {
    transport: Arc<dyn Transport>,
    endpoint: String,
    prompt_modifier: String,
    view: watch::Sender<StreamView<Transcript>>,
}

impl ChatAdapter {
    pub fn new(transport: Arc<dyn Transport>, config: &ClientConfig) -> Self {
        Self {
            transport,
            endpoint: config.chat_url(),
            prompt_modifier: DEFAULT_PROMPT_MODIFIER.to_string(),
            view: watch::channel(StreamView::default()).0,
        }
    }

    /// Sets the free-text style modifier sent with later questions.
    pub fn set_prompt_modifier(&mut self, modifier: impl Into<String>) {
        self.prompt_modifier = modifier.into();
    }

    pub fn prompt_modifier(&self) -> &str {
        &self.prompt_modifier
    }

    /// Receives a snapshot after every change to the transcript.
    pub fn subscribe(&self) -> watch::Receiver<StreamView<Transcript>> {
        self.view.subscribe()
    }

    /// Latest published transcript.
    pub fn transcript(&self) -> Transcript {
        self.view.borrow().projection.clone()
    }

    /// Asks a question and streams the answer into the transcript.
    ///
    /// The user turn is appended before the request is issued and is never
    /// rolled back. On a transport error the bot turn stays absent or partial
    /// and the view is left `Streaming`; the error is returned to the caller.
    pub async fn ask(&mut self, question: &str) -> Result<Option<ChatTurn>, ClientError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(ClientError::Validation("question must not be empty".into()));
        }

        let mut transcript = self.transcript();
        let chat_history: Vec<String> = transcript.turns.iter().map(|t| t.text.clone()).collect();
        transcript.turns.push(ChatTurn::user(question));
        self.view.send_modify(|v| v.projection = transcript.clone());
        debug!(history = chat_history.len(), "asking question");

        let request = StreamRequest::post(
            self.endpoint.clone(),
            serde_json::json!({
                "question": question,
                "chat_history": chat_history,
                "prompt_modifier": self.prompt_modifier,
            }),
        );
        match run_session(self.transport.as_ref(), request, transcript, &self.view).await {
            Ok(transcript) => Ok(transcript.last_reply().cloned()),
            Err(err) => {
                warn!(error = %err, "chat stream failed");
                Err(err.into())
            }
        }
    }
}
