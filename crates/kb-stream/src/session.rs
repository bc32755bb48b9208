//! Per-request reconciliation of decoded events into a projection.
//!
//! A [`StreamSession`] owns the decoder buffer, the projection being built and
//! the Open/Closed flag for exactly one request. Events are applied in arrival
//! order; nothing is applied once the session is closed.

use futures::StreamExt as _;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::decoder::FrameDecoder;
use crate::errors::StreamError;
use crate::event::{Event, Visualization, parse_event};
use crate::transport::ByteStream;

/// Result of offering one event to a projection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Merge {
    /// The projection changed.
    Applied,
    /// The event does not apply to this projection; the reason is logged.
    Ignored(String),
}

impl Merge {
    pub fn ignored(reason: impl Into<String>) -> Self {
        Self::Ignored(reason.into())
    }
}

/// Accumulated result of a stream.
///
/// Each hook covers one row of the merge table and defaults to ignoring the
/// event, so a projection only implements the rows it takes part in.
pub trait Projection: Clone + Send + Sync + 'static {
    /// Shape a typeless cache-snapshot object must match to replace the
    /// projection.
    type Snapshot: DeserializeOwned;

    /// `Content`: append to the running text.
    fn append_text(&mut self, _text: &str) -> Merge {
        Merge::ignored("projection has no running text")
    }

    /// `SectionContent`: append to a named section.
    fn append_section(&mut self, section: &str, _text: &str) -> Merge {
        Merge::ignored(format!("projection has no section `{section}`"))
    }

    /// `Metadata`: replace the source list.
    fn replace_sources(&mut self, _sources: Vec<String>) -> Merge {
        Merge::ignored("projection has no sources")
    }

    /// `Visualization`: replace the chart.
    fn replace_visualization(&mut self, _visualization: Visualization) -> Merge {
        Merge::ignored("projection has no visualization")
    }

    /// `Initial`: clear append accumulators.
    fn reset(&mut self) -> Merge {
        Merge::ignored("projection has nothing to reset")
    }

    /// `CacheSnapshot`: wholesale replacement.
    fn replace(&mut self, snapshot: Self::Snapshot);
}

/// Why a session stopped accepting events.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    Stop,
    CacheSnapshot,
    EndOfStream,
    Transport,
}

/// Open/Closed flag of a session. No transition leaves `Closed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Closed(CloseReason),
}

/// What applying one event did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The projection changed and should be published.
    Mutated,
    /// The event was accepted but left the projection as is.
    Unchanged,
    /// The event was dropped as a protocol violation.
    Ignored(StreamError),
    /// The session closed on this event.
    Closed { mutated: bool },
    /// The session was already closed; the event was discarded.
    Discarded,
}

impl Outcome {
    fn mutated(&self) -> bool {
        matches!(self, Self::Mutated | Self::Closed { mutated: true })
    }
}

/// Reconciliation context for one in-flight request.
pub struct StreamSession<P: Projection> {
    id: uuid::Uuid,
    decoder: FrameDecoder,
    projection: P,
    state: SessionState,
    applied: u64,
}

impl<P: Projection> StreamSession<P> {
    /// Opens a session that grows `projection`.
    pub fn new(projection: P) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            decoder: FrameDecoder::default(),
            projection,
            state: SessionState::Open,
            applied: 0,
        }
    }

    pub fn id(&self) -> uuid::Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    /// Current projection. Only the session mutates it.
    pub fn projection(&self) -> &P {
        &self.projection
    }

    /// Hands the projection over once the session is done with it.
    pub fn into_projection(self) -> P {
        self.projection
    }

    /// Number of events that mutated the projection so far.
    pub fn applied(&self) -> u64 {
        self.applied
    }

    /// Applies one event following the merge table.
    pub fn apply(&mut self, event: Event) -> Outcome {
        if !self.is_open() {
            debug!(session_id = %self.id, kind = event.kind(), "event after close discarded");
            return Outcome::Discarded;
        }
        let kind = event.kind();
        let merge = match event {
            Event::Content(text) => self.projection.append_text(&text),
            Event::SectionContent { section, content } => {
                self.projection.append_section(&section, &content)
            }
            Event::Metadata { sources } => self.projection.replace_sources(sources),
            Event::Visualization(visualization) => {
                self.projection.replace_visualization(visualization)
            }
            Event::Initial => self.projection.reset(),
            Event::CacheSnapshot(object) => {
                let value = serde_json::Value::Object(object);
                return match serde_json::from_value::<P::Snapshot>(value) {
                    Ok(snapshot) => {
                        self.projection.replace(snapshot);
                        self.applied += 1;
                        self.close(CloseReason::CacheSnapshot);
                        Outcome::Closed { mutated: true }
                    }
                    Err(e) => {
                        let err = StreamError::protocol(format!(
                            "typeless object does not match the projection shape: {e}"
                        ));
                        warn!(session_id = %self.id, error = %err, "cache snapshot ignored");
                        Outcome::Ignored(err)
                    }
                };
            }
            Event::Stop => {
                self.close(CloseReason::Stop);
                return Outcome::Closed { mutated: false };
            }
        };
        match merge {
            Merge::Applied => {
                self.applied += 1;
                debug!(session_id = %self.id, kind, seq = self.applied, "event applied");
                Outcome::Mutated
            }
            Merge::Ignored(reason) => {
                debug!(session_id = %self.id, kind, %reason, "event ignored");
                Outcome::Ignored(StreamError::protocol(reason))
            }
        }
    }

    /// Decodes a chunk and applies every complete frame, calling `publish`
    /// after each mutation.
    pub fn push_chunk(&mut self, chunk: &[u8], publish: &mut dyn FnMut(&P)) {
        if !self.is_open() {
            return;
        }
        for frame in self.decoder.push_chunk(chunk) {
            self.apply_frame(&frame.data, publish);
            if !self.is_open() {
                break;
            }
        }
    }

    /// Flushes the decoder at end of stream and closes the session.
    pub fn finish(&mut self, publish: &mut dyn FnMut(&P)) {
        if !self.is_open() {
            return;
        }
        if let Some(frame) = self.decoder.finish() {
            self.apply_frame(&frame.data, publish);
        }
        self.close(CloseReason::EndOfStream);
    }

    /// Abandons the session after a transport failure. The projection keeps
    /// whatever was applied before the failure.
    pub fn fail(&mut self, err: &StreamError) {
        if self.is_open() {
            warn!(session_id = %self.id, error = %err, applied = self.applied, "stream abandoned");
            self.close(CloseReason::Transport);
        }
    }

    fn apply_frame(&mut self, payload: &str, publish: &mut dyn FnMut(&P)) {
        let event = match parse_event(payload) {
            Ok(Some(event)) => event,
            Ok(None) => return,
            Err(err) if err.is_recoverable() => {
                warn!(session_id = %self.id, error = %err, "frame skipped");
                return;
            }
            Err(err) => {
                self.fail(&err);
                return;
            }
        };
        if self.apply(event).mutated() {
            publish(&self.projection);
        }
    }

    fn close(&mut self, reason: CloseReason) {
        if self.is_open() {
            info!(session_id = %self.id, ?reason, applied = self.applied, "session closed");
            self.state = SessionState::Closed(reason);
        }
    }
}

/// Lifecycle phase shown alongside a published projection.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Streaming,
    Complete,
    Failed(String),
}

/// Snapshot published to subscribers.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamView<P> {
    pub projection: P,
    pub phase: Phase,
    /// Session that produced the projection, if any.
    pub session_id: Option<uuid::Uuid>,
}

impl<P: Default> Default for StreamView<P> {
    fn default() -> Self {
        Self {
            projection: P::default(),
            phase: Phase::Idle,
            session_id: None,
        }
    }
}

/// Drives `session` over `bytes` until it closes, publishing every mutation
/// to `view`.
///
/// Marks the view `Streaming` on entry and `Complete` when the session closes
/// normally. On a transport failure the session is abandoned, the view keeps
/// the partial projection and its phase is left to the caller.
pub async fn reconcile<P: Projection>(
    session: &mut StreamSession<P>,
    mut bytes: ByteStream,
    view: &watch::Sender<StreamView<P>>,
) -> Result<(), StreamError> {
    let session_id = session.id();
    view.send_modify(|v| {
        v.projection = session.projection().clone();
        v.phase = Phase::Streaming;
        v.session_id = Some(session_id);
    });
    let mut publish = |projection: &P| {
        view.send_modify(|v| v.projection = projection.clone());
    };

    while session.is_open() {
        match bytes.next().await {
            Some(Ok(chunk)) => session.push_chunk(&chunk, &mut publish),
            Some(Err(err)) => {
                session.fail(&err);
                return Err(err);
            }
            None => session.finish(&mut publish),
        }
    }

    view.send_modify(|v| v.phase = Phase::Complete);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, Default, PartialEq, serde::Deserialize)]
    struct Text {
        text: String,
        #[serde(default)]
        sources: Vec<String>,
    }

    impl Projection for Text {
        type Snapshot = Text;

        fn append_text(&mut self, text: &str) -> Merge {
            self.text.push_str(text);
            Merge::Applied
        }

        fn replace_sources(&mut self, sources: Vec<String>) -> Merge {
            self.sources = sources;
            Merge::Applied
        }

        fn replace(&mut self, snapshot: Text) {
            *self = snapshot;
        }
    }

    fn feed(session: &mut StreamSession<Text>, chunks: &[&str]) -> Vec<Text> {
        let mut published = Vec::new();
        for chunk in chunks {
            session.push_chunk(chunk.as_bytes(), &mut |p| published.push(p.clone()));
        }
        published
    }

    fn bytes_of(chunks: &[&'static str]) -> ByteStream {
        let items: Vec<Result<bytes::Bytes, StreamError>> = chunks
            .iter()
            .map(|c| Ok(bytes::Bytes::from_static(c.as_bytes())))
            .collect();
        Box::pin(futures::stream::iter(items))
    }

    #[test]
    fn content_split_across_chunks_then_stop() {
        let mut session = StreamSession::new(Text::default());
        feed(
            &mut session,
            &[
                "data: {\"type\":\"content\",\"content\":\"Hel",
                "lo\"}\n\ndata: {\"type\":\"stop\"}\n\n",
            ],
        );
        assert_eq!(session.projection().text, "Hello");
        assert_eq!(session.state(), SessionState::Closed(CloseReason::Stop));
    }

    #[test]
    fn every_mutation_is_published_in_order() {
        let mut session = StreamSession::new(Text::default());
        let published = feed(
            &mut session,
            &["data: {\"type\":\"content\",\"content\":\"a\"}\n\ndata: {\"type\":\"content\",\"content\":\"b\"}\n\n"],
        );
        let texts: Vec<&str> = published.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "ab"]);
    }

    #[test]
    fn nothing_is_applied_after_stop() {
        let mut session = StreamSession::new(Text::default());
        feed(
            &mut session,
            &["data: {\"type\":\"stop\"}\n\ndata: {\"type\":\"content\",\"content\":\"late\"}\n\n"],
        );
        assert_eq!(session.projection().text, "");
        assert_eq!(
            session.apply(Event::Content("later".into())),
            Outcome::Discarded
        );
        assert_eq!(session.projection().text, "");
    }

    #[test]
    fn malformed_frame_between_valid_frames_is_skipped() {
        let mut session = StreamSession::new(Text::default());
        feed(
            &mut session,
            &[
                "data: {\"type\":\"content\",\"content\":\"one \"}\n\n",
                "data: {\"type\":\"content\",\"content\":\n\n",
                "data: {\"type\":\"content\",\"content\":\"two\"}\n\n",
            ],
        );
        assert!(session.is_open());
        assert_eq!(session.projection().text, "one two");
        assert_eq!(session.applied(), 2);
    }

    #[test]
    fn cache_snapshot_replaces_and_closes() {
        let mut session = StreamSession::new(Text {
            text: "partial".into(),
            sources: vec![],
        });
        let mut snapshot = serde_json::Map::new();
        snapshot.insert("text".into(), serde_json::json!("cached"));
        let outcome = session.apply(Event::CacheSnapshot(snapshot.clone()));
        assert_eq!(outcome, Outcome::Closed { mutated: true });
        assert_eq!(session.projection().text, "cached");
        assert_eq!(
            session.state(),
            SessionState::Closed(CloseReason::CacheSnapshot)
        );

        let once = session.projection().clone();
        let mut again = StreamSession::new(once.clone());
        again.apply(Event::CacheSnapshot(snapshot));
        assert_eq!(again.projection(), &once);
    }

    #[test]
    fn mismatched_snapshot_is_ignored_and_session_stays_open() {
        let mut session = StreamSession::new(Text::default());
        let mut object = serde_json::Map::new();
        object.insert("unrelated".into(), serde_json::json!(1));
        let outcome = session.apply(Event::CacheSnapshot(object));
        assert!(matches!(outcome, Outcome::Ignored(StreamError::Protocol { .. })));
        assert!(session.is_open());
    }

    #[test]
    fn unsupported_event_is_a_protocol_violation() {
        let mut session = StreamSession::new(Text::default());
        let outcome = session.apply(Event::SectionContent {
            section: "overview".into(),
            content: "x".into(),
        });
        assert!(matches!(outcome, Outcome::Ignored(StreamError::Protocol { .. })));
        assert!(session.is_open());
    }

    #[test]
    fn end_of_stream_flushes_trailing_frame_and_closes() {
        let mut session = StreamSession::new(Text::default());
        feed(&mut session, &["data: {\"type\":\"content\",\"content\":\"tail\"}"]);
        assert_eq!(session.projection().text, "");
        session.finish(&mut |_| {});
        assert_eq!(session.projection().text, "tail");
        assert_eq!(session.state(), SessionState::Closed(CloseReason::EndOfStream));
    }

    #[tokio::test]
    async fn reconcile_publishes_and_completes() {
        let (tx, rx) = watch::channel(StreamView::<Text>::default());
        let mut session = StreamSession::new(Text::default());
        reconcile(
            &mut session,
            bytes_of(&[
                "data: {\"type\":\"metadata\",\"sources\":[\"s\"]}\n\n",
                "data: {\"type\":\"content\",\"content\":\"hi\"}\n\ndata: {\"type\":\"stop\"}\n\n",
            ]),
            &tx,
        )
        .await
        .expect("reconcile");
        let view = rx.borrow().clone();
        assert_eq!(view.phase, Phase::Complete);
        assert_eq!(view.session_id, Some(session.id()));
        assert_eq!(view.projection.text, "hi");
        assert_eq!(view.projection.sources, vec!["s".to_string()]);
    }

    #[tokio::test]
    async fn reconcile_keeps_partial_projection_on_transport_error() {
        let (tx, rx) = watch::channel(StreamView::<Text>::default());
        let mut session = StreamSession::new(Text::default());
        let items: Vec<Result<bytes::Bytes, StreamError>> = vec![
            Ok(bytes::Bytes::from_static(
                b"data: {\"type\":\"content\",\"content\":\"par\"}\n\n",
            )),
            Err(StreamError::transport("/chat", "reset", None)),
        ];
        let err = reconcile(&mut session, Box::pin(futures::stream::iter(items)), &tx)
            .await
            .expect_err("transport failure");
        assert!(matches!(err, StreamError::Transport { .. }));
        assert_eq!(session.state(), SessionState::Closed(CloseReason::Transport));
        let view = rx.borrow().clone();
        assert_eq!(view.projection.text, "par");
        assert_eq!(view.phase, Phase::Streaming);
    }
}
