//! Assembles streamed chat responses into messages.
//!
//! Each conversation context (the main orchestrator or a named agent) owns a
//! message list and at most one live stream slot. The slot is identified by a
//! generation number handed out when the stream starts; every event coming
//! back from the transport carries that generation, and anything that does
//! not match the live slot (a stream that was torn down, finished, or
//! replaced) is dropped without touching the transcript.

use std::collections::HashMap;

use chrono::DateTime;
use chrono::Local;
use conductor_backend_client::ApiError;
use conductor_backend_client::ChatTarget;
use conductor_backend_client::StreamEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
    User,
    Agent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StreamingMessage {
    pub role: Role,
    pub content: String,
    pub is_streaming: bool,
    pub created_at: DateTime<Local>,
    /// Agent the server routed this answer to, if it said so.
    pub routed_to: Option<String>,
}

impl StreamingMessage {
    fn user(prompt: &str) -> Self {
        Self {
            role: Role::User,
            content: prompt.to_string(),
            is_streaming: false,
            created_at: Local::now(),
            routed_to: None,
        }
    }

    fn pending_agent() -> Self {
        Self {
            role: Role::Agent,
            content: String::new(),
            is_streaming: true,
            created_at: Local::now(),
            routed_to: None,
        }
    }

    fn annotate_error(&mut self, message: &str) {
        if self.content.is_empty() {
            self.content = format!("Error: {message}");
        } else {
            self.content.push_str(&format!("\n\n[error: {message}]"));
        }
    }
}

/// Returned by [`StreamAssembler::start`] when the context already streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StreamBusy;

/// Effect of applying one transport item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StreamOutcome {
    /// No live stream matches; nothing changed.
    Stale,
    Updated,
    Finished,
    Failed(String),
}

#[derive(Debug)]
struct ActiveStream {
    generation: u64,
    index: usize,
}

#[derive(Debug, Default)]
struct Conversation {
    messages: Vec<StreamingMessage>,
    active: Option<ActiveStream>,
}

impl Conversation {
    /// Finalize the live message and release the slot.
    fn finish(&mut self) -> Option<(u64, &mut StreamingMessage)> {
        let active = self.active.take()?;
        let message = self.messages.get_mut(active.index)?;
        message.is_streaming = false;
        Some((active.generation, message))
    }
}

#[derive(Debug, Default)]
pub(crate) struct StreamAssembler {
    conversations: HashMap<ChatTarget, Conversation>,
    next_generation: u64,
}

impl StreamAssembler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Record the prompt, open an empty streaming answer and return the
    /// generation the transport must tag its events with. Rejects the send
    /// while the context still streams.
    pub(crate) fn start(&mut self, target: &ChatTarget, prompt: &str) -> Result<u64, StreamBusy> {
        let conversation = self.conversations.entry(target.clone()).or_default();
        if conversation.active.is_some() {
            return Err(StreamBusy);
        }
        self.next_generation += 1;
        let generation = self.next_generation;
        conversation.messages.push(StreamingMessage::user(prompt));
        conversation.messages.push(StreamingMessage::pending_agent());
        conversation.active = Some(ActiveStream {
            generation,
            index: conversation.messages.len() - 1,
        });
        Ok(generation)
    }

    pub(crate) fn apply(
        &mut self,
        target: &ChatTarget,
        generation: u64,
        item: Result<StreamEvent, ApiError>,
    ) -> StreamOutcome {
        let Some(conversation) = self.conversations.get_mut(target) else {
            return StreamOutcome::Stale;
        };
        let Some(active) = conversation.active.as_ref() else {
            return StreamOutcome::Stale;
        };
        if active.generation != generation {
            return StreamOutcome::Stale;
        }
        let index = active.index;

        match item {
            Ok(StreamEvent::Route { agent }) => {
                if let Some(message) = conversation.messages.get_mut(index) {
                    message.routed_to = Some(agent);
                }
                StreamOutcome::Updated
            }
            Ok(StreamEvent::Chunk { text }) => {
                if let Some(message) = conversation.messages.get_mut(index) {
                    message.content.push_str(&text);
                }
                StreamOutcome::Updated
            }
            Ok(StreamEvent::Done) => {
                conversation.finish();
                StreamOutcome::Finished
            }
            Ok(StreamEvent::Error { message }) => {
                if let Some((_, finished)) = conversation.finish() {
                    finished.annotate_error(&message);
                }
                StreamOutcome::Failed(message)
            }
            Err(err) => {
                let message = err.to_string();
                if let Some((_, finished)) = conversation.finish() {
                    finished.annotate_error(&message);
                }
                StreamOutcome::Failed(message)
            }
        }
    }

    /// Stop the live stream in `target`, keeping what arrived so far. Returns
    /// the generation whose connection must be closed.
    pub(crate) fn interrupt(&mut self, target: &ChatTarget) -> Option<u64> {
        let conversation = self.conversations.get_mut(target)?;
        let (generation, message) = conversation.finish()?;
        if message.content.is_empty() {
            message.content.push_str("[interrupted]");
        } else {
            message.content.push_str("\n\n[interrupted]");
        }
        Some(generation)
    }

    /// Drop the conversation entirely. Returns the generation of a stream
    /// that was still live.
    pub(crate) fn clear(&mut self, target: &ChatTarget) -> Option<u64> {
        let conversation = self.conversations.remove(target)?;
        conversation.active.map(|active| active.generation)
    }

    /// Finalize every live stream; used on exit and when credentials expire.
    pub(crate) fn teardown_all(&mut self) -> Vec<(ChatTarget, u64)> {
        let mut torn_down = Vec::new();
        for (target, conversation) in self.conversations.iter_mut() {
            if let Some((generation, _)) = conversation.finish() {
                torn_down.push((target.clone(), generation));
            }
        }
        torn_down.sort();
        torn_down
    }

    pub(crate) fn messages(&self, target: &ChatTarget) -> &[StreamingMessage] {
        self.conversations
            .get(target)
            .map(|c| c.messages.as_slice())
            .unwrap_or_default()
    }

    pub(crate) fn is_streaming(&self, target: &ChatTarget) -> bool {
        self.conversations
            .get(target)
            .is_some_and(|c| c.active.is_some())
    }

    /// Contexts other than the active one that are still receiving output.
    pub(crate) fn streaming_targets(&self) -> Vec<ChatTarget> {
        let mut targets: Vec<ChatTarget> = self
            .conversations
            .iter()
            .filter(|(_, c)| c.active.is_some())
            .map(|(t, _)| t.clone())
            .collect();
        targets.sort();
        targets
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]
    use super::*;
    use pretty_assertions::assert_eq;

    fn chunk(text: &str) -> Result<StreamEvent, ApiError> {
        Ok(StreamEvent::Chunk {
            text: text.to_string(),
        })
    }

    fn last(assembler: &StreamAssembler, target: &ChatTarget) -> StreamingMessage {
        assembler
            .messages(target)
            .last()
            .cloned()
            .expect("message present")
    }

    #[test]
    fn assembles_chunks_in_arrival_order() {
        let mut a = StreamAssembler::new();
        let main = ChatTarget::Main;
        let generation = a.start(&main, "greet me").expect("start");

        for text in ["Hel", "lo, ", "world"] {
            assert_eq!(a.apply(&main, generation, chunk(text)), StreamOutcome::Updated);
            assert!(last(&a, &main).is_streaming);
        }
        assert_eq!(
            a.apply(&main, generation, Ok(StreamEvent::Done)),
            StreamOutcome::Finished
        );

        let message = last(&a, &main);
        assert_eq!(message.content, "Hello, world");
        assert_eq!(message.role, Role::Agent);
        assert!(!message.is_streaming);
        assert!(!a.is_streaming(&main));
        assert_eq!(a.messages(&main)[0].content, "greet me");
    }

    #[test]
    fn concatenation_holds_for_arbitrary_chunkings() {
        let pieces: [&[&str]; 4] = [
            &[],
            &[""],
            &["a", "", "bc", "\n", "d e"],
            &["ünï", "cødé", " ✓"],
        ];
        for chunks in pieces {
            let mut a = StreamAssembler::new();
            let main = ChatTarget::Main;
            let generation = a.start(&main, "q").expect("start");
            for text in chunks {
                a.apply(&main, generation, chunk(text));
                assert!(last(&a, &main).is_streaming);
            }
            a.apply(&main, generation, Ok(StreamEvent::Done));
            let message = last(&a, &main);
            assert_eq!(message.content, chunks.concat());
            assert!(!message.is_streaming);
        }
    }

    #[test]
    fn rejects_second_send_while_streaming() {
        let mut a = StreamAssembler::new();
        let main = ChatTarget::Main;
        a.start(&main, "first").expect("start");
        assert_eq!(a.start(&main, "second"), Err(StreamBusy));
        assert_eq!(a.messages(&main).len(), 2);

        // Other contexts are independent.
        assert!(a.start(&ChatTarget::agent("planner"), "hi").is_ok());
    }

    #[test]
    fn events_after_terminal_are_ignored() {
        let mut a = StreamAssembler::new();
        let main = ChatTarget::Main;
        let generation = a.start(&main, "q").expect("start");
        a.apply(&main, generation, chunk("done."));
        a.apply(&main, generation, Ok(StreamEvent::Done));

        assert_eq!(a.apply(&main, generation, chunk(" extra")), StreamOutcome::Stale);
        assert_eq!(
            a.apply(&main, generation, Ok(StreamEvent::Error {
                message: "late".to_string()
            })),
            StreamOutcome::Stale
        );
        assert_eq!(last(&a, &main).content, "done.");
    }

    #[test]
    fn error_annotates_and_finalizes() {
        let mut a = StreamAssembler::new();
        let main = ChatTarget::Main;
        let generation = a.start(&main, "q").expect("start");
        a.apply(&main, generation, chunk("partial"));
        let outcome = a.apply(
            &main,
            generation,
            Err(ApiError::Stream("stream closed before done".to_string())),
        );

        assert_eq!(
            outcome,
            StreamOutcome::Failed("stream error: stream closed before done".to_string())
        );
        let message = last(&a, &main);
        assert_eq!(
            message.content,
            "partial\n\n[error: stream error: stream closed before done]"
        );
        assert!(!message.is_streaming);
        assert_eq!(a.apply(&main, generation, chunk("x")), StreamOutcome::Stale);
    }

    #[test]
    fn error_without_content_replaces_body() {
        let mut a = StreamAssembler::new();
        let main = ChatTarget::Main;
        let generation = a.start(&main, "q").expect("start");
        a.apply(
            &main,
            generation,
            Ok(StreamEvent::Error {
                message: "agent unavailable".to_string(),
            }),
        );
        assert_eq!(last(&a, &main).content, "Error: agent unavailable");
    }

    #[test]
    fn teardown_discards_late_chunks() {
        let mut a = StreamAssembler::new();
        let main = ChatTarget::Main;
        let generation = a.start(&main, "q").expect("start");
        a.apply(&main, generation, chunk("before"));

        assert_eq!(a.clear(&main), Some(generation));
        assert_eq!(a.apply(&main, generation, chunk("after")), StreamOutcome::Stale);
        assert!(a.messages(&main).is_empty());

        // A new stream in the same context gets a fresh generation; the old
        // one stays dead.
        let next = a.start(&main, "again").expect("start");
        assert_ne!(next, generation);
        assert_eq!(a.apply(&main, generation, chunk("ghost")), StreamOutcome::Stale);
        assert_eq!(a.apply(&main, next, chunk("fresh")), StreamOutcome::Updated);
        assert_eq!(last(&a, &main).content, "fresh");
    }

    #[test]
    fn interrupt_keeps_partial_content() {
        let mut a = StreamAssembler::new();
        let main = ChatTarget::Main;
        let generation = a.start(&main, "q").expect("start");
        a.apply(&main, generation, chunk("half"));

        assert_eq!(a.interrupt(&main), Some(generation));
        assert_eq!(a.interrupt(&main), None);
        assert_eq!(last(&a, &main).content, "half\n\n[interrupted]");
        assert_eq!(a.apply(&main, generation, Ok(StreamEvent::Done)), StreamOutcome::Stale);
    }

    #[test]
    fn teardown_all_finalizes_every_live_stream() {
        let mut a = StreamAssembler::new();
        let main = ChatTarget::Main;
        let planner = ChatTarget::agent("planner");
        let g1 = a.start(&main, "a").expect("start");
        let g2 = a.start(&planner, "b").expect("start");

        assert_eq!(a.streaming_targets(), vec![main.clone(), planner.clone()]);
        assert_eq!(a.teardown_all(), vec![(main.clone(), g1), (planner.clone(), g2)]);
        assert!(a.streaming_targets().is_empty());
        assert_eq!(a.apply(&planner, g2, chunk("x")), StreamOutcome::Stale);
    }

    #[test]
    fn route_event_records_agent() {
        let mut a = StreamAssembler::new();
        let main = ChatTarget::Main;
        let generation = a.start(&main, "q").expect("start");
        a.apply(
            &main,
            generation,
            Ok(StreamEvent::Route {
                agent: "researcher".to_string(),
            }),
        );
        assert_eq!(last(&a, &main).routed_to.as_deref(), Some("researcher"));
    }
}
