//! Orchestrator: drives one user/assistant turn end to end.
//!
//! Per turn: bump the turn counter, assemble context, run the model
//! through the bounded tool loop, route the final exchange to exactly one
//! log, then run the salience pass (decay + summary reference clocks).
//!
//! One orchestrator owns one session directory; `turn` takes `&mut self`,
//! so turns within a session are serialized by construction. Routing is
//! tool-driven: an effort opened or reopened this turn captures the
//! exchange, otherwise the active effort does, otherwise it is ambient.

use crate::api::{LanguageModel, Message};
use crate::context::{self, DEFAULT_SYSTEM_PROMPT};
use crate::error::EngineError;
use crate::manifest::{ExpandedState, Manifest, SessionCounter, SummaryRefs};
use crate::salience;
use crate::store::SessionStore;
use crate::tokens::TokenEstimator;
use crate::tools::{self, ToolContext};
use crate::{LogEntry, MAX_TOOL_ITERATIONS};
use std::path::PathBuf;
use tracing::{debug, info, warn};

// ── Configuration ──────────────────────────────────────────────────

/// Per-session turn configuration.
#[derive(Debug, Clone)]
pub struct TurnConfig {
    pub model: String,
    pub system_prompt: String,
}

impl TurnConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }

    /// Replace the default system prompt.
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }
}

// ── Orchestrator ───────────────────────────────────────────────────

/// The turn loop for one session.
pub struct Orchestrator<'a> {
    store: SessionStore,
    llm: &'a dyn LanguageModel,
    config: TurnConfig,
    estimator: TokenEstimator,
}

impl<'a> Orchestrator<'a> {
    pub fn new(store: SessionStore, llm: &'a dyn LanguageModel, config: TurnConfig) -> Self {
        let estimator = TokenEstimator::for_model(&config.model);
        Self {
            store,
            llm,
            config,
            estimator,
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Run one full turn: context in, assistant text out.
    ///
    /// On a transport error nothing past the turn-counter increment is
    /// persisted, so retrying the same input is safe. On exceeding the
    /// tool iteration bound the user message is still persisted and the
    /// turn fails with [`EngineError::Protocol`].
    pub async fn turn(&mut self, user_input: &str) -> Result<String, EngineError> {
        let mut counter = SessionCounter::load(&self.store)?;
        counter.turn_count += 1;
        counter.save(&self.store)?;
        let turn = counter.turn_count;

        let manifest = Manifest::load(&self.store)?;
        let expanded = ExpandedState::load(&self.store)?;
        let refs = SummaryRefs::load(&self.store)?;

        let assembled = context::assemble(
            &self.store,
            &manifest,
            &expanded,
            &refs,
            turn,
            &self.config.system_prompt,
        )?;
        info!(
            "Turn {turn}: ~{} context tokens, {} messages",
            assembled.estimate_tokens(&self.estimator),
            assembled.messages.len(),
        );

        let mut messages = assembled.messages;
        messages.push(Message::user(user_input));

        let registry = tools::registry();
        let tool_ctx = ToolContext {
            store: &self.store,
            llm: self.llm,
            estimator: self.estimator,
            turn,
        };

        let mut opened: Option<String> = None;
        let mut reply: Option<String> = None;

        for iteration in 0..MAX_TOOL_ITERATIONS {
            let completion = self.llm.chat(messages.clone(), registry.clone()).await?;

            if completion.tool_calls.is_empty() {
                reply = Some(completion.content.unwrap_or_default());
                break;
            }

            debug!(
                "Iteration {iteration}: {} tool call(s)",
                completion.tool_calls.len()
            );
            messages.push(Message::assistant_tool_calls(completion.tool_calls.clone()));
            for call in &completion.tool_calls {
                let outcome =
                    tools::dispatch(&tool_ctx, &call.function.name, &call.function.arguments)
                        .await;
                if let Some(id) = outcome.opened {
                    opened = Some(id);
                }
                messages.push(Message::tool_result(&call.id, &outcome.result));
            }
        }

        let target = self.routing_target(opened.as_deref())?;

        let Some(reply) = reply else {
            warn!("Tool iteration bound reached; persisting user input without a reply");
            self.store.append_entry(&target, &LogEntry::user(user_input))?;
            return Err(EngineError::Protocol(MAX_TOOL_ITERATIONS));
        };

        self.store.append_entry(&target, &LogEntry::user(user_input))?;
        self.store.append_entry(&target, &LogEntry::assistant(&reply))?;

        let collapsed = self.salience_pass(turn, user_input, &reply)?;
        if collapsed.is_empty() {
            Ok(reply)
        } else {
            Ok(format!("Auto-collapsed: {}\n\n{reply}", collapsed.join(", ")))
        }
    }

    /// The one log this turn's exchange is appended to.
    ///
    /// Read after the tool loop, so effort state reflects any lifecycle
    /// calls the model made this turn.
    fn routing_target(&self, opened: Option<&str>) -> Result<PathBuf, EngineError> {
        if let Some(id) = opened {
            return Ok(self.store.effort_log_path(id));
        }
        let manifest = Manifest::load(&self.store)?;
        Ok(match manifest.get_active() {
            Some(active) => self.store.effort_log_path(&active.id),
            None => self.store.raw_log_path(),
        })
    }

    /// Post-exchange salience pass: decay the expanded set and refresh the
    /// summary reference clocks. The user message and the assistant reply
    /// are matched independently.
    fn salience_pass(
        &self,
        turn: u64,
        user_input: &str,
        reply: &str,
    ) -> Result<Vec<String>, EngineError> {
        let manifest = Manifest::load(&self.store)?;
        let mut expanded = ExpandedState::load(&self.store)?;
        let mut refs = SummaryRefs::load(&self.store)?;

        let turn_texts = [user_input, reply];
        let collapsed = salience::apply_decay(&mut expanded, &manifest, turn, &turn_texts);
        expanded.save(&self.store)?;
        salience::refresh_summary_refs(&mut refs, &manifest, turn, &turn_texts);
        refs.save(&self.store)?;

        Ok(collapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ChatCompletion, LlmFuture, ToolCall, ToolDef};
    use crate::manifest::EffortStatus;
    use crate::{DECAY_THRESHOLD, SUMMARY_EVICTION_THRESHOLD};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scripted model: `chat` pops the next completion, `summarize`
    /// returns a fixed string. Records every request for assertions.
    struct FakeModel {
        script: Mutex<VecDeque<ChatCompletion>>,
        summary: &'static str,
        seen: Mutex<Vec<Vec<Message>>>,
    }

    impl FakeModel {
        fn scripted(script: Vec<ChatCompletion>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                summary: "scripted summary",
                seen: Mutex::new(Vec::new()),
            }
        }

        fn with_summary(mut self, summary: &'static str) -> Self {
            self.summary = summary;
            self
        }

        fn request(&self, i: usize) -> Vec<Message> {
            self.seen.lock().unwrap()[i].clone()
        }
    }

    impl LanguageModel for FakeModel {
        fn chat(&self, messages: Vec<Message>, _: Vec<ToolDef>) -> LlmFuture<'_, ChatCompletion> {
            self.seen.lock().unwrap().push(messages);
            let next = self.script.lock().unwrap().pop_front();
            Box::pin(async move {
                next.ok_or_else(|| EngineError::Transport("script exhausted".into()))
            })
        }

        fn summarize(&self, _: &str) -> LlmFuture<'_, String> {
            let summary = self.summary.to_string();
            Box::pin(async move { Ok(summary) })
        }
    }

    fn orchestrator<'a>(
        dir: &tempfile::TempDir,
        llm: &'a FakeModel,
    ) -> Orchestrator<'a> {
        let store = SessionStore::open(dir.path()).unwrap();
        Orchestrator::new(store, llm, TurnConfig::new("test-model"))
    }

    fn call(name: &str, args: serde_json::Value) -> ChatCompletion {
        ChatCompletion::with_tool_calls(vec![ToolCall::function("c1", name, args)])
    }

    #[tokio::test]
    async fn ambient_only_turn() {
        let dir = tempfile::tempdir().unwrap();
        let llm = FakeModel::scripted(vec![ChatCompletion::text("Hi there!")]);
        let mut orch = orchestrator(&dir, &llm);

        let reply = orch.turn("Hello!").await.unwrap();
        assert_eq!(reply, "Hi there!");

        let store = orch.store();
        assert_eq!(store.entry_count(&store.raw_log_path()).unwrap(), 2);
        assert!(!Manifest::exists(store));
        assert_eq!(SessionCounter::load(store).unwrap().turn_count, 1);
    }

    #[tokio::test]
    async fn opening_an_effort_routes_the_exchange_to_its_log() {
        let dir = tempfile::tempdir().unwrap();
        let llm = FakeModel::scripted(vec![
            call("open_effort", json!({"name": "auth-bug"})),
            ChatCompletion::text("Opened. Let's dig in."),
        ]);
        let mut orch = orchestrator(&dir, &llm);

        let reply = orch.turn("Let's debug the auth bug").await.unwrap();
        assert_eq!(reply, "Opened. Let's dig in.");

        let store = orch.store();
        assert_eq!(
            store.entry_count(&store.effort_log_path("auth-bug")).unwrap(),
            2
        );
        assert_eq!(store.entry_count(&store.raw_log_path()).unwrap(), 0);

        let manifest = Manifest::load(store).unwrap();
        assert_eq!(manifest.get_active().unwrap().id, "auth-bug");
    }

    #[tokio::test]
    async fn active_effort_captures_subsequent_turns() {
        let dir = tempfile::tempdir().unwrap();
        let llm = FakeModel::scripted(vec![
            call("open_effort", json!({"name": "auth-bug"})),
            ChatCompletion::text("Opened."),
            ChatCompletion::text("Try clearing the refresh cache."),
        ]);
        let mut orch = orchestrator(&dir, &llm);

        orch.turn("Let's debug the auth bug").await.unwrap();
        orch.turn("What should I try first?").await.unwrap();

        let store = orch.store();
        assert_eq!(
            store.entry_count(&store.effort_log_path("auth-bug")).unwrap(),
            4
        );
        assert_eq!(store.entry_count(&store.raw_log_path()).unwrap(), 0);
        assert!(Manifest::load(store).unwrap().get_active().is_some());
    }

    #[tokio::test]
    async fn concluding_shrinks_the_assembled_context() {
        let dir = tempfile::tempdir().unwrap();
        let llm = FakeModel::scripted(vec![
            call("open_effort", json!({"name": "auth-bug"})),
            ChatCompletion::text("Opened."),
            call("close_effort", json!({})),
            ChatCompletion::text("Done, summarized."),
        ])
        .with_summary("fixed token expiry");
        let mut orch = orchestrator(&dir, &llm);

        orch.turn("Let's debug the auth bug").await.unwrap();
        let store = orch.store();
        // Several long effort exchanges accumulated before conclusion.
        for _ in 0..5 {
            store
                .append_entry(
                    &store.effort_log_path("auth-bug"),
                    &LogEntry::user("investigating the failure ".repeat(30)),
                )
                .unwrap();
            store
                .append_entry(
                    &store.effort_log_path("auth-bug"),
                    &LogEntry::assistant("detailed debugging notes ".repeat(30)),
                )
                .unwrap();
        }

        let tokens_before = assembled_tokens(orch.store(), 2);
        orch.turn("fixed it").await.unwrap();
        let tokens_after = assembled_tokens(orch.store(), 3);

        assert!(
            (tokens_after as f64) < (tokens_before as f64) * 0.5,
            "expected >50% shrink, got {tokens_before} -> {tokens_after}"
        );

        let manifest = Manifest::load(orch.store()).unwrap();
        let effort = manifest.get("auth-bug").unwrap();
        assert!(effort.is_concluded());
        assert_eq!(effort.summary.as_deref(), Some("fixed token expiry"));
        assert!(manifest.get_active().is_none());
    }

    fn assembled_tokens(store: &SessionStore, turn: u64) -> usize {
        let manifest = Manifest::load(store).unwrap();
        let expanded = ExpandedState::load(store).unwrap();
        let refs = SummaryRefs::load(store).unwrap();
        context::assemble(store, &manifest, &expanded, &refs, turn, DEFAULT_SYSTEM_PROMPT)
            .unwrap()
            .estimate_tokens(&TokenEstimator::for_model("test-model"))
    }

    #[tokio::test]
    async fn decay_banner_after_unrelated_turns() {
        let dir = tempfile::tempdir().unwrap();
        let llm = FakeModel::scripted(vec![
            ChatCompletion::text("One."),
            ChatCompletion::text("Two."),
            ChatCompletion::text("Three."),
        ]);
        let mut orch = orchestrator(&dir, &llm);

        // A concluded effort, expanded before any turn runs.
        let store = orch.store();
        let mut manifest = Manifest::default();
        manifest.open_new("auth-bug").unwrap();
        manifest
            .update("auth-bug", |e| {
                e.status = EffortStatus::Concluded;
                e.active = false;
                e.summary = Some("rotated signing keys for stale sessions".into());
            })
            .unwrap();
        manifest.save(store).unwrap();
        let mut expanded = ExpandedState::default();
        expanded.insert("auth-bug", 0);
        expanded.save(store).unwrap();

        for i in 1..DECAY_THRESHOLD {
            let reply = orch.turn("tell me something fun").await.unwrap();
            assert!(
                !reply.starts_with("Auto-collapsed"),
                "collapsed too early on turn {i}"
            );
        }
        let reply = orch.turn("tell me something fun").await.unwrap();
        assert!(reply.starts_with("Auto-collapsed: auth-bug"), "got: {reply}");
        assert!(ExpandedState::load(orch.store()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn evicted_summary_is_recalled_through_search() {
        let dir = tempfile::tempdir().unwrap();
        let llm = FakeModel::scripted(vec![
            call("search_efforts", json!({"query": "token expiry"})),
            ChatCompletion::text("We fixed the token expiry in the refresh path."),
        ]);
        let mut orch = orchestrator(&dir, &llm);

        let store = orch.store();
        let mut manifest = Manifest::default();
        manifest.open_new("auth-bug").unwrap();
        manifest
            .update("auth-bug", |e| {
                e.status = EffortStatus::Concluded;
                e.active = false;
                e.summary = Some("fixed token expiry in the refresh path".into());
            })
            .unwrap();
        manifest.save(store).unwrap();
        let mut refs = SummaryRefs::default();
        refs.set("auth-bug", 1);
        refs.save(store).unwrap();
        // Next turn is 1 + SUMMARY_EVICTION_THRESHOLD: past the deadline.
        SessionCounter {
            turn_count: SUMMARY_EVICTION_THRESHOLD,
        }
        .save(store)
        .unwrap();

        let reply = orch.turn("how did we handle that expiry thing?").await.unwrap();
        assert!(reply.contains("token expiry"));

        // First request: the summary was evicted from the Memory section,
        // but recall is still advertised.
        let system = llm.request(0)[0].content.clone().unwrap();
        assert!(!system.contains("- auth-bug:"));
        assert!(system.contains("search_efforts"));

        // Second request: the tool result brought the effort back.
        let tool_result = llm
            .request(1)
            .iter()
            .rev()
            .find(|m| m.tool_call_id.is_some())
            .and_then(|m| m.content.clone())
            .unwrap();
        assert!(tool_result.contains("auth-bug"));
    }

    #[tokio::test]
    async fn transport_error_persists_nothing_but_the_counter() {
        let dir = tempfile::tempdir().unwrap();
        let llm = FakeModel::scripted(vec![]);
        let mut orch = orchestrator(&dir, &llm);

        let err = orch.turn("Hello!").await.unwrap_err();
        assert!(matches!(err, EngineError::Transport(_)));

        let store = orch.store();
        assert_eq!(store.entry_count(&store.raw_log_path()).unwrap(), 0);
        // Retry is safe: counter moved, nothing else did.
        assert_eq!(SessionCounter::load(store).unwrap().turn_count, 1);
    }

    #[tokio::test]
    async fn tool_iteration_bound_persists_user_input() {
        let dir = tempfile::tempdir().unwrap();
        let script = (0..MAX_TOOL_ITERATIONS)
            .map(|_| call("effort_status", json!({})))
            .collect();
        let llm = FakeModel::scripted(script);
        let mut orch = orchestrator(&dir, &llm);

        let err = orch.turn("loop forever").await.unwrap_err();
        assert!(matches!(err, EngineError::Protocol(MAX_TOOL_ITERATIONS)));

        let store = orch.store();
        let entries = store.read_entries(&store.raw_log_path()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].content, "loop forever");
    }

    #[tokio::test]
    async fn at_most_one_effort_is_active() {
        let dir = tempfile::tempdir().unwrap();
        let llm = FakeModel::scripted(vec![
            call("open_effort", json!({"name": "first-task"})),
            ChatCompletion::text("Opened first."),
            call("close_effort", json!({})),
            ChatCompletion::text("Closed."),
            call("open_effort", json!({"name": "second-task"})),
            ChatCompletion::text("Opened second."),
            call("reopen_effort", json!({"id": "first-task"})),
            ChatCompletion::text("Back on the first task."),
        ]);
        let mut orch = orchestrator(&dir, &llm);

        orch.turn("start the first task").await.unwrap();
        orch.turn("that's done").await.unwrap();
        orch.turn("now the second task").await.unwrap();
        orch.turn("go back to the first").await.unwrap();

        let manifest = Manifest::load(orch.store()).unwrap();
        let active: Vec<_> = manifest.list().iter().filter(|e| e.active).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "first-task");
    }
}
