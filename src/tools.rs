//! The seven effort-lifecycle tools exposed to the model, plus dispatch.
//!
//! Tool results are JSON strings fed back to the model as `tool` messages.
//! Usage errors are part of that contract: a handler failure becomes
//! `{"error": "..."}` rather than aborting the turn, so the model can read
//! the problem and correct itself. Arguments are validated against each
//! tool's JSON Schema before the handler runs.
//!
//! Every handler loads state fresh from the session directory and saves it
//! back before returning, so consecutive tool calls within one turn observe
//! each other's effects.

use crate::api::{LanguageModel, ToolDef};
use crate::error::EngineError;
use crate::json_schema_for;
use crate::manifest::{EffortStatus, ExpandedState, Manifest, SessionCounter};
use crate::salience::{extract_keywords, keyword_overlap};
use crate::store::SessionStore;
use crate::tokens::{savings_pct, TokenEstimator};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

// ── Argument types ─────────────────────────────────────────────────

#[derive(Deserialize, JsonSchema)]
pub struct OpenEffortArgs {
    /// Kebab-case name for the new effort, e.g. "auth-bug".
    pub name: String,
}

#[derive(Deserialize, JsonSchema)]
pub struct EffortIdArgs {
    /// Id of an existing effort.
    pub id: String,
}

#[derive(Deserialize, JsonSchema)]
pub struct SearchArgs {
    /// Free-text topic to search concluded efforts for.
    pub query: String,
}

#[derive(Deserialize, JsonSchema)]
pub struct NoArgs {}

// ── Registry ───────────────────────────────────────────────────────

/// Definitions for all seven tools, in the order they are advertised.
pub fn registry() -> Vec<ToolDef> {
    vec![
        ToolDef::new(
            "open_effort",
            "Open a new effort for a distinct piece of focused work and make \
             it active. Subsequent exchanges are logged to this effort until \
             it is closed. Fails if another effort is already active.",
            json_schema_for::<OpenEffortArgs>(),
        ),
        ToolDef::new(
            "close_effort",
            "Conclude the active effort: its log is summarized and collapses \
             to a one-line summary in memory. Call this when the task the \
             effort was opened for is done.",
            json_schema_for::<NoArgs>(),
        ),
        ToolDef::new(
            "reopen_effort",
            "Resume a concluded effort, making it active again. Displaces \
             the currently active effort, if any.",
            json_schema_for::<EffortIdArgs>(),
        ),
        ToolDef::new(
            "expand_effort",
            "Temporarily bring a concluded effort's full raw log back into \
             context, replacing its summary. It auto-collapses after a few \
             turns without a reference.",
            json_schema_for::<EffortIdArgs>(),
        ),
        ToolDef::new(
            "collapse_effort",
            "Collapse an expanded effort back to its summary immediately.",
            json_schema_for::<EffortIdArgs>(),
        ),
        ToolDef::new(
            "effort_status",
            "Report the session's effort catalog: every effort with its \
             status, estimated raw and summary token counts, and what is \
             currently expanded.",
            json_schema_for::<NoArgs>(),
        ),
        ToolDef::new(
            "search_efforts",
            "Search concluded efforts by topic. Returns matching efforts \
             with their summaries, best match first. Use this to recall \
             older work whose summary is no longer visible in memory.",
            json_schema_for::<SearchArgs>(),
        ),
    ]
}

// ── Dispatch ───────────────────────────────────────────────────────

/// Shared environment handed to every tool handler for one turn.
pub struct ToolContext<'a> {
    pub store: &'a SessionStore,
    pub llm: &'a dyn LanguageModel,
    pub estimator: TokenEstimator,
    /// Current turn number (already incremented for this turn).
    pub turn: u64,
}

/// The result of one tool call, plus the routing side channel: the id of
/// an effort this call made active, if any.
pub struct ToolOutcome {
    pub result: String,
    pub opened: Option<String>,
}

impl ToolOutcome {
    fn ok(value: Value, opened: Option<String>) -> Self {
        Self {
            result: value.to_string(),
            opened,
        }
    }

    fn error(message: impl std::fmt::Display) -> Self {
        Self {
            result: json!({"error": message.to_string()}).to_string(),
            opened: None,
        }
    }
}

/// Validate and run one tool call. Never fails: every error path produces
/// an `{"error": ...}` result for the model to read.
pub async fn dispatch(ctx: &ToolContext<'_>, name: &str, arguments: &str) -> ToolOutcome {
    let args: Value = if arguments.trim().is_empty() {
        json!({})
    } else {
        match serde_json::from_str(arguments) {
            Ok(v) => v,
            Err(e) => return ToolOutcome::error(format!("malformed arguments: {e}")),
        }
    };

    let Some(def) = registry().into_iter().find(|d| d.function.name == name) else {
        warn!("Model called unknown tool '{name}'");
        return ToolOutcome::error(format!("unknown tool '{name}'"));
    };
    if let Some(e) = validate_arguments(&def.function.parameters, &args) {
        return ToolOutcome::error(format!("invalid arguments for {name}: {e}"));
    }

    debug!("Tool call: {name}({args})");

    let outcome = async {
        match name {
            "open_effort" => open_effort(ctx, parse(args)?).await,
            "close_effort" => close_effort(ctx, parse(args)?).await,
            "reopen_effort" => reopen_effort(ctx, parse(args)?).await,
            "expand_effort" => expand_effort(ctx, parse(args)?).await,
            "collapse_effort" => collapse_effort(ctx, parse(args)?).await,
            "effort_status" => effort_status(ctx, parse(args)?).await,
            "search_efforts" => search_efforts(ctx, parse(args)?).await,
            _ => unreachable!("registry and dispatch are in sync"),
        }
    }
    .await;

    match outcome {
        Ok(outcome) => outcome,
        Err(e) => ToolOutcome::error(e),
    }
}

/// Validate parsed arguments against a tool's declared schema. Returns a
/// message for the model on failure; an unbuildable schema skips
/// validation.
fn validate_arguments(schema: &Value, args: &Value) -> Option<String> {
    let validator = jsonschema::validator_for(schema).ok()?;
    let errors: Vec<String> = validator
        .iter_errors(args)
        .map(|e| format!("{}: {e}", e.instance_path()))
        .collect();
    if errors.is_empty() {
        None
    } else {
        Some(errors.join("; "))
    }
}

fn parse<A: serde::de::DeserializeOwned>(args: Value) -> Result<A, EngineError> {
    serde_json::from_value(args)
        .map_err(|e| EngineError::ToolUsage(format!("malformed arguments: {e}")))
}

// ── Handlers ───────────────────────────────────────────────────────

fn valid_slug(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && !name.starts_with('-')
        && !name.ends_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

async fn open_effort(
    ctx: &ToolContext<'_>,
    args: OpenEffortArgs,
) -> Result<ToolOutcome, EngineError> {
    if !valid_slug(&args.name) {
        return Err(EngineError::ToolUsage(format!(
            "'{}' is not a valid effort name (use lowercase kebab-case, e.g. 'auth-bug')",
            args.name
        )));
    }

    let mut manifest = Manifest::load(ctx.store)?;
    manifest.open_new(&args.name)?;
    manifest.save(ctx.store)?;
    ctx.store.touch(&ctx.store.effort_log_path(&args.name))?;

    Ok(ToolOutcome::ok(
        json!({"status": "opened", "id": args.name}),
        Some(args.name),
    ))
}

async fn close_effort(ctx: &ToolContext<'_>, _args: NoArgs) -> Result<ToolOutcome, EngineError> {
    let mut manifest = Manifest::load(ctx.store)?;
    let Some(active) = manifest.get_active() else {
        return Err(EngineError::ToolUsage(
            "no effort is active; nothing to close".into(),
        ));
    };
    let id = active.id.clone();

    let entries = ctx.store.read_entries(&ctx.store.effort_log_path(&id))?;
    let log_text = entries
        .iter()
        .map(|e| format!("{}: {}", e.role, e.content))
        .collect::<Vec<_>>()
        .join("\n");

    let summary = if entries.is_empty() {
        "(no exchanges recorded)".to_string()
    } else {
        ctx.llm.summarize(&log_text).await?
    };

    let raw_tokens = ctx.estimator.count_entries(&entries);
    let summary_tokens = ctx.estimator.count(&summary);

    manifest.update(&id, |e| {
        e.status = EffortStatus::Concluded;
        e.active = false;
        e.summary = Some(summary.clone());
    })?;
    manifest.save(ctx.store)?;

    debug!(
        "Concluded effort '{id}': {raw_tokens} raw tokens -> {summary_tokens} summary tokens"
    );

    Ok(ToolOutcome::ok(
        json!({
            "status": "concluded",
            "id": id,
            "summary": summary,
            "raw_tokens": raw_tokens,
            "summary_tokens": summary_tokens,
            "token_savings_pct": savings_pct(raw_tokens, summary_tokens).round(),
        }),
        None,
    ))
}

async fn reopen_effort(
    ctx: &ToolContext<'_>,
    args: EffortIdArgs,
) -> Result<ToolOutcome, EngineError> {
    let mut manifest = Manifest::load(ctx.store)?;
    manifest.activate(&args.id)?;
    manifest.save(ctx.store)?;

    // An open effort's full log is in context anyway.
    let mut expanded = ExpandedState::load(ctx.store)?;
    if expanded.remove(&args.id) {
        expanded.save(ctx.store)?;
    }

    Ok(ToolOutcome::ok(
        json!({"status": "reopened", "id": args.id}),
        Some(args.id),
    ))
}

async fn expand_effort(
    ctx: &ToolContext<'_>,
    args: EffortIdArgs,
) -> Result<ToolOutcome, EngineError> {
    let manifest = Manifest::load(ctx.store)?;
    let Some(effort) = manifest.get(&args.id) else {
        return Err(EngineError::ToolUsage(format!("unknown effort '{}'", args.id)));
    };
    if effort.is_open() {
        return Err(EngineError::ToolUsage(format!(
            "effort '{}' is open; its full log is already visible",
            args.id
        )));
    }

    let mut expanded = ExpandedState::load(ctx.store)?;
    expanded.insert(args.id.clone(), ctx.turn);
    expanded.save(ctx.store)?;

    Ok(ToolOutcome::ok(
        json!({"status": "expanded", "id": args.id}),
        None,
    ))
}

async fn collapse_effort(
    ctx: &ToolContext<'_>,
    args: EffortIdArgs,
) -> Result<ToolOutcome, EngineError> {
    let mut expanded = ExpandedState::load(ctx.store)?;
    if !expanded.remove(&args.id) {
        return Err(EngineError::ToolUsage(format!(
            "effort '{}' is not expanded",
            args.id
        )));
    }
    expanded.save(ctx.store)?;

    Ok(ToolOutcome::ok(
        json!({"status": "collapsed", "id": args.id}),
        None,
    ))
}

async fn effort_status(ctx: &ToolContext<'_>, _args: NoArgs) -> Result<ToolOutcome, EngineError> {
    let manifest = Manifest::load(ctx.store)?;
    let expanded = ExpandedState::load(ctx.store)?;
    let counter = SessionCounter::load(ctx.store)?;

    let mut efforts = Vec::new();
    for effort in manifest.list() {
        let entries = ctx.store.read_entries(&ctx.store.effort_log_path(&effort.id))?;
        let raw_tokens = ctx.estimator.count_entries(&entries);

        let mut report = json!({
            "id": effort.id,
            "status": effort.status,
            "active": effort.active,
            "raw_tokens": raw_tokens,
        });
        if let Some(summary) = &effort.summary {
            let summary_tokens = ctx.estimator.count(summary);
            report["summary"] = json!(summary);
            report["summary_tokens"] = json!(summary_tokens);
            report["token_savings_pct"] = json!(savings_pct(raw_tokens, summary_tokens).round());
        }
        efforts.push(report);
    }

    Ok(ToolOutcome::ok(
        json!({
            "turn": counter.turn_count,
            "efforts": efforts,
            "expanded": expanded.ids(),
        }),
        None,
    ))
}

async fn search_efforts(
    ctx: &ToolContext<'_>,
    args: SearchArgs,
) -> Result<ToolOutcome, EngineError> {
    let manifest = Manifest::load(ctx.store)?;
    let query_keywords = extract_keywords(&args.query);

    let mut matches: Vec<(usize, Value)> = Vec::new();
    for effort in manifest.get_concluded() {
        let mut haystack = extract_keywords(&effort.id.replace('-', " "));
        if let Some(summary) = &effort.summary {
            haystack.extend(extract_keywords(summary));
        }
        let score = keyword_overlap(&query_keywords, &haystack);
        if score > 0 {
            matches.push((
                score,
                json!({
                    "id": effort.id,
                    "summary": effort.summary,
                    "score": score,
                }),
            ));
        }
    }
    matches.sort_by(|a, b| b.0.cmp(&a.0));

    let results: Vec<Value> = matches.into_iter().map(|(_, v)| v).collect();
    Ok(ToolOutcome::ok(
        json!({
            "query": args.query,
            "matches": results,
        }),
        None,
    ))
}
