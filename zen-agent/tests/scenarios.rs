//! End-to-end scenarios over the full loop with a scripted model.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use zen_agent::agent::state::RunStatus;
use zen_agent::agent::{Goal, ZenAgent, ZenAgentConfig};
use zen_agent::event::{AgentEvent, EventLog};
use zen_agent::llm::mock::ScriptedLlm;
use zen_agent::plugin::{SilaPlugin, SilaRule};
use zen_agent::resilience::RetryPolicy;
use zen_agent::runtime::{TaskDef, TaskScheduler, TaskStatus};
use zen_agent::store::{KarmaEntry, KarmaStore, KarmaType, Severity};
use zen_agent::tool::{FileReadTool, FileWriteTool, Tool, ToolResult};

fn delta(progress: f64, gaps: &[&str], complete: bool) -> Value {
    json!({
        "description": "assessed progress",
        "progress": progress,
        "gaps": gaps,
        "isComplete": complete,
    })
}

/// S1 — happy-path run with file tools and no karma store.
#[tokio::test]
async fn s1_happy_path_read_then_write() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("foo.txt"), "the quick brown fox").unwrap();

    let llm = Arc::new(
        ScriptedLlm::new()
            .push_completion_json(&delta(0.5, &["no summary"], false))
            .push_completion_json(&delta(0.5, &["no summary"], false))
            .push_completion_json(&delta(1.0, &[], true))
            .push_tool_call("file_read", json!({"path": "foo.txt"}))
            .push_tool_call("file_write", json!({"path": "summary.txt", "contents": "a fox ran"})),
    );

    let config = ZenAgentConfig::new(
        Goal::new("Read foo.txt and write summary.txt"),
        Arc::clone(&llm) as _,
    )
    .with_tool(Arc::new(FileReadTool::rooted(dir.path())))
    .with_tool(Arc::new(FileWriteTool::rooted(dir.path())));
    let mut agent = ZenAgent::new(config).unwrap();

    let log = EventLog::new();
    log.attach(agent.events());

    let report = agent.run().await.unwrap();

    assert_eq!(report.status, RunStatus::Done);
    assert_eq!(report.step_count, 2);
    assert!(report.usage.total_tokens > 0);
    assert_eq!(log.count("milestone:reached"), 1);
    assert_eq!(log.count("agent:complete"), 1);
    assert_eq!(log.count("action:complete"), 2);
    // The write produced an artifact.
    assert_eq!(log.count("artifact:created"), 1);
    assert_eq!(
        std::fs::read_to_string(dir.path().join("summary.txt")).unwrap(),
        "a fox ran"
    );

    // Per-step event ordering is part of the contract.
    assert_eq!(
        log.names(),
        vec![
            "agent:start",
            "step:start",
            "delta:computed",
            "action:complete",
            "step:end",
            "step:start",
            "delta:computed",
            "action:complete",
            "artifact:created",
            "step:end",
            "step:start",
            "delta:computed",
            "milestone:reached",
            "step:end",
            "agent:complete",
        ]
    );
}

/// S2 — an ethics rule vetoes every delta; the veto budget ends the run.
#[tokio::test]
async fn s2_veto_stop() {
    let llm = Arc::new(
        ScriptedLlm::new()
            .push_completion_json(&delta(0.1, &["must delete production data"], false))
            .push_completion_json(&delta(0.1, &["still planning to delete production"], false)),
    );

    let config = ZenAgentConfig::new(Goal::new("clean up the database"), Arc::clone(&llm) as _)
        .with_max_vetoes(2);
    let mut agent = ZenAgent::new(config).unwrap();
    agent
        .attach_plugin(Arc::new(SilaPlugin::new(vec![SilaRule::new(
            "delete production",
            "refusing to touch production data",
        )])))
        .await
        .unwrap();

    let log = EventLog::new();
    log.attach(agent.events());

    let report = agent.run().await.unwrap();

    assert_eq!(report.status, RunStatus::Vetoed);
    // No decision was ever made: vetoes abort the step before DECIDE.
    assert_eq!(llm.chat_calls(), 0);
    assert_eq!(log.count("delta:computed"), 2);
    assert_eq!(log.count("action:complete"), 0);
}

/// A tool that always fails the same way.
#[derive(Debug)]
struct FlakyTool;

#[async_trait]
impl Tool for FlakyTool {
    fn name(&self) -> &str {
        "flaky"
    }

    fn description(&self) -> String {
        "A tool that never works".to_owned()
    }

    fn parameters(&self) -> Value {
        json!({"type": "object"})
    }

    async fn execute(&self, _params: Value) -> ToolResult {
        ToolResult::fail("timeout")
    }
}

/// S3 — three identical failures trip the tanha loop and redirect DECIDE.
#[tokio::test]
async fn s3_tanha_loop() {
    let mut llm = ScriptedLlm::new();
    for _ in 0..4 {
        llm = llm
            .push_completion_json(&delta(0.1, &["tool keeps timing out"], false))
            .push_tool_call("flaky", json!({}));
    }
    let llm = Arc::new(llm);

    let config = ZenAgentConfig::new(Goal::new("use the flaky tool"), Arc::clone(&llm) as _)
        .with_tool(Arc::new(FlakyTool))
        .with_retry(RetryPolicy::none())
        .with_max_steps(4);
    let mut agent = ZenAgent::new(config).unwrap();

    let log = EventLog::new();
    log.attach(agent.events());

    agent.run().await.unwrap();

    let tanha: Vec<(String, u32)> = log
        .events()
        .iter()
        .filter_map(|event| match event {
            AgentEvent::TanhaLoopDetected { pattern, count } => {
                Some((pattern.clone(), *count))
            }
            _ => None,
        })
        .collect();
    assert_eq!(tanha, vec![("flaky:timeout".to_owned(), 3)]);

    // The fourth decision prompt carries the alternative-approach nudge.
    let prompts = llm.chat_prompts();
    assert_eq!(prompts.len(), 4);
    assert!(!prompts[2].contains("alternative approach"));
    assert!(prompts[3].contains("alternative approach"));
}

/// S4 — scheduler dequeues by ascending priority; re-enqueue is a no-op.
#[test]
fn s4_scheduler_priority() {
    let mut scheduler = TaskScheduler::new();
    scheduler.enqueue(TaskDef::new("A", 10));
    scheduler.enqueue(TaskDef::new("B", 1));
    scheduler.enqueue(TaskDef::new("C", 5));

    assert_eq!(scheduler.dequeue().unwrap().goal, "B");
    assert_eq!(scheduler.dequeue().unwrap().goal, "C");
    assert_eq!(scheduler.dequeue().unwrap().goal, "A");

    let before: usize = scheduler.pending_len();
    assert!(!scheduler.enqueue(TaskDef::new("A", 10)));
    assert_eq!(scheduler.pending_len(), before);
}

/// S5 — a queue file holding a running task recovers it as pending.
#[test]
fn s5_crash_recovery() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("task-queue.json");

    let state = json!({
        "queue": [{
            "id": "task-t",
            "goal": "finish the report",
            "priority": 3,
            "createdAt": "2026-07-01T08:00:00Z",
            "status": "running",
            "maxSteps": 12
        }],
        "history": []
    });
    std::fs::write(&path, serde_json::to_string_pretty(&state).unwrap()).unwrap();

    let scheduler = TaskScheduler::new().with_path(&path).unwrap();
    let pending = scheduler.get_pending();
    assert_eq!(pending.len(), 1);
    let recovered = &pending[0];
    assert_eq!(recovered.status, TaskStatus::Pending);
    assert_eq!(recovered.id, "task-t");
    assert_eq!(recovered.goal, "finish the report");
    assert_eq!(recovered.priority, 3);
    assert_eq!(recovered.max_steps, Some(12));
}

/// S6 — causal chains resolve in stored order.
#[tokio::test]
async fn s6_karma_causal_chain() {
    let mut store = KarmaStore::new(None, None);
    let root = store
        .store(KarmaEntry::new("root", "c", Severity::Med, "t", KarmaType::Unskillful))
        .await
        .unwrap();
    let effect1 = store
        .store(
            KarmaEntry::new("effect1", "c", Severity::Med, "t", KarmaType::Unskillful)
                .with_causal_chain(vec![root.clone()]),
        )
        .await
        .unwrap();
    let effect2 = store
        .store(
            KarmaEntry::new("effect2", "c", Severity::Med, "t", KarmaType::Unskillful)
                .with_causal_chain(vec![root.clone(), effect1.clone()]),
        )
        .await
        .unwrap();

    let chain = store.trace_causal_chain(&effect2);
    let proverbs: Vec<&str> = chain.iter().map(|entry| entry.proverb.as_str()).collect();
    assert_eq!(proverbs, vec!["root", "effect1"]);
}
