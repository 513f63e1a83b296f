//! End-to-end scenarios driven through the execution coordinator with mock
//! executors and an in-memory store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use weft_engine::ExecutionCoordinator;
use weft_executor::{
  ExecutionContext, ExecutorError, ExecutorRegistry, ItemProcessor, NodeExecutor, mock,
};
use weft_plan::StepKind;
use weft_store::{NodeStatus, RunStatus, SqliteStore, Store};

async fn coordinator(registry: ExecutorRegistry) -> ExecutionCoordinator {
  coordinator_with(registry, weft_config::EngineSettings::default()).await
}

async fn coordinator_with(
  registry: ExecutorRegistry,
  settings: weft_config::EngineSettings,
) -> ExecutionCoordinator {
  let store = Arc::new(SqliteStore::connect_in_memory().await.unwrap());
  ExecutionCoordinator::new(settings, registry, store)
}

fn node(id: &str, node_type: &str) -> Value {
  json!({"id": id, "type": node_type})
}

fn control_edge(source: &str, target: &str) -> Value {
  json!({"source": source, "target": target, "isControl": true})
}

fn data_edge(source: &str, target: &str) -> Value {
  json!({"source": source, "target": target})
}

/// A pass-through node whose processor waits until every participant has
/// arrived, proving the branches run concurrently.
struct Rendezvous {
  node_type: String,
  barrier: Arc<tokio::sync::Barrier>,
}

impl NodeExecutor for Rendezvous {
  fn node_type(&self) -> &str {
    &self.node_type
  }

  fn create_processor(
    &self,
    _ctx: &ExecutionContext,
  ) -> Result<Box<dyn ItemProcessor>, ExecutorError> {
    Ok(Box::new(RendezvousProcessor {
      barrier: self.barrier.clone(),
    }))
  }
}

struct RendezvousProcessor {
  barrier: Arc<tokio::sync::Barrier>,
}

#[async_trait]
impl ItemProcessor for RendezvousProcessor {
  async fn process(&self, item: Value) -> Result<Option<Value>, ExecutorError> {
    self.barrier.wait().await;
    Ok(Some(item))
  }
}

/// A pass-through node whose processor sleeps, so a cancel request lands
/// mid-run.
struct Slow {
  node_type: String,
}

impl NodeExecutor for Slow {
  fn node_type(&self) -> &str {
    &self.node_type
  }

  fn create_processor(
    &self,
    _ctx: &ExecutionContext,
  ) -> Result<Box<dyn ItemProcessor>, ExecutorError> {
    Ok(Box::new(SlowProcessor))
  }
}

struct SlowProcessor;

#[async_trait]
impl ItemProcessor for SlowProcessor {
  async fn process(&self, item: Value) -> Result<Option<Value>, ExecutorError> {
    tokio::time::sleep(Duration::from_millis(10)).await;
    Ok(Some(item))
  }
}

// --- Scenario: simple linear ETL ---------------------------------------

fn linear_payload() -> Value {
  json!({
    "workflow": {
      "id": "wf-linear",
      "name": "linear etl",
      "nodes": [
        node("Start", "Start"),
        json!({"id": "Source", "type": "FileSource",
               "config": {"records": [{"v": 1}, {"v": 2}, {"v": 3}]}}),
        node("Filter", "Filter"),
        node("Sink", "FileSink"),
        node("End", "End"),
      ],
      "edges": [
        control_edge("Start", "Source"),
        data_edge("Source", "Filter"),
        data_edge("Filter", "Sink"),
        control_edge("Sink", "End"),
      ]
    }
  })
}

#[tokio::test]
async fn linear_etl_runs_to_success() {
  let registry = ExecutorRegistry::new();
  registry.register(mock::source("FileSource"));
  registry.register(mock::passthrough("Filter"));
  let sink = mock::sink("FileSink");
  registry.register(sink.clone());
  registry.register(mock::passthrough("End"));

  let coordinator = coordinator(registry).await;

  let (_, plan, _) = coordinator.compile_submission(linear_payload()).unwrap();
  assert_eq!(plan.entry_step_ids, vec!["Source"]);
  assert!(plan.steps.values().all(|s| s.kind == StepKind::Normal));

  let summary = coordinator
    .run_submission(linear_payload(), "parallel")
    .await
    .unwrap();
  assert_eq!(summary.status, RunStatus::Success);

  let row = coordinator
    .store()
    .get_execution(&summary.execution_id)
    .await
    .unwrap();
  assert_eq!(row.status, RunStatus::Success);
  assert_eq!(row.total_nodes, 4);
  assert_eq!(row.completed_nodes, 4);
  assert_eq!(row.successful_nodes, 4);
  assert_eq!(row.failed_nodes, 0);
  assert!(row.end_time.is_some());

  assert_eq!(sink.records(), vec![json!({"v": 1}), json!({"v": 2}), json!({"v": 3})]);

  let logs = coordinator
    .store()
    .list_logs(&summary.execution_id)
    .await
    .unwrap();
  assert!(logs.iter().any(|l| l.message == "workflow completed"));
}

// --- Scenario: explicit fork/join --------------------------------------

fn fork_payload() -> Value {
  json!({
    "workflow": {
      "id": "wf-fork",
      "name": "fork join",
      "nodes": [
        node("Start", "Start"),
        json!({"id": "Fork", "type": "Replicate",
               "config": {"records": [{"v": 1}]},
               "executionHints": {"mode": "PARALLEL", "joinNodeId": "J"}}),
        node("A", "BranchWork"),
        node("B", "BranchWork"),
        node("J", "Join"),
        node("End", "End"),
      ],
      "edges": [
        control_edge("Start", "Fork"),
        data_edge("Fork", "A"),
        data_edge("Fork", "B"),
        data_edge("A", "J"),
        data_edge("B", "J"),
        control_edge("J", "End"),
      ]
    }
  })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fork_branches_run_concurrently_and_join_once() {
  let registry = ExecutorRegistry::new();
  registry.register(mock::source("Replicate"));
  registry.register(Arc::new(Rendezvous {
    node_type: "BranchWork".to_string(),
    barrier: Arc::new(tokio::sync::Barrier::new(2)),
  }));
  registry.register(mock::passthrough("Join"));
  registry.register(mock::passthrough("End"));

  let coordinator = coordinator(registry).await;

  // Both branches must be in flight at once for the rendezvous to pass;
  // a serialized schedule would deadlock and trip the timeout.
  let summary = tokio::time::timeout(
    Duration::from_secs(5),
    coordinator.run_submission(fork_payload(), "parallel"),
  )
  .await
  .expect("branches did not run concurrently")
  .unwrap();
  assert_eq!(summary.status, RunStatus::Success);

  let nodes = coordinator
    .store()
    .list_node_executions(&summary.execution_id)
    .await
    .unwrap();
  let join_rows: Vec<_> = nodes.iter().filter(|n| n.node_id == "J").collect();
  assert_eq!(join_rows.len(), 1, "join must execute exactly once");
  assert_eq!(join_rows[0].status, NodeStatus::Success);
}

// --- Scenario: missing join in strict mode ------------------------------

#[tokio::test]
async fn fork_without_join_is_rejected_in_strict_mode() {
  let registry = ExecutorRegistry::new();
  registry.register(mock::source("Replicate"));
  registry.register(mock::passthrough("BranchWork"));
  registry.register(mock::passthrough("Join"));
  registry.register(mock::passthrough("End"));

  let coordinator = coordinator(registry).await;

  let mut payload = fork_payload();
  payload["workflow"]["nodes"][1]
    .as_object_mut()
    .unwrap()
    .remove("executionHints");

  let err = coordinator
    .run_submission(payload, "parallel")
    .await
    .unwrap_err();
  let message = err.to_string();
  assert!(message.contains("FORK node 'Fork'"));
  assert!(message.contains("joinNodeId"));
  assert!(message.contains('2'));

  // Rejected submissions never create a run row.
  let runs = coordinator.store().list_executions("wf-fork").await.unwrap();
  assert!(runs.is_empty());
}

// --- Scenario: cycle ----------------------------------------------------

#[tokio::test]
async fn cyclic_workflow_is_rejected_before_any_run() {
  let registry = ExecutorRegistry::new();
  registry.register(mock::passthrough("Transform"));

  let coordinator = coordinator(registry).await;

  let payload = json!({
    "workflow": {
      "id": "wf-cycle",
      "name": "cycle",
      "nodes": [
        node("Start", "Start"),
        node("A", "Transform"),
        node("B", "Transform"),
      ],
      "edges": [
        control_edge("Start", "A"),
        data_edge("A", "B"),
        data_edge("B", "A"),
      ]
    }
  });

  let err = coordinator.run_submission(payload, "parallel").await.unwrap_err();
  let message = err.to_string();
  assert!(message.contains("Cycle detected"));
  assert!(message.contains('A'));
  assert!(message.contains('B'));

  let runs = coordinator.store().list_executions("wf-cycle").await.unwrap();
  assert!(runs.is_empty());
}

// --- Scenario: port routing through a multi-output node ------------------

#[tokio::test]
async fn records_route_by_port_with_unknown_falling_to_default() {
  let registry = ExecutorRegistry::new();
  registry.register(mock::source("FileSource"));
  registry.register(mock::passthrough("Router"));
  let sink1 = mock::sink("SinkA");
  let sink2 = mock::sink("SinkB");
  let sink_default = mock::sink("SinkC");
  registry.register(sink1.clone());
  registry.register(sink2.clone());
  registry.register(sink_default.clone());

  let coordinator = coordinator(registry).await;

  let payload = json!({
    "workflow": {
      "id": "wf-switch",
      "name": "switch routing",
      "nodes": [
        node("Start", "Start"),
        json!({"id": "Source", "type": "FileSource",
               "config": {"records": [
                 {"_routePort": "out1", "v": 1},
                 {"_routePort": "out2", "v": 2},
                 {"_routePort": "unknown", "v": 3},
               ]}}),
        node("Router", "Router"),
        node("Sink1", "SinkA"),
        node("Sink2", "SinkB"),
        node("SinkDefault", "SinkC"),
      ],
      "edges": [
        control_edge("Start", "Source"),
        data_edge("Source", "Router"),
        json!({"source": "Router", "target": "Sink1", "sourceHandle": "out1"}),
        json!({"source": "Router", "target": "Sink2", "sourceHandle": "out2"}),
        json!({"source": "Router", "target": "SinkDefault", "sourceHandle": "default"}),
      ]
    }
  });

  let summary = coordinator.run_submission(payload, "parallel").await.unwrap();
  assert_eq!(summary.status, RunStatus::Success);

  assert_eq!(sink1.records(), vec![json!({"_routePort": "out1", "v": 1})]);
  assert_eq!(sink2.records(), vec![json!({"_routePort": "out2", "v": 2})]);
  assert_eq!(
    sink_default.records(),
    vec![json!({"_routePort": "unknown", "v": 3})]
  );
}

// --- Scenario: partial restart from failed nodes -------------------------

fn restart_payload() -> Value {
  json!({
    "workflow": {
      "id": "wf-restart",
      "name": "restart",
      "nodes": [
        node("Start", "Start"),
        json!({"id": "A", "type": "FileSource",
               "config": {"records": [{"v": 1}]}}),
        node("C", "SinkA"),
        node("B", "Flaky"),
        node("D", "SinkB"),
      ],
      "edges": [
        control_edge("Start", "A"),
        data_edge("A", "C"),
        data_edge("A", "B"),
        data_edge("B", "D"),
      ]
    }
  })
}

#[tokio::test]
async fn restart_from_failed_reruns_only_the_failed_closure() {
  let registry = ExecutorRegistry::new();
  registry.register(mock::source("FileSource"));
  registry.register(mock::sink("SinkA"));
  registry.register(mock::sink("SinkB"));
  registry.register(mock::flaky("Flaky", 1));

  let coordinator = coordinator(registry).await;

  let failed = coordinator
    .run_submission(restart_payload(), "parallel")
    .await
    .unwrap();
  assert_eq!(failed.status, RunStatus::Failed);
  assert!(failed.error_message.as_deref().unwrap_or("").contains("B"));

  let first_nodes = coordinator
    .store()
    .list_node_executions(&failed.execution_id)
    .await
    .unwrap();
  let status_of = |id: &str| first_nodes.iter().find(|n| n.node_id == id).map(|n| n.status);
  assert_eq!(status_of("A"), Some(NodeStatus::Success));
  assert_eq!(status_of("C"), Some(NodeStatus::Success));
  assert_eq!(status_of("B"), Some(NodeStatus::Failed));
  assert_eq!(status_of("D"), None, "D never ran in the failed run");

  // The scripted failure is exhausted; the restart succeeds.
  let restarted = coordinator
    .restart_from_failed(&failed.execution_id)
    .await
    .unwrap();
  assert_eq!(restarted.status, RunStatus::Success);

  let row = coordinator
    .store()
    .get_execution(&restarted.execution_id)
    .await
    .unwrap();
  assert_eq!(row.workflow_id, "wf-restart_restart");
  assert_eq!(row.total_nodes, 2);

  let rerun_nodes = coordinator
    .store()
    .list_node_executions(&restarted.execution_id)
    .await
    .unwrap();
  let mut rerun_ids: Vec<&str> = rerun_nodes.iter().map(|n| n.node_id.as_str()).collect();
  rerun_ids.sort_unstable();
  assert_eq!(rerun_ids, ["B", "D"]);
}

// --- Scenario: buffer overflow -------------------------------------------

#[tokio::test]
async fn buffer_overflow_fails_the_run_with_a_typed_message() {
  let registry = ExecutorRegistry::new();
  registry.register(mock::source("FileSource"));
  registry.register(mock::sink("FileSink"));

  let mut settings = weft_config::EngineSettings::default();
  settings.edge_buffer.max_records = 5;
  let coordinator = coordinator_with(registry, settings).await;

  let records: Vec<Value> = (0..6).map(|i| json!({"v": i})).collect();
  let payload = json!({
    "workflow": {
      "id": "wf-overflow",
      "name": "overflow",
      "nodes": [
        node("Start", "Start"),
        json!({"id": "Source", "type": "FileSource", "config": {"records": records}}),
        node("Sink", "FileSink"),
      ],
      "edges": [
        control_edge("Start", "Source"),
        data_edge("Source", "Sink"),
      ]
    }
  });

  let summary = coordinator.run_submission(payload, "parallel").await.unwrap();
  assert_eq!(summary.status, RunStatus::Failed);
  let message = summary.error_message.unwrap();
  assert!(message.contains("Edge buffer overflow"));
  assert!(message.contains("limit=5"));
}

// --- Retry and skip policies ----------------------------------------------

#[tokio::test]
async fn retries_recover_a_flaky_step_within_budget() {
  let registry = ExecutorRegistry::new();
  registry.register(mock::source("FileSource"));
  let flaky = mock::flaky("Flaky", 2);
  registry.register(flaky.clone());
  let sink = mock::sink("FileSink");
  registry.register(sink.clone());

  let coordinator = coordinator(registry).await;

  let payload = json!({
    "workflow": {
      "id": "wf-retry",
      "name": "retry",
      "nodes": [
        node("Start", "Start"),
        json!({"id": "Source", "type": "FileSource", "config": {"records": [{"v": 1}]}}),
        json!({"id": "Work", "type": "Flaky", "onFailure": {"maxRetries": 2, "action": "FAIL"}}),
        node("Sink", "FileSink"),
      ],
      "edges": [
        control_edge("Start", "Source"),
        data_edge("Source", "Work"),
        data_edge("Work", "Sink"),
      ]
    }
  });

  let summary = coordinator.run_submission(payload, "parallel").await.unwrap();
  assert_eq!(summary.status, RunStatus::Success);
  // Two scripted failures, then the third attempt passes.
  assert_eq!(flaky.attempts(), 3);

  let nodes = coordinator
    .store()
    .list_node_executions(&summary.execution_id)
    .await
    .unwrap();
  let work = nodes.iter().find(|n| n.node_id == "Work").unwrap();
  assert_eq!(work.status, NodeStatus::Success);
  assert_eq!(work.retry_count, 2);
  assert_eq!(sink.records(), vec![json!({"v": 1})]);
}

#[tokio::test]
async fn skip_policy_drops_the_bad_record_and_continues() {
  let registry = ExecutorRegistry::new();
  registry.register(mock::source("FileSource"));
  registry.register(mock::flaky("Flaky", 1));
  let sink = mock::sink("FileSink");
  registry.register(sink.clone());

  let coordinator = coordinator(registry).await;

  let payload = json!({
    "workflow": {
      "id": "wf-skip",
      "name": "skip",
      "nodes": [
        node("Start", "Start"),
        json!({"id": "Source", "type": "FileSource",
               "config": {"records": [{"v": 1}, {"v": 2}]}}),
        json!({"id": "Work", "type": "Flaky", "onFailure": {"action": "SKIP_RECORD"}}),
        node("Sink", "FileSink"),
      ],
      "edges": [
        control_edge("Start", "Source"),
        data_edge("Source", "Work"),
        data_edge("Work", "Sink"),
      ]
    }
  });

  let summary = coordinator.run_submission(payload, "parallel").await.unwrap();
  assert_eq!(summary.status, RunStatus::Success);

  // The first record was dropped, the second flowed through.
  assert_eq!(sink.records(), vec![json!({"v": 2})]);

  let nodes = coordinator
    .store()
    .list_node_executions(&summary.execution_id)
    .await
    .unwrap();
  let work = nodes.iter().find(|n| n.node_id == "Work").unwrap();
  assert_eq!(work.records_processed, 1);
}

// --- Unsupported node kinds ----------------------------------------------

#[tokio::test]
async fn decision_nodes_are_refused_by_the_scheduler() {
  let registry = ExecutorRegistry::new();
  registry.register(mock::source("FileSource"));
  registry.register(mock::passthrough("Switch"));
  registry.register(mock::sink("FileSink"));

  let coordinator = coordinator(registry).await;

  let payload = json!({
    "workflow": {
      "id": "wf-decision",
      "name": "decision",
      "nodes": [
        node("Start", "Start"),
        json!({"id": "Source", "type": "FileSource", "config": {"records": []}}),
        node("Switch", "Switch"),
        node("Sink", "FileSink"),
      ],
      "edges": [
        control_edge("Start", "Source"),
        data_edge("Source", "Switch"),
        data_edge("Switch", "Sink"),
      ]
    }
  });

  // Compilation admits the DECISION; the scheduler refuses to run it.
  let summary = coordinator.run_submission(payload, "parallel").await.unwrap();
  assert_eq!(summary.status, RunStatus::Failed);
  let message = summary.error_message.unwrap();
  assert!(message.contains("unsupported"));
  assert!(message.contains("Switch"));
}

// --- Cancellation ---------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_drives_a_running_execution_to_cancelled() {
  let registry = ExecutorRegistry::new();
  registry.register(mock::source("FileSource"));
  registry.register(Arc::new(Slow {
    node_type: "SlowWork".to_string(),
  }));
  registry.register(mock::sink("FileSink"));

  let coordinator = coordinator(registry).await;

  let records: Vec<Value> = (0..500).map(|i| json!({"v": i})).collect();
  let payload = json!({
    "workflow": {
      "id": "wf-cancel",
      "name": "cancel",
      "nodes": [
        node("Start", "Start"),
        json!({"id": "Source", "type": "FileSource", "config": {"records": records}}),
        json!({"id": "Work", "type": "SlowWork",
               "executionHints": {"mode": "SERIAL", "chunkSize": 1}}),
        node("Sink", "FileSink"),
      ],
      "edges": [
        control_edge("Start", "Source"),
        data_edge("Source", "Work"),
        data_edge("Work", "Sink"),
      ]
    }
  });

  let execution_id = coordinator.submit(payload, "parallel").await.unwrap();

  // Cancel while the slow step grinds through its chunks.
  tokio::time::sleep(Duration::from_millis(50)).await;
  assert!(coordinator.cancel(&execution_id).await.unwrap());
  // A second cancel loses: the status is no longer `running`.
  assert!(!coordinator.cancel(&execution_id).await.unwrap());

  let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
  let final_status = loop {
    let row = coordinator.store().get_execution(&execution_id).await.unwrap();
    if row.status.is_terminal() {
      break row.status;
    }
    assert!(
      tokio::time::Instant::now() < deadline,
      "run did not reach a terminal status"
    );
    tokio::time::sleep(Duration::from_millis(20)).await;
  };
  assert_eq!(final_status, RunStatus::Cancelled);
}

// --- Restart from an arbitrary node ---------------------------------------

#[tokio::test]
async fn restart_from_node_runs_the_forward_reach_only() {
  let registry = ExecutorRegistry::new();
  registry.register(mock::source("FileSource"));
  registry.register(mock::passthrough("Filter"));
  let sink = mock::sink("FileSink");
  registry.register(sink.clone());
  registry.register(mock::passthrough("End"));

  let coordinator = coordinator(registry).await;

  let first = coordinator
    .run_submission(linear_payload(), "parallel")
    .await
    .unwrap();
  assert_eq!(first.status, RunStatus::Success);

  let summary = coordinator
    .restart_from_node(&first.execution_id, "Sink")
    .await
    .unwrap();
  assert_eq!(summary.status, RunStatus::Success);

  let nodes = coordinator
    .store()
    .list_node_executions(&summary.execution_id)
    .await
    .unwrap();
  let mut ids: Vec<&str> = nodes.iter().map(|n| n.node_id.as_str()).collect();
  ids.sort_unstable();
  assert_eq!(ids, ["End", "Sink"]);
}
