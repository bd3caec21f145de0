//! Integration tests for the multi-turn conversation driver against real
//! A2A agent servers on loopback.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agent_arena::a2a::{
    A2aClient, AgentCard, AgentExecutor, AgentReply, AgentRequest, AgentServer, AgentSkill,
    Message,
};
use agent_arena::driver::{
    A2aSolverChannel, Action, ConversationDriver, EnvConfig, EnvReset, EnvStep, Environment,
    EnvironmentFactory, SolverChannel, TauEvaluatorAgent,
};
use agent_arena::A2aError;
use async_trait::async_trait;
use serde_json::{json, Map, Value};

/// Solver that answers each turn from a script and records what it saw.
struct ScriptedSolver {
    replies: Vec<String>,
    turns: AtomicUsize,
    seen: Mutex<Vec<(String, String)>>,
}

impl ScriptedSolver {
    fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: replies.iter().map(|r| r.to_string()).collect(),
            turns: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl AgentExecutor for ScriptedSolver {
    async fn execute(&self, request: AgentRequest) -> AgentReply {
        let turn = self.turns.fetch_add(1, Ordering::SeqCst);
        self.seen
            .lock()
            .unwrap()
            .push((request.context_id.clone(), request.text.clone()));
        let reply = self
            .replies
            .get(turn)
            .or(self.replies.last())
            .cloned()
            .unwrap_or_default();
        AgentReply::completed(reply)
    }
}

/// Environment whose only tool is `find_user`; responding ends the task.
struct SupportDesk {
    tools: Vec<Value>,
    actions: Arc<Mutex<Vec<Action>>>,
}

impl SupportDesk {
    fn new(actions: Arc<Mutex<Vec<Action>>>) -> Self {
        Self {
            tools: vec![json!({
                "type": "function",
                "function": {"name": "find_user", "parameters": {"type": "object"}}
            })],
            actions,
        }
    }
}

#[async_trait]
impl Environment for SupportDesk {
    fn wiki(&self) -> &str {
        "# Support desk policy"
    }

    fn tools_info(&self) -> &[Value] {
        &self.tools
    }

    async fn reset(&mut self, task_index: usize) -> anyhow::Result<EnvReset> {
        let mut info = Map::new();
        info.insert("task_index".to_string(), json!(task_index));
        Ok(EnvReset {
            observation: "Hi, I forgot my user id.".to_string(),
            info,
        })
    }

    async fn step(&mut self, action: &Action) -> anyhow::Result<EnvStep> {
        self.actions.lock().unwrap().push(action.clone());
        if action.is_respond() {
            let mut info = Map::new();
            info.insert("resolved".to_string(), json!(true));
            return Ok(EnvStep {
                observation: "###STOP###".to_string(),
                reward: 1.0,
                done: true,
                info,
            });
        }
        Ok(EnvStep {
            observation: "{\"user_id\": \"u-42\"}".to_string(),
            reward: 0.0,
            done: false,
            info: Map::new(),
        })
    }
}

const RESPOND: &str = "<json>{\"name\": \"respond\", \"kwargs\": {\"content\": \"Your id is u-42\"}}</json>";
const LOOKUP: &str = "Let me check. <json>{\"name\": \"find_user\", \"kwargs\": {\"email\": \"a@b.c\"}}</json>";

fn client() -> A2aClient {
    A2aClient::new(Duration::from_secs(10), Duration::from_secs(2)).expect("client")
}

fn card(name: &str) -> AgentCard {
    AgentCard::text_agent(
        name,
        "test agent",
        AgentSkill {
            id: name.to_string(),
            name: name.to_string(),
            description: String::new(),
            tags: vec![],
            examples: vec![],
        },
    )
}

#[tokio::test]
async fn test_respond_on_first_turn_ends_after_one_turn() {
    let solver = ScriptedSolver::new(&[RESPOND]);
    let server = AgentServer::new(card("solver"), solver.clone())
        .spawn("127.0.0.1:0")
        .await
        .expect("spawn");

    let actions = Arc::new(Mutex::new(Vec::new()));
    let mut env = SupportDesk::new(actions.clone());
    let driver = ConversationDriver::new(A2aSolverChannel::new(client(), server.url()), 10);

    let outcome = driver.run(&mut env, 3).await.expect("run");
    assert_eq!(outcome.reward, 1.0);
    assert_eq!(outcome.info["task_index"], 3);
    assert_eq!(outcome.info["resolved"], true);
    assert_eq!(solver.turns.load(Ordering::SeqCst), 1);
    assert_eq!(actions.lock().unwrap().len(), 1);

    let seen = solver.seen.lock().unwrap();
    assert!(seen[0].1.starts_with("# Support desk policy\n"));
    assert!(seen[0].1.ends_with("User message: Hi, I forgot my user id."));

    server.close().await;
}

#[tokio::test]
async fn test_tool_turn_then_respond_keeps_context() {
    let solver = ScriptedSolver::new(&[LOOKUP, RESPOND]);
    let server = AgentServer::new(card("solver"), solver.clone())
        .spawn("127.0.0.1:0")
        .await
        .expect("spawn");

    let actions = Arc::new(Mutex::new(Vec::new()));
    let mut env = SupportDesk::new(actions.clone());
    let driver = ConversationDriver::new(A2aSolverChannel::new(client(), server.url()), 10);

    let outcome = driver.run(&mut env, 0).await.expect("run");
    assert_eq!(outcome.reward, 1.0);

    let actions = actions.lock().unwrap();
    assert_eq!(actions[0].name, "find_user");
    assert_eq!(actions[0].kwargs["email"], "a@b.c");
    assert!(actions[1].is_respond());

    let seen = solver.seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].0, seen[1].0, "context id must be reused");
    assert_eq!(seen[1].1, "Tool call result:\n{\"user_id\": \"u-42\"}");

    server.close().await;
}

#[tokio::test]
async fn test_turn_budget_bounds_conversation() {
    let solver = ScriptedSolver::new(&[LOOKUP]);
    let server = AgentServer::new(card("solver"), solver.clone())
        .spawn("127.0.0.1:0")
        .await
        .expect("spawn");

    let mut env = SupportDesk::new(Arc::new(Mutex::new(Vec::new())));
    let driver = ConversationDriver::new(A2aSolverChannel::new(client(), server.url()), 3);

    let outcome = driver.run(&mut env, 0).await.expect("run");
    assert_eq!(outcome.reward, 0.0);
    assert_eq!(solver.turns.load(Ordering::SeqCst), 3);

    server.close().await;
}

#[tokio::test]
async fn test_missing_decision_block_scores_zero() {
    let solver = ScriptedSolver::new(&["I think you should check your email."]);
    let server = AgentServer::new(card("solver"), solver.clone())
        .spawn("127.0.0.1:0")
        .await
        .expect("spawn");

    let mut env = SupportDesk::new(Arc::new(Mutex::new(Vec::new())));
    let driver = ConversationDriver::new(A2aSolverChannel::new(client(), server.url()), 5);

    let outcome = driver.evaluate(&mut env, 0).await;
    assert_eq!(outcome.reward, 0.0);
    assert!(outcome.error().unwrap_or_default().contains("<json>"));

    server.close().await;
}

/// Channel whose replies switch context ids after the first turn.
struct DriftingChannel {
    turns: AtomicUsize,
}

#[async_trait]
impl SolverChannel for DriftingChannel {
    async fn send(&self, _text: &str, _context_id: Option<&str>) -> Result<Message, A2aError> {
        let turn = self.turns.fetch_add(1, Ordering::SeqCst);
        let context = format!("ctx-{}", turn);
        Ok(Message::agent_text(LOOKUP, &context, None))
    }
}

#[tokio::test]
async fn test_context_mismatch_aborts_trial() {
    let mut env = SupportDesk::new(Arc::new(Mutex::new(Vec::new())));
    let driver = ConversationDriver::new(
        DriftingChannel {
            turns: AtomicUsize::new(0),
        },
        10,
    );

    let outcome = driver.evaluate(&mut env, 0).await;
    assert_eq!(outcome.reward, 0.0);
    let error = outcome.error().expect("error recorded");
    assert!(error.contains("expected 'ctx-0', got 'ctx-1'"), "{}", error);
}

#[tokio::test]
async fn test_unreachable_solver_is_transport_failure() {
    let mut env = SupportDesk::new(Arc::new(Mutex::new(Vec::new())));
    let driver = ConversationDriver::new(
        A2aSolverChannel::new(client(), "http://127.0.0.1:1"),
        5,
    );
    let outcome = driver.evaluate(&mut env, 0).await;
    assert_eq!(outcome.reward, 0.0);
    assert!(outcome.error().unwrap_or_default().starts_with("Solver transport failed"));
}

struct DeskFactory;

impl EnvironmentFactory for DeskFactory {
    fn create(&self, config: &EnvConfig, _task_index: usize) -> anyhow::Result<Box<dyn Environment>> {
        anyhow::ensure!(config.env == "support", "unknown env {}", config.env);
        Ok(Box::new(SupportDesk::new(Arc::new(Mutex::new(Vec::new())))))
    }
}

#[tokio::test]
async fn test_tau_evaluator_agent_end_to_end() {
    let solver = AgentServer::new(card("solver"), ScriptedSolver::new(&[LOOKUP, RESPOND]))
        .spawn("127.0.0.1:0")
        .await
        .expect("spawn solver");
    let evaluator = AgentServer::new(
        card("evaluator"),
        Arc::new(TauEvaluatorAgent::new(DeskFactory, client(), 10)),
    )
    .spawn("127.0.0.1:0")
    .await
    .expect("spawn evaluator");

    let request = format!(
        "Evaluate this agent.\n<white_agent_url>{}</white_agent_url>\n<env_config>{}</env_config>",
        solver.url(),
        json!({"env": "support", "task_ids": [7], "user_strategy": "llm"})
    );
    let response = client().send_text(&evaluator.url(), &request).await;
    assert!(
        response.starts_with("Finished. White agent success: ✅\nMetrics: "),
        "{}",
        response
    );

    let metrics: Value = serde_json::from_str(
        response
            .split_once("Metrics: ")
            .map(|(_, m)| m)
            .unwrap_or_default(),
    )
    .expect("metrics json");
    assert_eq!(metrics["success"], true);
    assert!(metrics["time_used"].as_f64().unwrap_or(-1.0) >= 0.0);

    evaluator.close().await;
    solver.close().await;
}
