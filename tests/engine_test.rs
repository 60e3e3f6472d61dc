//! 引擎集成测试：用脚本化 Mock LLM 驱动完整 ReAct 运行

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use hive::react::{EnginePhase, OutputValidator, SKIPPED_MARKER};
use hive::{
    AgentPrompts, EngineConfig, ExecuteOptions, ExecutionContext, MockLlmClient, ModelComplexity,
    ParamType, ReactEngine, ReactEvent, ToolDefinition, ToolHandler, ToolParam, ToolRegistry,
};

#[derive(Debug, Deserialize, PartialEq)]
struct Verdict {
    rating: String,
    score: i64,
}

fn validator() -> Arc<dyn OutputValidator<Verdict>> {
    Arc::new(|data: &Value| {
        serde_json::from_value::<Verdict>(data.clone()).map_err(|e| e.to_string())
    })
}

/// 固定返回成功的工具
struct OkTool {
    calls: AtomicUsize,
    payload: Value,
}

#[async_trait]
impl ToolHandler for OkTool {
    async fn call(&self, _params: Value, _ctx: &ExecutionContext) -> Result<Value, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.payload.clone())
    }
}

/// 固定失败的工具
struct FailTool {
    calls: AtomicUsize,
}

#[async_trait]
impl ToolHandler for FailTool {
    async fn call(&self, _params: Value, _ctx: &ExecutionContext) -> Result<Value, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err("upstream returned 503".to_string())
    }
}

/// 睡眠工具：用于超时场景
struct SlowTool {
    delay_ms: u64,
}

#[async_trait]
impl ToolHandler for SlowTool {
    async fn call(&self, _params: Value, _ctx: &ExecutionContext) -> Result<Value, String> {
        tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        Ok(json!({"done": true}))
    }
}

struct TestTools {
    registry: Arc<ToolRegistry>,
    primary: Arc<FailTool>,
    backup: Arc<OkTool>,
}

fn build_tools() -> TestTools {
    let primary = Arc::new(FailTool {
        calls: AtomicUsize::new(0),
    });
    let backup = Arc::new(OkTool {
        calls: AtomicUsize::new(0),
        payload: json!({"company": "ACME", "revenue": 120_000_000}),
    });

    let mut registry = ToolRegistry::new().with_backoff(Duration::from_millis(1));
    registry.register(ToolDefinition::new(
        "primary_lookup",
        "Fetch the company record from the primary source",
        vec![ToolParam::required("id", ParamType::String, "company id")],
        primary.clone(),
    ));
    registry.register(ToolDefinition::new(
        "backup_lookup",
        "Fetch the company record from the mirror",
        vec![ToolParam::required("id", ParamType::String, "company id")],
        backup.clone(),
    ));
    registry.register(ToolDefinition::new(
        "slow_scan",
        "Long running scan",
        vec![],
        Arc::new(SlowTool { delay_ms: 500 }),
    ));

    TestTools {
        registry: Arc::new(registry),
        primary,
        backup,
    }
}

fn prompts(registry: &ToolRegistry) -> AgentPrompts {
    AgentPrompts {
        system: "You are a diligence analyst.".to_string(),
        task_description: "Assess company ACME and produce a rating.".to_string(),
        available_tools_text: registry.tool_descriptions(),
        output_schema_text: "{rating: string, score: number}".to_string(),
        constraints: vec!["base every claim on tool evidence".to_string()],
    }
}

fn config(min_iterations: usize, max_iterations: usize) -> EngineConfig {
    EngineConfig {
        max_iterations,
        min_iterations,
        confidence_threshold: 70.0,
        early_stop_confidence: 85.0,
        total_timeout_ms: 5_000,
        tool_timeout_ms: 1_000,
        enable_self_critique: false,
        self_critique_threshold: 70.0,
        temperature: 0.2,
        model_complexity: ModelComplexity::Medium,
    }
}

/// 统一构造：工具执行不重试，失败断言可以精确计数
fn engine(llm: Arc<MockLlmClient>, tools: &TestTools, cfg: EngineConfig) -> ReactEngine<Verdict> {
    ReactEngine::new(
        llm,
        tools.registry.clone(),
        prompts(&tools.registry),
        validator(),
        cfg,
    )
    .with_tool_options(ExecuteOptions {
        retries: 0,
        ..ExecuteOptions::default()
    })
}

fn plan_json() -> String {
    json!({
        "main_goal": "assess ACME",
        "goals": [
            {"id": "g1", "description": "fetch the company record", "required_tools": ["primary_lookup"]},
            {"id": "g2", "description": "derive the rating"}
        ],
        "estimated_steps": 3,
        "critical_paths": ["g1"]
    })
    .to_string()
}

fn decision(action: Option<Value>, ready: bool, confidence: f64) -> String {
    json!({
        "thought": "weigh the current evidence",
        "thought_type": "analysis",
        "action": action,
        "ready_to_synthesize": ready,
        "confidence": confidence
    })
    .to_string()
}

fn synthesis_json(rating: &str, confidence: f64) -> String {
    json!({
        "data": {"rating": rating, "score": 82},
        "findings": [
            {"category": "valuation", "description": "trades below peer multiples",
             "confidence": 70, "evidence": ["backup_lookup revenue"]}
        ],
        "confidence": confidence,
        "supporting_evidence": ["company record"],
        "uncertainties": ["single-source revenue"]
    })
    .to_string()
}

// 场景：max 3 / min 1，第一次工具调用失败，备选成功，模型宣告 ready。
// 期望 success、trace >= 3 步、findings >= 1。
#[tokio::test]
async fn test_backtracking_scenario() {
    let tools = build_tools();
    let llm = Arc::new(MockLlmClient::scripted([
        plan_json(),
        decision(
            Some(json!({"tool": "primary_lookup", "parameters": {"id": "acme"},
                        "reasoning": "authoritative source"})),
            false,
            30.0,
        ),
        // primary_lookup 失败后的备选建议调用
        json!({"alternatives": [
            {"tool": "backup_lookup", "parameters": {"id": "acme"},
             "reasoning": "mirror has the same record", "priority": 8}
        ]})
        .to_string(),
        // 第二轮：模型不提动作，引擎机会性消费备选
        decision(None, false, 70.0),
        // 第三轮：证据足够
        decision(None, true, 90.0),
        synthesis_json("buy", 80.0),
    ]));

    let out = engine(llm, &tools, config(1, 3))
        .run(&ExecutionContext::new("deal-1"), "diligence")
        .await;

    assert!(out.success, "error: {:?}", out.error);
    assert_eq!(
        out.result.unwrap(),
        Verdict {
            rating: "buy".into(),
            score: 82
        }
    );
    assert!(!out.findings.is_empty());
    assert_eq!(out.findings[0].confidence, 74.0); // 70 + 1 条证据加成

    assert!(out.reasoning_trace.steps.len() >= 3);
    assert_eq!(out.reasoning_trace.iterations, 3);
    assert_eq!(tools.primary.calls.load(Ordering::SeqCst), 1);
    assert_eq!(tools.backup.calls.load(Ordering::SeqCst), 1);

    // 第二步执行了备选动作且成功
    let step2 = &out.reasoning_trace.steps[2];
    assert_eq!(step2.action.as_ref().unwrap().tool_name, "backup_lookup");
    assert!(step2.observation.as_ref().unwrap().success);
}

// 性质：同一 (tool, parameters) 失败后再次提出，不会再触达工具层
#[tokio::test]
async fn test_known_failed_action_is_skipped() {
    let tools = build_tools();
    let same_action = || {
        Some(json!({"tool": "primary_lookup", "parameters": {"id": "acme"},
                    "reasoning": "retry"}))
    };
    let llm = Arc::new(MockLlmClient::scripted([
        plan_json(),
        decision(same_action(), false, 30.0),
        json!({"alternatives": []}).to_string(),
        decision(same_action(), false, 35.0), // 与失败完全一致 -> 跳过
        decision(None, true, 90.0),
        synthesis_json("hold", 75.0),
    ]));

    let out = engine(llm, &tools, config(1, 3))
        .run(&ExecutionContext::new("deal-2"), "diligence")
        .await;

    assert!(out.success, "error: {:?}", out.error);
    // 底层工具只被调用一次；第二次提出走跳过路径
    assert_eq!(tools.primary.calls.load(Ordering::SeqCst), 1);

    let skipped = out.reasoning_trace.steps[2].observation.as_ref().unwrap();
    assert!(!skipped.success);
    assert_eq!(skipped.error.as_deref(), Some(SKIPPED_MARKER));
    assert_eq!(skipped.execution_time_ms, 0);
}

// 场景：总超时远小于工具耗时 -> success=false 且 error 含 timeout
#[tokio::test]
async fn test_total_timeout_aborts_run() {
    let tools = build_tools();
    let llm = Arc::new(
        MockLlmClient::scripted([
            plan_json(),
            decision(
                Some(json!({"tool": "slow_scan", "parameters": {}, "reasoning": "deep scan"})),
                false,
                30.0,
            ),
        ])
        .with_cost(0.01),
    );

    let mut cfg = config(1, 3);
    cfg.total_timeout_ms = 40; // slow_scan 睡 500ms
    cfg.tool_timeout_ms = 5_000;

    let out = engine(llm, &tools, cfg)
        .run(&ExecutionContext::new("deal-3"), "diligence")
        .await;

    assert!(!out.success);
    assert!(out
        .error
        .as_deref()
        .unwrap()
        .to_lowercase()
        .contains("timeout"));
    // 部分 trace 与累计成本保留
    assert!(!out.reasoning_trace.steps.is_empty());
    assert!(out.cost > 0.0);
    assert_eq!(out.confidence.score, 0.0);
}

// 迭代上界：模型一直不 ready 也会在 max_iterations 停下并综合
#[tokio::test]
async fn test_max_iterations_bound() {
    let tools = build_tools();
    let llm = Arc::new(MockLlmClient::scripted([
        plan_json(),
        decision(None, false, 20.0),
        decision(None, false, 25.0),
        synthesis_json("hold", 60.0),
    ]));

    let out = engine(llm, &tools, config(2, 2))
        .run(&ExecutionContext::new("deal-4"), "diligence")
        .await;

    assert!(out.success, "error: {:?}", out.error);
    assert_eq!(out.reasoning_trace.iterations, 2);
}

// 迭代下界：第一步就 ready 也要先跑满 min_iterations
#[tokio::test]
async fn test_min_iterations_bound() {
    let tools = build_tools();
    let llm = Arc::new(MockLlmClient::scripted([
        plan_json(),
        decision(None, true, 99.0),
        decision(None, true, 99.0),
        synthesis_json("buy", 90.0),
    ]));

    let out = engine(llm, &tools, config(2, 5))
        .run(&ExecutionContext::new("deal-5"), "diligence")
        .await;

    assert!(out.success);
    assert_eq!(out.reasoning_trace.iterations, 2);
}

// 提前停止：置信度达到 early_stop_confidence 即停，无需 ready 信号
#[tokio::test]
async fn test_early_stop_on_confidence() {
    let tools = build_tools();
    let llm = Arc::new(MockLlmClient::scripted([
        plan_json(),
        decision(None, false, 90.0),
        synthesis_json("buy", 85.0),
    ]));

    let out = engine(llm, &tools, config(1, 5))
        .run(&ExecutionContext::new("deal-6"), "diligence")
        .await;

    assert!(out.success);
    assert_eq!(out.reasoning_trace.iterations, 1);
}

// 自检：综合置信度低于阈值触发评审，数值调整进入最终置信度因子
#[tokio::test]
async fn test_self_critique_applies_adjustment() {
    let tools = build_tools();
    let llm = Arc::new(MockLlmClient::scripted([
        plan_json(),
        decision(None, true, 60.0),
        synthesis_json("hold", 50.0),
        json!({"verdict": "acceptable", "confidence_adjustment": 8, "issues": []}).to_string(),
    ]));

    let mut cfg = config(1, 3);
    cfg.enable_self_critique = true;

    let out = engine(llm, &tools, cfg)
        .run(&ExecutionContext::new("deal-7"), "diligence")
        .await;

    assert!(out.success, "error: {:?}", out.error);
    let adj = out
        .confidence
        .factors
        .iter()
        .find(|f| f.name == "critique_adjustment")
        .unwrap();
    assert_eq!(adj.value, 8.0);
    assert!(out
        .reasoning_trace
        .steps
        .iter()
        .any(|s| s.thought.content.contains("critique verdict: acceptable")));
}

// 自检：requires_revision 触发一步工具改进并重新综合
#[tokio::test]
async fn test_improvement_cycle_resynthesizes() {
    let tools = build_tools();
    let llm = Arc::new(MockLlmClient::scripted([
        plan_json(),
        decision(None, true, 60.0),
        synthesis_json("hold", 40.0),
        json!({"verdict": "requires_revision", "confidence_adjustment": -5,
               "issues": ["revenue figure unverified"]})
        .to_string(),
        // 改进步：这次真的去查数据
        decision(
            Some(json!({"tool": "backup_lookup", "parameters": {"id": "acme"},
                        "reasoning": "verify revenue"})),
            false,
            70.0,
        ),
        synthesis_json("buy", 80.0),
        json!({"verdict": "acceptable", "confidence_adjustment": 0, "issues": []}).to_string(),
    ]));

    let mut cfg = config(1, 4);
    cfg.enable_self_critique = true;

    let out = engine(llm, &tools, cfg)
        .run(&ExecutionContext::new("deal-8"), "diligence")
        .await;

    assert!(out.success, "error: {:?}", out.error);
    // 重新综合的结果取代第一次
    assert_eq!(out.result.unwrap().rating, "buy");
    assert_eq!(tools.backup.calls.load(Ordering::SeqCst), 1);
    // 改进步计入迭代预算
    assert_eq!(out.reasoning_trace.iterations, 2);

    let critique_steps = out
        .reasoning_trace
        .steps
        .iter()
        .filter(|s| s.thought.content.starts_with("critique verdict"))
        .count();
    assert_eq!(critique_steps, 2);
}

// 运行级失败：LLM 调用失败 -> 信封而非异常，保留规划步
#[tokio::test]
async fn test_llm_failure_returns_envelope() {
    let tools = build_tools();
    let llm = Arc::new(MockLlmClient::new()); // 空脚本，第一次调用即失败

    let out = engine(llm, &tools, config(1, 3))
        .run(&ExecutionContext::new("deal-9"), "diligence")
        .await;

    assert!(!out.success);
    assert!(out.error.as_deref().unwrap().contains("LLM error"));
    // 合成的第 0 步仍记录了（回落）计划
    assert_eq!(out.reasoning_trace.steps.len(), 1);
    assert_eq!(out.reasoning_trace.steps[0].step_number, 0);
    assert_eq!(out.confidence.score, 0.0);
}

// 取消令牌在迭代顶部生效
#[tokio::test]
async fn test_cancellation_token() {
    let tools = build_tools();
    let llm = Arc::new(MockLlmClient::scripted([plan_json()]));
    let token = tokio_util::sync::CancellationToken::new();
    token.cancel();

    let out = engine(llm, &tools, config(1, 3))
        .with_cancel_token(token)
        .run(&ExecutionContext::new("deal-10"), "diligence")
        .await;

    assert!(!out.success);
    assert!(out.error.as_deref().unwrap().contains("Cancelled"));
}

// 成本沿所有模型调用累计
#[tokio::test]
async fn test_cost_accumulates() {
    let tools = build_tools();
    let llm = Arc::new(
        MockLlmClient::scripted([
            plan_json(),
            decision(None, true, 90.0),
            synthesis_json("buy", 80.0),
        ])
        .with_cost(0.5),
    );

    let out = engine(llm, &tools, config(1, 3))
        .run(&ExecutionContext::new("deal-11"), "diligence")
        .await;

    assert!(out.success);
    assert!((out.cost - 1.5).abs() < 1e-9); // 规划 + 一步 + 综合
}

// 过程事件：阶段切换与工具调用可被旁路观察
#[tokio::test]
async fn test_events_are_emitted() {
    let tools = build_tools();
    let llm = Arc::new(MockLlmClient::scripted([
        plan_json(),
        decision(
            Some(json!({"tool": "backup_lookup", "parameters": {"id": "acme"},
                        "reasoning": "fetch record"})),
            true,
            90.0,
        ),
        synthesis_json("buy", 80.0),
    ]));

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let out = engine(llm, &tools, config(1, 3))
        .with_event_tx(tx)
        .run(&ExecutionContext::new("deal-12"), "diligence")
        .await;
    assert!(out.success);

    let mut phases = Vec::new();
    let mut saw_tool_call = false;
    while let Ok(ev) = rx.try_recv() {
        match ev {
            ReactEvent::PhaseChange { phase } => phases.push(phase),
            ReactEvent::ToolCall { tool, .. } => {
                saw_tool_call = true;
                assert_eq!(tool, "backup_lookup");
            }
            _ => {}
        }
    }
    assert!(saw_tool_call);
    assert_eq!(phases.first(), Some(&EnginePhase::Planning));
    assert_eq!(phases.last(), Some(&EnginePhase::Done));
}
