//! ReAct 主循环
//!
//! 状态机：PLANNING -> ITERATING -> SYNTHESIZING -> (CRITIQUING <-> IMPROVING)*
//! -> DONE | FAILED。规划只做一次并写入第 0 步；迭代受 min/max 约束，每轮由
//! 模型给出思考/可选动作，与既往失败完全一致的动作走跳过路径（合成观察，
//! 不触达工具层）；执行失败会记账并触发一次轻量备选建议调用，备选在后续
//! 迭代被机会性消费。终止条件（满足 min_iterations 后逐步检查）：
//! ready_to_synthesize 或置信度达到 early_stop_confidence。总墙钟超时与取消
//! 令牌在每轮迭代顶部协作式检查，挂起调用只竞速不强杀。run 从不向调用方
//! 抛错：任何运行级失败都折叠为 success=false 的信封，保留部分 trace 与
//! 累计成本。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::core::EngineError;
use crate::llm::{CompletionOptions, LlmClient, ModelComplexity};
use crate::react::confidence::{self, ConfidenceInputs, ConfidenceScore};
use crate::react::critic::{parse_critique, Critique, CritiqueVerdict, MAX_IMPROVEMENT_CYCLES};
use crate::react::events::{EnginePhase, ReactEvent};
use crate::react::memory::{InsightExtractor, MemoryManager};
use crate::react::planner::{
    parse_alternatives, parse_plan, parse_step_decision, Plan, ProposedAction,
};
use crate::react::prompts::{self, AgentPrompts};
use crate::react::synthesis::{parse_synthesis, OutputValidator, ScoredFinding, SynthesisResult};
use crate::react::trace::{
    Action, Observation, ReasoningStep, ReasoningTrace, Thought, ThoughtType,
};
use crate::tools::{ExecuteOptions, ExecutionContext, ToolRegistry};

/// 观察事件预览长度
const OBSERVATION_PREVIEW_CHARS: usize = 200;

/// 结果信封：消费方依赖的唯一契约
#[derive(Debug)]
pub struct ReactOutput<T> {
    pub success: bool,
    pub result: Option<T>,
    pub findings: Vec<ScoredFinding>,
    pub confidence: ConfidenceScore,
    pub reasoning_trace: ReasoningTrace,
    pub execution_time_ms: u64,
    pub cost: f64,
    pub error: Option<String>,
}

/// 单轮迭代的结果摘要
struct StepOutcome {
    ready_to_synthesize: bool,
    confidence: f64,
}

/// 成功运行的内部产出
struct RunOutcome<T> {
    synthesis: SynthesisResult<T>,
    confidence: ConfidenceScore,
}

/// 运行期可变状态（单次 run 独占）
struct RunState {
    trace: ReasoningTrace,
    memory: MemoryManager,
    cost: f64,
    started: Instant,
    deadline: Instant,
}

impl RunState {
    fn new(total_timeout: Duration) -> Self {
        let started = Instant::now();
        Self {
            trace: ReasoningTrace::new(),
            memory: MemoryManager::new(),
            cost: 0.0,
            started,
            deadline: started + total_timeout,
        }
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// 剩余墙钟预算；耗尽即 TotalTimeout
    fn remaining(&self) -> Result<Duration, EngineError> {
        self.deadline
            .checked_duration_since(Instant::now())
            .filter(|d| !d.is_zero())
            .ok_or(EngineError::TotalTimeout(self.elapsed_ms()))
    }
}

/// ReAct 引擎：调用方注入 LLM、工具注册表、提示词、输出校验器与配置
pub struct ReactEngine<T> {
    llm: Arc<dyn LlmClient>,
    registry: Arc<ToolRegistry>,
    prompts: AgentPrompts,
    validator: Arc<dyn OutputValidator<T>>,
    config: EngineConfig,
    tool_options: ExecuteOptions,
    extractors: Vec<(String, InsightExtractor)>,
    event_tx: Option<UnboundedSender<ReactEvent>>,
    cancel_token: CancellationToken,
}

impl<T> ReactEngine<T> {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        registry: Arc<ToolRegistry>,
        prompts: AgentPrompts,
        validator: Arc<dyn OutputValidator<T>>,
        config: EngineConfig,
    ) -> Self {
        Self {
            llm,
            registry,
            prompts,
            validator,
            config: config.normalized(),
            tool_options: ExecuteOptions::default(),
            extractors: Vec::new(),
            event_tx: None,
            cancel_token: CancellationToken::new(),
        }
    }

    /// 设置工具执行选项（重试、缓存 TTL；超时始终取配置的 tool_timeout_ms）
    pub fn with_tool_options(mut self, opts: ExecuteOptions) -> Self {
        self.tool_options = opts;
        self
    }

    /// 设置过程事件通道
    pub fn with_event_tx(mut self, tx: UnboundedSender<ReactEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// 设置取消令牌（每轮迭代顶部检查）
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    /// 注册按工具名分派的洞见抽取器（每次 run 注入新的 MemoryManager）
    pub fn with_insight_extractor(
        mut self,
        tool_name: impl Into<String>,
        extractor: InsightExtractor,
    ) -> Self {
        self.extractors.push((tool_name.into(), extractor));
        self
    }

    fn send_event(&self, ev: ReactEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(ev);
        }
    }

    fn set_phase(&self, phase: EnginePhase) {
        self.send_event(ReactEvent::PhaseChange { phase });
    }

    /// 执行一次完整运行；绝不向调用方返回 Err
    pub async fn run(&self, ctx: &ExecutionContext, agent_name: &str) -> ReactOutput<T> {
        let mut state = RunState::new(Duration::from_millis(self.config.total_timeout_ms));
        for (tool, extractor) in &self.extractors {
            state.memory.register_extractor(tool.clone(), extractor.clone());
        }
        tracing::info!(agent = agent_name, session = %ctx.session_id, "react run started");

        match self.run_inner(&mut state, ctx).await {
            Ok(outcome) => {
                let elapsed = state.elapsed_ms();
                let cost = state.cost;
                let mut trace = state.trace;
                trace.final_confidence = outcome.confidence.score;
                trace.total_time_ms = elapsed;
                tracing::info!(
                    agent = agent_name,
                    confidence = outcome.confidence.score,
                    iterations = trace.iterations,
                    cost = cost,
                    "react run finished"
                );
                ReactOutput {
                    success: true,
                    result: Some(outcome.synthesis.data),
                    findings: outcome.synthesis.findings,
                    confidence: outcome.confidence,
                    reasoning_trace: trace,
                    execution_time_ms: elapsed,
                    cost,
                    error: None,
                }
            }
            Err(e) => {
                let elapsed = state.elapsed_ms();
                let cost = state.cost;
                tracing::warn!(agent = agent_name, error = %e, "react run failed");
                self.send_event(ReactEvent::Error { text: e.to_string() });
                self.set_phase(EnginePhase::Failed);
                let mut trace = state.trace;
                trace.final_confidence = 0.0;
                trace.total_time_ms = elapsed;
                ReactOutput {
                    success: false,
                    result: None,
                    findings: Vec::new(),
                    confidence: confidence::zero(),
                    reasoning_trace: trace,
                    execution_time_ms: elapsed,
                    cost,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn run_inner(
        &self,
        state: &mut RunState,
        ctx: &ExecutionContext,
    ) -> Result<RunOutcome<T>, EngineError> {
        // PLANNING：一次模型调用产出计划，写入记忆与第 0 步
        self.set_phase(EnginePhase::Planning);
        let plan = self.plan_stage(state).await?;

        // ITERATING
        self.set_phase(EnginePhase::Iterating);
        let mut iterations = 0usize;
        while iterations < self.config.max_iterations {
            if self.cancel_token.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            state.remaining()?;

            iterations += 1;
            state.trace.iterations = iterations;
            self.send_event(ReactEvent::StepUpdate {
                step: iterations,
                max_steps: self.config.max_iterations,
            });

            let outcome = self.run_iteration(state, ctx, &plan, None).await?;
            if iterations >= self.config.min_iterations
                && (outcome.ready_to_synthesize
                    || outcome.confidence >= self.config.early_stop_confidence)
            {
                break;
            }
        }

        // SYNTHESIZING
        self.set_phase(EnginePhase::Synthesizing);
        let mut synthesis = self.synthesis_stage(state).await?;

        // CRITIQUING / IMPROVING
        let mut critique_adjustment = 0.0;
        if self.config.enable_self_critique
            && synthesis.confidence < self.config.self_critique_threshold
        {
            let mut cycles = 0usize;
            loop {
                self.set_phase(EnginePhase::Critiquing);
                let critique = self.critique_stage(state, &synthesis).await?;

                let budget_left = state.trace.iterations < self.config.max_iterations;
                if critique.verdict == CritiqueVerdict::RequiresRevision
                    && cycles < MAX_IMPROVEMENT_CYCLES
                    && budget_left
                {
                    cycles += 1;
                    self.set_phase(EnginePhase::Improving);
                    let note = prompts::improvement_note(&critique.issues);
                    self.run_iteration(state, ctx, &plan, Some(note.as_str()))
                        .await?;
                    state.trace.iterations += 1;

                    self.set_phase(EnginePhase::Synthesizing);
                    synthesis = self.synthesis_stage(state).await?;
                } else {
                    critique_adjustment = critique.clamped_adjustment();
                    break;
                }
            }
        }

        // 最终置信度
        let stats = state.trace.action_stats();
        let inputs = ConfidenceInputs {
            synthesis_confidence: synthesis.confidence,
            actions_executed: stats.executed,
            actions_succeeded: stats.succeeded,
            step_count: state.trace.iterations,
            insight_count: state.memory.insight_count(),
            critique_adjustment,
        };
        let confidence = confidence::compute(&inputs);

        self.set_phase(EnginePhase::Done);
        Ok(RunOutcome {
            synthesis,
            confidence,
        })
    }

    /// 规划阶段：解析失败回落单目标计划；模型调用失败时仍记录第 0 步后上抛，
    /// 保证部分 trace 里始终有规划记录
    async fn plan_stage(&self, state: &mut RunState) -> Result<Plan, EngineError> {
        let prompt = prompts::planning_prompt(&self.prompts);
        let content = match self.complete(state, &prompt).await {
            Ok(c) => c,
            Err(e) => {
                let plan = Plan::fallback(&self.prompts.task_description);
                Self::push_plan_step(state, &plan);
                return Err(e);
            }
        };
        let plan = parse_plan(&content, &self.prompts.task_description);
        state.memory.store_insight(
            "plan",
            serde_json::to_value(&plan).unwrap_or(Value::Null),
            0,
            0.9,
        );
        Self::push_plan_step(state, &plan);
        Ok(plan)
    }

    fn push_plan_step(state: &mut RunState, plan: &Plan) {
        let thought = Thought::new(plan.summary(), ThoughtType::Planning);
        state.trace.push_step(ReasoningStep {
            step_number: 0,
            thought,
            action: None,
            observation: None,
            confidence_after_step: confidence::PLANNING_BASELINE,
        });
    }

    /// 单轮迭代：决策 -> （跳过 | 执行）-> 记忆更新 -> 追加步
    async fn run_iteration(
        &self,
        state: &mut RunState,
        ctx: &ExecutionContext,
        plan: &Plan,
        note: Option<&str>,
    ) -> Result<StepOutcome, EngineError> {
        self.send_event(ReactEvent::Thinking);
        let prompt = prompts::step_prompt(&self.prompts, plan, &state.trace, &state.memory, note);
        let content = self.complete(state, &prompt).await?;
        let decision = parse_step_decision(&content)?;

        // 机会性消费备选：模型未提出动作且尚未要求综合时
        let proposal = match decision.action {
            Some(a) => Some(a),
            None if !decision.ready_to_synthesize && state.memory.has_alternatives() => {
                state.memory.pop_alternative().map(|alt| ProposedAction {
                    tool: alt.tool_name,
                    parameters: alt.parameters,
                    reasoning: alt.reasoning,
                })
            }
            None => None,
        };

        let step_number = state.trace.next_step_number();
        let thought = Thought::new(decision.thought, decision.thought_type);

        let (action, observation) = match proposal {
            None => (None, None),
            Some(p) => {
                let action = Action::new(p.tool, p.parameters, p.reasoning);
                let observation = if state
                    .memory
                    .has_already_failed(&action.tool_name, &action.parameters)
                {
                    self.send_event(ReactEvent::ActionSkipped {
                        tool: action.tool_name.clone(),
                    });
                    tracing::debug!(tool = %action.tool_name, "action identical to failed attempt, skipping");
                    Observation::skipped(&action.id)
                } else {
                    self.send_event(ReactEvent::ToolCall {
                        tool: action.tool_name.clone(),
                        args: action.parameters.clone(),
                    });
                    self.execute_action(state, ctx, &action, step_number).await?
                };
                (Some(action), Some(observation))
            }
        };

        let confidence = decision.confidence.clamp(0.0, 100.0);
        state.trace.push_step(ReasoningStep {
            step_number,
            thought,
            action,
            observation,
            confidence_after_step: confidence,
        });

        Ok(StepOutcome {
            ready_to_synthesize: decision.ready_to_synthesize,
            confidence,
        })
    }

    /// 通过注册表执行动作：成功抽取洞见；失败记账并请求备选建议
    async fn execute_action(
        &self,
        state: &mut RunState,
        ctx: &ExecutionContext,
        action: &Action,
        step_number: usize,
    ) -> Result<Observation, EngineError> {
        let remaining = state.remaining()?;
        let opts = ExecuteOptions {
            timeout_ms: self.config.tool_timeout_ms,
            ..self.tool_options.clone()
        };
        let timed = match timeout(
            remaining,
            self.registry
                .execute(&action.tool_name, action.parameters.clone(), ctx, &opts),
        )
        .await
        {
            Ok(t) => t,
            Err(_) => return Err(EngineError::TotalTimeout(state.elapsed_ms())),
        };

        if timed.success {
            let result = timed.result.unwrap_or(Value::Null);
            let extracted = state
                .memory
                .extract_insights(&action.tool_name, &result, step_number);
            tracing::debug!(
                tool = %action.tool_name,
                insights = extracted,
                from_cache = timed.from_cache,
                "tool succeeded"
            );
            self.send_event(ReactEvent::Observation {
                tool: action.tool_name.clone(),
                preview: preview(&result.to_string(), OBSERVATION_PREVIEW_CHARS),
            });
            Ok(Observation::success(
                &action.id,
                result,
                timed.execution_time_ms,
            ))
        } else {
            let error = timed
                .error
                .unwrap_or_else(|| "unknown tool error".to_string());
            self.send_event(ReactEvent::ToolFailure {
                tool: action.tool_name.clone(),
                reason: error.clone(),
            });
            state.memory.record_failure(
                &action.tool_name,
                action.parameters.clone(),
                &error,
                step_number,
            );
            self.request_alternatives(state, action, &error).await;
            Ok(Observation::failure(
                &action.id,
                error,
                timed.execution_time_ms,
            ))
        }
    }

    /// 失败后的轻量备选建议调用（低复杂度档位）；建议解析失败只忽略
    async fn request_alternatives(&self, state: &mut RunState, action: &Action, error: &str) {
        let prompt = prompts::alternatives_prompt(&action.tool_name, &action.parameters, error);
        match self
            .complete_with(state, &prompt, ModelComplexity::Low)
            .await
        {
            Ok(content) => {
                let alternatives = parse_alternatives(&content);
                for alt in &alternatives {
                    self.send_event(ReactEvent::AlternativeQueued {
                        tool: alt.tool_name.clone(),
                        priority: alt.priority,
                    });
                }
                state.memory.queue_alternatives(alternatives);
            }
            Err(e) => {
                tracing::warn!(error = %e, "alternative suggestion call failed");
            }
        }
    }

    /// 综合阶段：一次模型调用 -> 校验器 -> 发现规范化；失败即运行失败
    async fn synthesis_stage(
        &self,
        state: &mut RunState,
    ) -> Result<SynthesisResult<T>, EngineError> {
        let threshold = self.config.confidence_threshold / 100.0;
        let prompt = prompts::synthesis_prompt(&self.prompts, &state.trace, &state.memory, threshold);
        let content = self.complete(state, &prompt).await?;
        let synthesis = parse_synthesis(&content, self.validator.as_ref())?;
        self.send_event(ReactEvent::SynthesisDone {
            confidence: synthesis.confidence,
        });

        let step_number = state.trace.next_step_number();
        let thought = Thought::new(
            format!(
                "synthesis produced {} findings at confidence {:.0}",
                synthesis.findings.len(),
                synthesis.confidence
            ),
            ThoughtType::Synthesis,
        );
        state.trace.push_step(ReasoningStep {
            step_number,
            thought,
            action: None,
            observation: None,
            confidence_after_step: synthesis.confidence,
        });
        Ok(synthesis)
    }

    /// 自检阶段：一次模型调用 -> 评审解析 -> 追加 self_critique 步
    async fn critique_stage(
        &self,
        state: &mut RunState,
        synthesis: &SynthesisResult<T>,
    ) -> Result<Critique, EngineError> {
        let prompt = prompts::critique_prompt(
            &self.prompts,
            &synthesis.data_json,
            &synthesis.findings,
            synthesis.confidence,
        );
        let content = self.complete(state, &prompt).await?;
        let critique = parse_critique(&content);
        self.send_event(ReactEvent::CritiqueVerdict {
            verdict: critique.verdict.as_str().to_string(),
        });

        let previous_confidence = state.trace.last_confidence();
        let step_number = state.trace.next_step_number();
        let summary = if critique.issues.is_empty() {
            format!("critique verdict: {}", critique.verdict.as_str())
        } else {
            format!(
                "critique verdict: {}; issues: {}",
                critique.verdict.as_str(),
                critique.issues.join("; ")
            )
        };
        state.trace.push_step(ReasoningStep {
            step_number,
            thought: Thought::new(summary, ThoughtType::SelfCritique),
            action: None,
            observation: None,
            confidence_after_step: previous_confidence,
        });
        Ok(critique)
    }

    async fn complete(&self, state: &mut RunState, prompt: &str) -> Result<String, EngineError> {
        self.complete_with(state, prompt, self.config.model_complexity)
            .await
    }

    /// 模型调用：对剩余墙钟预算竞速，成本计入运行状态
    async fn complete_with(
        &self,
        state: &mut RunState,
        prompt: &str,
        complexity: ModelComplexity,
    ) -> Result<String, EngineError> {
        let remaining = state.remaining()?;
        let opts = CompletionOptions {
            complexity,
            temperature: self.config.temperature,
            system_prompt: Some(self.prompts.system.clone()),
        };
        match timeout(remaining, self.llm.complete(prompt, &opts)).await {
            Ok(Ok(completion)) => {
                state.cost += completion.cost;
                Ok(completion.content)
            }
            Ok(Err(e)) => Err(EngineError::Llm(e)),
            Err(_) => Err(EngineError::TotalTimeout(state.elapsed_ms())),
        }
    }
}

fn preview(text: &str, max: usize) -> String {
    let p: String = text.chars().take(max).collect();
    if text.chars().count() > max {
        format!("{}...", p)
    } else {
        p
    }
}
