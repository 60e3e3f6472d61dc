//! 认知层：规划、步循环、记忆、综合、自检与置信度

pub mod confidence;
pub mod critic;
pub mod events;
pub mod loop_;
pub mod memory;
pub mod planner;
pub mod prompts;
pub mod synthesis;
pub mod trace;

pub use confidence::{ConfidenceFactor, ConfidenceLevel, ConfidenceScore};
pub use critic::{Critique, CritiqueVerdict};
pub use events::{EnginePhase, ReactEvent};
pub use loop_::{ReactEngine, ReactOutput};
pub use memory::{AlternativeAction, FailedAttempt, MemoryInsight, MemoryManager};
pub use planner::{Goal, GoalStatus, Plan, ProposedAction, StepDecision};
pub use prompts::AgentPrompts;
pub use synthesis::{OutputValidator, ScoredFinding, SynthesisResult};
pub use trace::{
    Action, Observation, ReasoningStep, ReasoningTrace, Thought, ThoughtType, SKIPPED_MARKER,
};
