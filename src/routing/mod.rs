//! 路由层：消息复杂度 / 意图分类与激活计划

pub mod classifier;
pub mod planner;
pub mod types;

pub use classifier::ComplexityClassifier;
pub use planner::{ActivationPlan, ActivationPlanner};
pub use types::{Complexity, MessageAnalysis, TaskType};
