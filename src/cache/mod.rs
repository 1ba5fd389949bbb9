//! Session caches: answers, rules and plans.

pub mod answer_cache;
pub mod lazy;
pub mod plan_cache;
pub mod rule_cache;

pub use answer_cache::{AnswerCache, AnswerCursor};
pub use lazy::{LazyAnswerCache, LazyCursor};
pub use plan_cache::PlanCache;
pub use rule_cache::RuleCache;
