//! Domain layer for match rules
//!
//! Pure data structures and algorithms; nothing here blocks or allocates
//! shared state.

pub mod matchmaker;
pub mod parser;
pub mod pool;
pub mod rule;

pub use matchmaker::MatchMaker;
pub use parser::{parse, MAX_ARG_INDEX, MAX_RULE_LEN};
pub use pool::MatchPool;
pub use rule::{MatchRule, RuleFlags};
