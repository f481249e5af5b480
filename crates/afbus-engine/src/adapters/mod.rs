//! Adapters implementing the outbound ports.

pub mod match_filter;

pub use match_filter::MatchRuleFilter;
