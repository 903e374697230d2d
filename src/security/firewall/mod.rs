pub mod filter;
pub mod rules;

pub use filter::{Disposition, RuleBook};
pub use rules::Rule;
