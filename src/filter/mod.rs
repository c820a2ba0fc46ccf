//! Tag filters for selecting OSM objects.
//!
//! Filter files hold one expression per line:
//!   key                     - key present, any value
//!   key=*                   - same as above
//!   key=value               - exact match
//!   key=val1,val2           - one rule per value
//!   key!=value              - exclusion rule
//!   w/key=value             - object-type prefix, accepted and ignored
//!   # comment               - rest of the line is ignored

mod expr;
mod loader;
mod rules;

pub use expr::{Expression, Operator, ValueMatch, parse_expression};
pub use loader::{load_expressions, parse_expressions};
pub use rules::{TagRule, TagRuleSet};
