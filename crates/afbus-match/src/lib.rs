//! # AF_BUS Match Rules
//!
//! Decides whether a subscriber should receive a published message.
//!
//! ## Architecture
//!
//! - **Domain Layer** (`domain/`): pure logic, no I/O
//!   - `MatchRule`: immutable parsed rule with field flags
//!   - `parse`: rule text grammar (`type='signal',member='Foo'`)
//!   - `MatchPool`: rules of one message type, indexed by interface
//!   - `MatchMaker`: one subscriber's pools plus the bus names it owns
//!
//! ## Rule Storage
//!
//! ```text
//!  MatchMaker
//!  ├── pools[any]           ─┐
//!  ├── pools[method_call]    │   MatchPool
//!  ├── pools[method_return]  ├── ├── by_interface: BTreeMap<iface, Vec<rule>>
//!  ├── pools[error]          │   └── without_interface: Vec<rule>
//!  ├── pools[signal]        ─┘
//!  └── names: owned bus names
//! ```
//!
//! ## Filtering Order
//!
//! `(any, no iface) → (any, iface) → (type, no iface) → (type, iface)`,
//! first match wins. A message whose destination is owned by the
//! subscriber always passes.
//!
//! ## Usage Example
//!
//! ```ignore
//! use afbus_match::{parse, MatchMaker};
//!
//! let mut subscriber = MatchMaker::new(":1.2");
//! subscriber.add_rule(parse("type='signal',interface='org.foo',member='Bar'")?);
//! assert!(subscriber.filter(None, false, &header));
//! ```

pub mod domain;
pub mod error;

pub use domain::{parse, MatchMaker, MatchPool, MatchRule, RuleFlags, MAX_ARG_INDEX, MAX_RULE_LEN};
pub use error::MatchError;
