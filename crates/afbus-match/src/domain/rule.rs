//! Match rule value object
//!
//! A rule is a conjunction of optional field constraints. Each constraint
//! that is present sets one bit in [`RuleFlags`], so matching only inspects
//! the fields the subscriber actually asked for.

use super::matchmaker::MatchMaker;
use afbus_types::{MessageHeader, MessageType};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::BitOr;

/// Which fields of a [`MatchRule`] are constrained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RuleFlags(u16);

impl RuleFlags {
    pub const MESSAGE_TYPE: Self = Self(1 << 0);
    pub const INTERFACE: Self = Self(1 << 1);
    pub const MEMBER: Self = Self(1 << 2);
    pub const SENDER: Self = Self(1 << 3);
    pub const DESTINATION: Self = Self(1 << 4);
    pub const PATH: Self = Self(1 << 5);
    pub const ARGS: Self = Self(1 << 6);
    /// The rule was written with `eavesdrop='true'`.
    pub const EAVESDROP: Self = Self(1 << 7);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

impl BitOr for RuleFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// A parsed subscription rule.
///
/// Equality is structural: two rules are equal when they constrain the same
/// fields to the same values, whatever their original text looked like.
#[derive(Debug, Clone, Default)]
pub struct MatchRule {
    text: String,
    flags: RuleFlags,
    msg_type: Option<MessageType>,
    interface: Option<String>,
    member: Option<String>,
    sender: Option<String>,
    destination: Option<String>,
    path: Option<String>,
    args: Vec<Option<String>>,
}

impl MatchRule {
    /// A rule with no constraints; it matches every message without a
    /// destination.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(mut self, ty: MessageType) -> Self {
        self.msg_type = Some(ty);
        self.flags.insert(RuleFlags::MESSAGE_TYPE);
        self
    }

    pub fn with_interface(mut self, interface: &str) -> Self {
        self.interface = Some(interface.to_string());
        self.flags.insert(RuleFlags::INTERFACE);
        self
    }

    pub fn with_member(mut self, member: &str) -> Self {
        self.member = Some(member.to_string());
        self.flags.insert(RuleFlags::MEMBER);
        self
    }

    pub fn with_sender(mut self, sender: &str) -> Self {
        self.sender = Some(sender.to_string());
        self.flags.insert(RuleFlags::SENDER);
        self
    }

    pub fn with_destination(mut self, destination: &str) -> Self {
        self.destination = Some(destination.to_string());
        self.flags.insert(RuleFlags::DESTINATION);
        self
    }

    pub fn with_path(mut self, path: &str) -> Self {
        self.path = Some(path.to_string());
        self.flags.insert(RuleFlags::PATH);
        self
    }

    /// Constrain string argument `index`.
    pub fn with_arg(mut self, index: usize, value: &str) -> Self {
        if self.args.len() <= index {
            self.args.resize(index + 1, None);
        }
        self.args[index] = Some(value.to_string());
        self.flags.insert(RuleFlags::ARGS);
        self
    }

    pub fn with_eavesdrop(mut self, eavesdrop: bool) -> Self {
        if eavesdrop {
            self.flags.insert(RuleFlags::EAVESDROP);
        } else {
            self.flags.remove(RuleFlags::EAVESDROP);
        }
        self
    }

    pub(crate) fn with_text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    /// The text this rule was parsed from (empty for built rules).
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn flags(&self) -> RuleFlags {
        self.flags
    }

    pub fn msg_type(&self) -> Option<MessageType> {
        self.msg_type
    }

    pub fn interface(&self) -> Option<&str> {
        self.interface.as_deref()
    }

    pub fn member(&self) -> Option<&str> {
        self.member.as_deref()
    }

    pub fn sender(&self) -> Option<&str> {
        self.sender.as_deref()
    }

    pub fn destination(&self) -> Option<&str> {
        self.destination.as_deref()
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).and_then(|a| a.as_deref())
    }

    pub fn is_eavesdrop(&self) -> bool {
        self.flags.contains(RuleFlags::EAVESDROP)
    }

    /// Evaluate this rule against one message.
    ///
    /// `sender` is the match maker of the sending connection, used to decide
    /// whether it is the primary owner of the rule's `sender` name. Without
    /// one, the message's sender field is compared literally. `eavesdrop`
    /// says whether the receiving connection is allowed to eavesdrop.
    pub fn matches(
        &self,
        sender: Option<&MatchMaker>,
        eavesdrop: bool,
        message: &MessageHeader,
    ) -> bool {
        if self.is_eavesdrop() && !eavesdrop {
            return false;
        }

        // Messages addressed to someone only reach rules that asked to
        // eavesdrop.
        if message.destination.is_some() && !self.is_eavesdrop() {
            return false;
        }

        if let Some(ty) = self.msg_type {
            if ty != message.msg_type {
                return false;
            }
        }

        if !field_matches(&self.interface, &message.interface)
            || !field_matches(&self.member, &message.member)
            || !field_matches(&self.path, &message.path)
            || !field_matches(&self.destination, &message.destination)
        {
            return false;
        }

        if let Some(rule_sender) = &self.sender {
            let Some(msg_sender) = &message.sender else {
                return false;
            };
            let owned = match sender {
                Some(maker) => maker.is_primary_owner(rule_sender),
                None => msg_sender == rule_sender,
            };
            if !owned {
                return false;
            }
        }

        self.args.iter().enumerate().all(|(i, wanted)| match wanted {
            Some(value) => message.arg(i) == Some(value.as_str()),
            None => true,
        })
    }

    fn significant_args(&self) -> &[Option<String>] {
        let end = self
            .args
            .iter()
            .rposition(Option::is_some)
            .map_or(0, |i| i + 1);
        &self.args[..end]
    }
}

fn field_matches(rule: &Option<String>, message: &Option<String>) -> bool {
    match (rule, message) {
        (None, _) => true,
        (Some(want), Some(have)) => want == have,
        (Some(_), None) => false,
    }
}

impl PartialEq for MatchRule {
    fn eq(&self, other: &Self) -> bool {
        self.flags == other.flags
            && self.msg_type == other.msg_type
            && self.interface == other.interface
            && self.member == other.member
            && self.sender == other.sender
            && self.destination == other.destination
            && self.path == other.path
            && self.significant_args() == other.significant_args()
    }
}

impl Eq for MatchRule {}

impl Hash for MatchRule {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.flags.hash(state);
        self.msg_type.hash(state);
        self.interface.hash(state);
        self.member.hash(state);
        self.sender.hash(state);
        self.destination.hash(state);
        self.path.hash(state);
        self.significant_args().hash(state);
    }
}

/// Quote a value so the parser reads it back verbatim.
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

impl fmt::Display for MatchRule {
    /// Canonical rule text.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(ty) = self.msg_type {
            parts.push(format!("type={}", quote(ty.as_str())));
        }
        let fields = [
            ("sender", &self.sender),
            ("interface", &self.interface),
            ("member", &self.member),
            ("path", &self.path),
            ("destination", &self.destination),
        ];
        for (key, value) in fields {
            if let Some(value) = value {
                parts.push(format!("{key}={}", quote(value)));
            }
        }
        if self.is_eavesdrop() {
            parts.push("eavesdrop='true'".to_string());
        }
        for (i, arg) in self.args.iter().enumerate() {
            if let Some(value) = arg {
                parts.push(format!("arg{i}={}", quote(value)));
            }
        }
        f.write_str(&parts.join(","))
    }
}
