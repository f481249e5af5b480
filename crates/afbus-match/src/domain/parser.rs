//! Match rule text parser
//!
//! Grammar: `key=value[,key=value]*`. Values are normally single-quoted;
//! inside quotes every byte is literal, outside quotes `\'` produces a
//! literal quote. Commas only separate pairs outside quotes.

use super::rule::MatchRule;
use afbus_types::{MessageType, ParseError};
use std::collections::HashSet;

/// Longest accepted rule text in bytes.
pub const MAX_RULE_LEN: usize = 1024;

/// Highest argument index usable in an `argN` key.
pub const MAX_ARG_INDEX: usize = 63;

/// Parse rule text into a [`MatchRule`].
///
/// # Errors
///
/// - `TooLong` if `text` exceeds [`MAX_RULE_LEN`] bytes
/// - `UnbalancedQuote` if a quoted value is never closed
/// - `MissingEquals` if a pair has no `=`
/// - `UnknownKey` / `DuplicateKey` for bad keys
/// - `InvalidValue` for an unknown type, a non-boolean eavesdrop value or an
///   argument index above [`MAX_ARG_INDEX`]
pub fn parse(text: &str) -> Result<MatchRule, ParseError> {
    if text.len() > MAX_RULE_LEN {
        return Err(ParseError::TooLong {
            len: text.len(),
            max: MAX_RULE_LEN,
        });
    }

    let mut rule = MatchRule::new().with_text(text);
    let mut seen = HashSet::new();

    for (key, value) in tokenize(text)? {
        if !seen.insert(key.clone()) {
            return Err(ParseError::DuplicateKey(key));
        }
        rule = apply(rule, &key, &value)?;
    }

    Ok(rule)
}

fn apply(rule: MatchRule, key: &str, value: &str) -> Result<MatchRule, ParseError> {
    let invalid = || ParseError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    };

    let rule = match key {
        "type" => rule.with_type(value.parse::<MessageType>().map_err(|_| invalid())?),
        "sender" => rule.with_sender(value),
        "interface" => rule.with_interface(value),
        "member" => rule.with_member(value),
        "path" => rule.with_path(value),
        "destination" => rule.with_destination(value),
        "eavesdrop" => match value {
            "true" => rule.with_eavesdrop(true),
            "false" => rule.with_eavesdrop(false),
            _ => return Err(invalid()),
        },
        _ => {
            let index = key
                .strip_prefix("arg")
                .filter(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
                .ok_or_else(|| ParseError::UnknownKey(key.to_string()))?;
            let index: usize = index.parse().map_err(|_| invalid())?;
            if index > MAX_ARG_INDEX {
                return Err(invalid());
            }
            rule.with_arg(index, value)
        }
    };
    Ok(rule)
}

/// Split rule text into unquoted `(key, value)` pairs.
fn tokenize(text: &str) -> Result<Vec<(String, String)>, ParseError> {
    let mut pairs = Vec::new();
    let mut chars = text.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        while let Some(c) = chars.next_if(|&c| c != '=' && c != ',') {
            key.push(c);
        }
        let key = key.trim_end().to_string();
        if chars.next() != Some('=') {
            return Err(ParseError::MissingEquals(key));
        }

        let mut value = String::new();
        let mut quoted = false;
        while let Some(c) = chars.next() {
            match c {
                '\'' => quoted = !quoted,
                '\\' if !quoted => {
                    if chars.next_if_eq(&'\'').is_some() {
                        value.push('\'');
                    } else {
                        value.push('\\');
                    }
                }
                ',' if !quoted => break,
                c => value.push(c),
            }
        }
        if quoted {
            return Err(ParseError::UnbalancedQuote);
        }

        pairs.push((key, value));
    }

    Ok(pairs)
}
