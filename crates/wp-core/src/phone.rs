//! Phone number validation
//!
//! Numbers are accepted in E.164 form. Common formatting characters
//! (spaces, dashes, dots, parentheses) are stripped first; anything else
//! makes the number invalid.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

use crate::{Error, Result};

/// Suffix of a WhatsApp user JID
pub const USER_JID_SUFFIX: &str = "@s.whatsapp.net";

static E164: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[1-9][0-9]{1,14}$").expect("valid E.164 regex"));

/// A validated phone number, stored as bare digits (no `+`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PhoneNumber(String);

impl PhoneNumber {
    /// Parse and validate user input
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        let without_plus = trimmed.strip_prefix('+').unwrap_or(trimmed);

        let digits: String = without_plus
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')'))
            .collect();

        if !E164.is_match(&digits) {
            return Err(Error::InvalidPhoneNumber(input.to_string()));
        }

        Ok(Self(digits))
    }

    /// Bare digits, e.g. `2348012345678`
    pub fn digits(&self) -> &str {
        &self.0
    }

    /// E.164 form, e.g. `+2348012345678`
    pub fn e164(&self) -> String {
        format!("+{}", self.0)
    }

    /// WhatsApp user JID
    pub fn jid(&self) -> String {
        format!("{}{}", self.0, USER_JID_SUFFIX)
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "+{}", self.0)
    }
}

impl TryFrom<String> for PhoneNumber {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<PhoneNumber> for String {
    fn from(phone: PhoneNumber) -> Self {
        phone.e164()
    }
}
