// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Channel identifier parsing.
//!
//! Contacts are keyed by a channel identifier that is either phone-anchored
//! (`<digits>@s.whatsapp.net`) or a provider-local LID (`<id>@lid`). Adapters
//! normalize every inbound sender into one of these forms.

/// Suffix of a phone-anchored identifier.
pub const PHONE_SUFFIX: &str = "@s.whatsapp.net";
/// Legacy phone suffix still emitted by some bridge builds.
pub const LEGACY_PHONE_SUFFIX: &str = "@c.us";
/// Suffix of a provider-local identifier.
pub const LID_SUFFIX: &str = "@lid";
/// Suffix of a group chat identifier.
pub const GROUP_SUFFIX: &str = "@g.us";

/// A parsed channel identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    /// Phone-anchored identity; holds the normalized digits.
    Phone(String),
    /// Provider-local identifier; holds the full `<id>@lid` form.
    Lid(String),
    /// Group chat; never resolved to a contact.
    Group(String),
    /// Anything else, kept verbatim.
    Other(String),
}

impl Address {
    /// Parse a raw provider identifier.
    ///
    /// Bare digit strings (cloud API `wa_id`) are treated as phone numbers.
    /// Device suffixes (`5511...:12@s.whatsapp.net`) are stripped.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Some(user) = raw
            .strip_suffix(PHONE_SUFFIX)
            .or_else(|| raw.strip_suffix(LEGACY_PHONE_SUFFIX))
        {
            let user = user.split(':').next().unwrap_or(user);
            return match normalize_phone(user) {
                Some(phone) => Self::Phone(phone),
                None => Self::Other(raw.to_string()),
            };
        }
        if raw.ends_with(LID_SUFFIX) {
            return Self::Lid(raw.to_string());
        }
        if raw.ends_with(GROUP_SUFFIX) {
            return Self::Group(raw.to_string());
        }
        match normalize_phone(raw) {
            Some(phone) if !raw.contains('@') => Self::Phone(phone),
            _ => Self::Other(raw.to_string()),
        }
    }

    /// Canonical identifier stored on the contact row.
    pub fn identifier(&self) -> String {
        match self {
            Self::Phone(phone) => phone_identifier(phone),
            Self::Lid(id) | Self::Group(id) | Self::Other(id) => id.clone(),
        }
    }

    /// Phone digits, if the identifier is phone-anchored.
    pub fn phone(&self) -> Option<&str> {
        match self {
            Self::Phone(phone) => Some(phone),
            _ => None,
        }
    }

    pub fn is_lid(&self) -> bool {
        matches!(self, Self::Lid(_))
    }
}

/// Strip formatting from a phone number.
///
/// Accepts `+55 (11) 99999-0000` style input. Returns `None` unless the
/// result is 7 to 15 digits (E.164 without the plus sign).
pub fn normalize_phone(raw: &str) -> Option<String> {
    let mut digits = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '0'..='9' => digits.push(c),
            '+' | ' ' | '-' | '(' | ')' | '.' => {}
            _ => return None,
        }
    }
    (7..=15).contains(&digits.len()).then_some(digits)
}

/// Phone-anchored identifier for a normalized phone number.
pub fn phone_identifier(phone: &str) -> String {
    format!("{phone}{PHONE_SUFFIX}")
}
