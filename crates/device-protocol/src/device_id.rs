//! Device identifier syntax.
//!
//! A device id is `<prefix>:<id>[/<service>]` where the prefix is one of
//! `mac`, `uuid`, `dns` or `serial` (any case).  MAC ids may use `:`, `-`,
//! `.` or `,` as delimiters and must contain exactly 12 hex digits.  The
//! canonical form lowercases the prefix, strips MAC delimiters, lowercases
//! MAC digits and drops the service suffix.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

const MAC_DELIMITERS: &[char] = &[':', '-', '.', ','];
const MAC_LENGTH: usize = 12;

fn id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?P<prefix>(?i:mac|uuid|dns|serial)):(?P<id>[^/]+)(?P<service>/[^/]+)?")
            .expect("device id pattern is valid")
    })
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid device name: {0:?}")]
pub struct DeviceIdError(pub String);

/// A validated, canonical device identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn parse(value: &str) -> Result<Self, DeviceIdError> {
        let invalid = || DeviceIdError(value.to_owned());
        let caps = id_pattern().captures(value).ok_or_else(invalid)?;

        let prefix = caps["prefix"].to_ascii_lowercase();
        let mut id = caps["id"].to_owned();

        if prefix == "mac" {
            let mut digits = String::with_capacity(MAC_LENGTH);
            for c in id.chars() {
                if c.is_ascii_hexdigit() {
                    digits.push(c.to_ascii_lowercase());
                } else if !MAC_DELIMITERS.contains(&c) {
                    return Err(invalid());
                }
            }
            if digits.len() != MAC_LENGTH {
                return Err(invalid());
            }
            id = digits;
        }

        Ok(Self(format!("{prefix}:{id}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for DeviceId {
    type Err = DeviceIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
