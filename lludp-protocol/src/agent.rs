//! Agent identity
//!
//! Sessions are keyed by a 128-bit identifier that the transport treats as
//! opaque. It is printed in the usual hyphenated UUID form.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Opaque session key, stable for the lifetime of a connection
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Default)]
pub struct AgentId(u128);

impl AgentId {
    /// The all-zero identifier
    pub const NIL: AgentId = AgentId(0);

    #[inline]
    pub const fn from_u128(value: u128) -> Self {
        AgentId(value)
    }

    #[inline]
    pub const fn as_u128(self) -> u128 {
        self.0
    }

    /// Build from the 16 bytes used on the wire
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        AgentId(u128::from_be_bytes(bytes))
    }

    pub fn to_bytes(self) -> [u8; 16] {
        self.0.to_be_bytes()
    }

    pub fn is_nil(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AgentId({})", self)
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.0;
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:04x}-{:012x}",
            (v >> 96) as u32,
            (v >> 80) as u16,
            (v >> 64) as u16,
            (v >> 48) as u16,
            v & 0xFFFF_FFFF_FFFF
        )
    }
}

impl From<u128> for AgentId {
    fn from(value: u128) -> Self {
        AgentId(value)
    }
}

/// Error parsing an [`AgentId`] from text
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid agent id: {0:?}")]
pub struct ParseAgentIdError(String);

impl FromStr for AgentId {
    type Err = ParseAgentIdError;

    /// Accepts 32 hex digits, with or without hyphens
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: String = s.chars().filter(|c| *c != '-').collect();
        if digits.len() != 32 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ParseAgentIdError(s.to_string()));
        }
        u128::from_str_radix(&digits, 16)
            .map(AgentId)
            .map_err(|_| ParseAgentIdError(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let id = AgentId::from_u128(0x0123_4567_89ab_cdef_0011_2233_4455_6677);
        assert_eq!(id.to_string(), "01234567-89ab-cdef-0011-223344556677");
    }

    #[test]
    fn test_parse() {
        let id: AgentId = "01234567-89ab-cdef-0011-223344556677".parse().unwrap();
        assert_eq!(id.as_u128(), 0x0123_4567_89ab_cdef_0011_2233_4455_6677);

        let plain: AgentId = "0123456789abcdef0011223344556677".parse().unwrap();
        assert_eq!(plain, id);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("not-a-uuid".parse::<AgentId>().is_err());
        assert!("zz234567-89ab-cdef-0011-223344556677".parse::<AgentId>().is_err());
    }

    #[test]
    fn test_parse_rejects_sign() {
        assert!("+123456789abcdef0011223344556677".parse::<AgentId>().is_err());
        assert!("+1234567-89ab-cdef-0011-223344556677".parse::<AgentId>().is_err());
    }

    #[test]
    fn test_bytes() {
        let id = AgentId::from_u128(42);
        assert_eq!(AgentId::from_bytes(id.to_bytes()), id);
        assert_eq!(id.to_bytes()[15], 42);
        assert!(AgentId::NIL.is_nil());
    }
}
