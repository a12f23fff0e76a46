//! Bit-flag vocabulary that selects which optional fields a record captures.
//!
//! Every flag owns a distinct bit, so flags combine freely with `|` and are
//! tested with [`Flags::contains`]. The numeric values are part of the
//! configuration format and must never be reassigned.

use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};
use std::str::FromStr;

/// A set of capture flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Flags(u64);

impl Flags {
    /// Mandatory fields only.
    pub const STANDARD: Flags = Flags(0);
    /// Mandatory fields plus the exception fields every error record carries.
    pub const EXCEPTION_STANDARD: Flags = Flags(0);
    /// Drop the event: no record, no sink call.
    pub const IGNORE: Flags = Flags(1);
    /// Authenticated user id, or `false` when nobody is authenticated.
    pub const USER_ID: Flags = Flags(1 << 1);
    /// `User-Agent` request header.
    pub const REQUEST_HEADER_AGENT: Flags = Flags(1 << 16);
    /// `Referer` request header.
    pub const REQUEST_HEADER_REFERER: Flags = Flags(1 << 17);
    /// `Accept` request header.
    pub const REQUEST_HEADER_ACCEPT: Flags = Flags(1 << 19);
    /// `Content-Type` request header.
    pub const REQUEST_HEADER_CONTENT_TYPE: Flags = Flags(1 << 20);
    /// Every request header, with the `Authorization` credential masked.
    pub const REQUEST_HEADERS: Flags = Flags(1 << 21);
    /// Parsed request parameters.
    pub const REQUEST_PARAMS: Flags = Flags(1 << 22);
    /// Raw request body, filtered and trimmed to `body_raw_limit`.
    pub const REQUEST_BODY_RAW: Flags = Flags(1 << 23);
    /// Every response header.
    pub const RESPONSE_HEADER: Flags = Flags(1 << 48);
    /// Buffered response body (plus `Content-Type` when headers are off).
    pub const RESPONSE_BODY: Flags = Flags(1 << 49);

    /// Named flags, in bit order. `STANDARD` is handled separately since it
    /// has no bit.
    pub const NAMED: &'static [(&'static str, Flags)] = &[
        ("IGNORE", Flags::IGNORE),
        ("USER_ID", Flags::USER_ID),
        ("REQUEST_HEADER_AGENT", Flags::REQUEST_HEADER_AGENT),
        ("REQUEST_HEADER_REFERER", Flags::REQUEST_HEADER_REFERER),
        ("REQUEST_HEADER_ACCEPT", Flags::REQUEST_HEADER_ACCEPT),
        ("REQUEST_HEADER_CONTENT_TYPE", Flags::REQUEST_HEADER_CONTENT_TYPE),
        ("REQUEST_HEADERS", Flags::REQUEST_HEADERS),
        ("REQUEST_PARAMS", Flags::REQUEST_PARAMS),
        ("REQUEST_BODY_RAW", Flags::REQUEST_BODY_RAW),
        ("RESPONSE_HEADER", Flags::RESPONSE_HEADER),
        ("RESPONSE_BODY", Flags::RESPONSE_BODY),
    ];

    pub const fn from_bits(bits: u64) -> Self {
        Flags(bits)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    /// True when every bit of `other` is set in `self`.
    ///
    /// `contains(STANDARD)` is always true.
    #[inline]
    pub const fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub const fn is_ignored(self) -> bool {
        self.contains(Flags::IGNORE)
    }

    #[inline]
    pub const fn is_standard(self) -> bool {
        self.0 == 0
    }

    /// Look up one flag by its name (case-insensitive, optional `LOG_` prefix).
    pub fn by_name(name: &str) -> Option<Flags> {
        let upper = name.trim().to_ascii_uppercase();
        let upper = upper.strip_prefix("LOG_").unwrap_or(&upper);
        match upper {
            "STANDARD" => Some(Flags::STANDARD),
            "EXCEPTION_STANDARD" => Some(Flags::EXCEPTION_STANDARD),
            _ => Flags::NAMED
                .iter()
                .find(|(n, _)| *n == upper)
                .map(|(_, f)| *f),
        }
    }

    /// Names of the known flags set in `self`.
    pub fn names(self) -> Vec<&'static str> {
        Flags::NAMED
            .iter()
            .filter(|(_, f)| self.contains(*f))
            .map(|(n, _)| *n)
            .collect()
    }
}

impl BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

impl BitOrAssign for Flags {
    fn bitor_assign(&mut self, rhs: Flags) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Flags {
    type Output = Flags;

    fn bitand(self, rhs: Flags) -> Flags {
        Flags(self.0 & rhs.0)
    }
}

impl From<u64> for Flags {
    fn from(bits: u64) -> Self {
        Flags(bits)
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = self.names();
        if names.is_empty() {
            return write!(f, "STANDARD");
        }
        write!(f, "{}", names.join(" | "))?;
        let known = names
            .iter()
            .filter_map(|n| Flags::by_name(n))
            .fold(Flags::STANDARD, |acc, f| acc | f);
        let unknown = self.0 & !known.0;
        if unknown != 0 {
            write!(f, " | {unknown:#x}")?;
        }
        Ok(())
    }
}

/// Error returned when a flag expression names an unknown flag.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown flag: {0:?}")]
pub struct UnknownFlag(pub String);

impl FromStr for Flags {
    type Err = UnknownFlag;

    /// Parses `"REQUEST_PARAMS | RESPONSE_BODY"`, a single name, or an integer.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(bits) = trimmed.parse::<u64>() {
            return Ok(Flags(bits));
        }
        trimmed
            .split('|')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .try_fold(Flags::STANDARD, |acc, part| {
                Flags::by_name(part)
                    .map(|f| acc | f)
                    .ok_or_else(|| UnknownFlag(part.to_string()))
            })
    }
}

// ── Serde ─────────────────────────────────────────────────────
//
// Flags always serialise as the integer. On input an integer, a `|`-separated
// string, or a list of names is accepted.

impl Serialize for Flags {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.0)
    }
}

impl<'de> Deserialize<'de> for Flags {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(FlagsVisitor)
    }
}

struct FlagsVisitor;

impl<'de> Visitor<'de> for FlagsVisitor {
    type Value = Flags;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an integer bitmask, a `|`-separated flag expression, or a list of flag names")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Flags, E> {
        Ok(Flags(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Flags, E> {
        u64::try_from(v)
            .map(Flags)
            .map_err(|_| E::custom(format!("flags must be non-negative, got {v}")))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Flags, E> {
        v.parse().map_err(E::custom)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Flags, A::Error> {
        let mut flags = Flags::STANDARD;
        while let Some(item) = seq.next_element::<FlagItem>()? {
            flags |= item.0;
        }
        Ok(flags)
    }
}

/// One list element: a name or an integer.
struct FlagItem(Flags);

impl<'de> Deserialize<'de> for FlagItem {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(FlagsVisitor).map(FlagItem)
    }
}
