//! # Value Objects
//!
//! Identifiers, locations and protocol constants.

use crate::errors::JigError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// =============================================================================
// PROTOCOL CONSTANTS
// =============================================================================

/// Marker chunk opening every payload output.
pub const PROTOCOL_MARKER: &[u8] = b"run";

/// Payload protocol version.
pub const PROTOCOL_VERSION: u8 = 0x05;

/// Trailing chunk written when debug mode is on.
pub const DEBUG_MARKER: &[u8] = b"r11r";

/// Largest value a jig may carry.
pub const MAX_SATOSHIS: u64 = 100_000_000;

/// Default minimum output value.
pub const DEFAULT_DUST_SATOSHIS: u64 = 546;

/// Name of the constructor method.
pub const CONSTRUCTOR: &str = "init";

/// Milliseconds since UNIX epoch.
pub type Timestamp = u64;

// =============================================================================
// ARENA IDENTIFIERS
// =============================================================================

/// Arena index of a jig. Stable for the lifetime of the runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JigId(pub u32);

/// Arena index of deployed code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CodeId(pub u32);

/// Either kind of arena object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Handle {
    /// A jig.
    Jig(JigId),
    /// Deployed code.
    Code(CodeId),
}

impl Handle {
    /// Returns the jig id, if this is a jig.
    #[must_use]
    pub fn as_jig(self) -> Option<JigId> {
        match self {
            Self::Jig(id) => Some(id),
            Self::Code(_) => None,
        }
    }

    /// Returns the code id, if this is code.
    #[must_use]
    pub fn as_code(self) -> Option<CodeId> {
        match self {
            Self::Code(id) => Some(id),
            Self::Jig(_) => None,
        }
    }
}

impl fmt::Display for JigId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "jig#{}", self.0)
    }
}

impl fmt::Display for CodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "code#{}", self.0)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Jig(id) => id.fmt(f),
            Self::Code(id) => id.fmt(f),
        }
    }
}

// =============================================================================
// TXID
// =============================================================================

/// 32-byte transaction id, shown as 64 hex characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Txid(pub [u8; 32]);

impl Txid {
    /// Wraps raw bytes.
    #[must_use]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Txid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Txid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Txid({self})")
    }
}

impl FromStr for Txid {
    type Err = LocationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 64 {
            return Err(LocationError::BadTxid(s.to_string()));
        }
        let bytes = hex::decode(s).map_err(|_| LocationError::BadTxid(s.to_string()))?;
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Ok(Self(out))
    }
}

impl Serialize for Txid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Txid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// LOCATION
// =============================================================================

/// Location parse errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LocationError {
    /// Not 64 hex characters.
    #[error("bad txid: {0}")]
    BadTxid(String),
    /// Unrecognised shape.
    #[error("bad location: {0}")]
    Malformed(String),
}

impl From<LocationError> for JigError {
    fn from(err: LocationError) -> Self {
        JigError::Validation(err.to_string())
    }
}

/// Where an object lives, or a placeholder for where it will live.
///
/// ```text
/// <txid>_o<n>   confirmed ledger output
/// _i<n> _o<n>   input / output of the transaction being built
/// _r<n>         side-read listed in the payload refs
/// _d<n>         code definition not yet published
/// _             created, not yet recorded
/// !<reason>     permanently invalid
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Location {
    /// Confirmed ledger output.
    Ledger {
        /// Transaction id.
        txid: Txid,
        /// Output index.
        vout: u32,
    },
    /// Input of the enclosing transaction.
    Input(u32),
    /// Output of the enclosing transaction.
    Output(u32),
    /// Side-read of the enclosing transaction.
    Read(u32),
    /// Unpublished code definition.
    Deploy(u32),
    /// Created, not yet recorded.
    Pending,
    /// Permanently invalid.
    Invalid(String),
}

impl Location {
    /// Confirmed location shorthand.
    #[must_use]
    pub const fn ledger(txid: Txid, vout: u32) -> Self {
        Self::Ledger { txid, vout }
    }

    /// True for `<txid>_o<n>`.
    #[must_use]
    pub fn is_ledger(&self) -> bool {
        matches!(self, Self::Ledger { .. })
    }

    /// True for every `_` form.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            Self::Input(_) | Self::Output(_) | Self::Read(_) | Self::Deploy(_) | Self::Pending
        )
    }

    /// True for `!` forms.
    #[must_use]
    pub fn is_invalid(&self) -> bool {
        matches!(self, Self::Invalid(_))
    }

    /// Txid and vout of a confirmed location.
    #[must_use]
    pub fn outpoint(&self) -> Option<(Txid, u32)> {
        match self {
            Self::Ledger { txid, vout } => Some((*txid, *vout)),
            _ => None,
        }
    }

    /// Marks this location permanently invalid, keeping the old text.
    #[must_use]
    pub fn invalidate(&self) -> Self {
        match self {
            Self::Invalid(_) => self.clone(),
            other => Self::Invalid(other.to_string()),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ledger { txid, vout } => write!(f, "{txid}_o{vout}"),
            Self::Input(n) => write!(f, "_i{n}"),
            Self::Output(n) => write!(f, "_o{n}"),
            Self::Read(n) => write!(f, "_r{n}"),
            Self::Deploy(n) => write!(f, "_d{n}"),
            Self::Pending => f.write_str("_"),
            Self::Invalid(reason) => write!(f, "!{reason}"),
        }
    }
}

impl FromStr for Location {
    type Err = LocationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || LocationError::Malformed(s.to_string());

        if let Some(reason) = s.strip_prefix('!') {
            return Ok(Self::Invalid(reason.to_string()));
        }
        if s == "_" {
            return Ok(Self::Pending);
        }
        if let Some(rest) = s.strip_prefix('_') {
            let mut chars = rest.chars();
            let kind = chars.next().ok_or_else(malformed)?;
            let n: u32 = chars.as_str().parse().map_err(|_| malformed())?;
            return match kind {
                'i' => Ok(Self::Input(n)),
                'o' => Ok(Self::Output(n)),
                'r' => Ok(Self::Read(n)),
                'd' => Ok(Self::Deploy(n)),
                _ => Err(malformed()),
            };
        }
        let (txid, vout) = s.split_once("_o").ok_or_else(malformed)?;
        let txid = txid.parse()?;
        let vout = vout.parse().map_err(|_| malformed())?;
        Ok(Self::Ledger { txid, vout })
    }
}

impl Serialize for Location {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Location {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// VALIDATORS
// =============================================================================

/// Checks an owner string: non-empty, no whitespace.
pub fn validate_owner(owner: &str) -> Result<(), JigError> {
    if owner.is_empty() || owner.chars().any(char::is_whitespace) {
        return Err(JigError::validation(format!("invalid owner: {owner:?}")));
    }
    Ok(())
}

/// Checks a satoshi amount is a non-negative integer within bounds.
pub fn validate_satoshis(amount: i64) -> Result<u64, JigError> {
    u64::try_from(amount)
        .ok()
        .filter(|sats| *sats <= MAX_SATOSHIS)
        .ok_or_else(|| JigError::validation(format!("satoshis out of range: {amount}")))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn txid(n: u8) -> Txid {
        Txid::new([n; 32])
    }

    #[test]
    fn test_location_display() {
        let loc = Location::ledger(txid(0xab), 3);
        assert_eq!(loc.to_string(), format!("{}_o3", "ab".repeat(32)));
        assert_eq!(Location::Input(2).to_string(), "_i2");
        assert_eq!(Location::Deploy(0).to_string(), "_d0");
        assert_eq!(Location::Pending.to_string(), "_");
    }

    #[test]
    fn test_location_parse_placeholders() {
        assert_eq!("_o7".parse::<Location>().unwrap(), Location::Output(7));
        assert_eq!("_r0".parse::<Location>().unwrap(), Location::Read(0));
        assert!("_x1".parse::<Location>().is_err());
        assert!("_o".parse::<Location>().is_err());
        assert!("deadbeef_o1".parse::<Location>().is_err());
    }

    #[test]
    fn test_invalidate_keeps_text() {
        let loc = Location::Output(1);
        let bad = loc.invalidate();
        assert!(bad.is_invalid());
        assert_eq!(bad.to_string(), "!_o1");
        assert_eq!(bad.invalidate(), bad);
    }

    #[test]
    fn test_validate_satoshis() {
        assert_eq!(validate_satoshis(0).unwrap(), 0);
        assert_eq!(validate_satoshis(MAX_SATOSHIS as i64).unwrap(), MAX_SATOSHIS);
        assert!(validate_satoshis(-1).is_err());
        assert!(validate_satoshis(MAX_SATOSHIS as i64 + 1).is_err());
    }

    #[test]
    fn test_validate_owner() {
        assert!(validate_owner("02abcdef").is_ok());
        assert!(validate_owner("").is_err());
        assert!(validate_owner("a b").is_err());
    }

    proptest! {
        #[test]
        fn prop_ledger_location_parses_back(bytes in any::<[u8; 32]>(), vout in any::<u32>()) {
            let loc = Location::ledger(Txid::new(bytes), vout);
            let parsed: Location = loc.to_string().parse().unwrap();
            prop_assert_eq!(parsed, loc);
        }
    }
}
