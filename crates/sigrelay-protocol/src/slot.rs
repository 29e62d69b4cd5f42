//! The two fixed positions a peer can occupy on a path.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// One of the two slots of a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Slot {
    Zero,
    One,
}

impl Slot {
    /// Both slots, in index order.
    pub const ALL: [Slot; 2] = [Slot::Zero, Slot::One];

    /// Returns the slot's index.
    pub const fn index(self) -> usize {
        match self {
            Slot::Zero => 0,
            Slot::One => 1,
        }
    }

    /// Returns the opposite slot.
    pub const fn other(self) -> Slot {
        match self {
            Slot::Zero => Slot::One,
            Slot::One => Slot::Zero,
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.index())
    }
}

impl From<Slot> for u8 {
    fn from(slot: Slot) -> Self {
        match slot {
            Slot::Zero => 0,
            Slot::One => 1,
        }
    }
}

impl TryFrom<u8> for Slot {
    type Error = SlotError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Slot::Zero),
            1 => Ok(Slot::One),
            _ => Err(SlotError(value.to_string())),
        }
    }
}

/// Only the literal segments `0` and `1` name a slot.
///
/// Signs, whitespace and leading zeros are rejected so that every slot has
/// exactly one spelling in a request target.
impl FromStr for Slot {
    type Err = SlotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "0" => Ok(Slot::Zero),
            "1" => Ok(Slot::One),
            _ => Err(SlotError(s.to_string())),
        }
    }
}

/// A value that does not name a slot.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid slot '{0}' (expected 0 or 1)")]
pub struct SlotError(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_other_is_involution() {
        for slot in Slot::ALL {
            assert_ne!(slot.other(), slot);
            assert_eq!(slot.other().other(), slot);
        }
    }

    #[test]
    fn test_parse_literal_slots() {
        assert_eq!("0".parse::<Slot>().unwrap(), Slot::Zero);
        assert_eq!("1".parse::<Slot>().unwrap(), Slot::One);
    }

    #[test]
    fn test_parse_rejects_other_spellings() {
        for bad in ["2", "-1", "+1", " 1", "01", "", "one", "1.0"] {
            assert!(bad.parse::<Slot>().is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_try_from_u8() {
        assert_eq!(Slot::try_from(1u8).unwrap(), Slot::One);
        let err = Slot::try_from(7u8).unwrap_err();
        assert!(err.to_string().contains('7'));
    }

    #[test]
    fn test_display_is_index() {
        assert_eq!(Slot::Zero.to_string(), "0");
        assert_eq!(Slot::One.to_string(), "1");
    }
}
