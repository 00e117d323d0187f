//! MSC operating modes

use core::fmt;
use core::str::FromStr;

use crate::error::MscError;

/// Operating mode of an MSC, as encoded in the CTL.MODE field
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u32)]
pub enum Mode {
    /// One contiguous region
    Single = 0,

    /// Chain of independently allocated windows
    #[default]
    Multi = 1,

    /// External interface, no system memory buffer
    Exi = 2,

    /// Debug mode, no system memory buffer
    Debug = 3,
}

impl Mode {
    /// All modes in register encoding order
    pub const ALL: [Mode; 4] = [Mode::Single, Mode::Multi, Mode::Exi, Mode::Debug];

    /// Decode a raw mode value
    #[inline]
    pub const fn from_raw(v: u32) -> Option<Mode> {
        match v {
            0 => Some(Mode::Single),
            1 => Some(Mode::Multi),
            2 => Some(Mode::Exi),
            3 => Some(Mode::Debug),
            _ => None,
        }
    }

    /// Raw register encoding
    #[inline]
    pub const fn raw(&self) -> u32 {
        *self as u32
    }

    /// Whether this mode stores trace data in a system memory buffer
    #[inline]
    pub const fn has_buffer(&self) -> bool {
        matches!(self, Mode::Single | Mode::Multi)
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Mode::Single => "single",
            Mode::Multi => "multi",
            Mode::Exi => "ExI",
            Mode::Debug => "debug",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Mode {
    type Err = MscError;

    /// Accepts the mode names, with an optional trailing newline.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_suffix('\n').unwrap_or(s);
        Mode::ALL
            .into_iter()
            .find(|m| m.name() == s)
            .ok_or(MscError::InvalidArgument("unknown mode"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_raw_roundtrip() {
        for m in Mode::ALL {
            assert_eq!(Mode::from_raw(m.raw()), Some(m));
        }
        assert_eq!(Mode::from_raw(4), None);
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("single".parse::<Mode>().unwrap(), Mode::Single);
        assert_eq!("multi\n".parse::<Mode>().unwrap(), Mode::Multi);
        assert_eq!("ExI".parse::<Mode>().unwrap(), Mode::Exi);
        assert!("exi".parse::<Mode>().is_err());
        assert!("".parse::<Mode>().is_err());
    }

    #[test]
    fn test_mode_has_buffer() {
        assert!(Mode::Single.has_buffer());
        assert!(Mode::Multi.has_buffer());
        assert!(!Mode::Exi.has_buffer());
        assert!(!Mode::Debug.has_buffer());
    }

    #[test]
    fn test_mode_default() {
        assert_eq!(Mode::default(), Mode::Multi);
    }
}
