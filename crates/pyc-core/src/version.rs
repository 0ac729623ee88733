//! Python releases, their header magic numbers, and code-object layouts.
//!
//! Every CPython release writes a 4-byte magic into the `.pyc` header: a
//! little-endian `u16` magic number followed by `\r\n`. Each minor release
//! owns a range of magic numbers (alphas and betas bump it), so detection
//! works on ranges rather than on exact values.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Trailing bytes shared by every versioned magic.
const MAGIC_TAIL: [u8; 2] = [b'\r', b'\n'];

/// Inclusive magic-number ranges per minor release.
const MAGIC_RANGES: [(u16, u16, PythonVersion); 8] = [
    (3390, 3399, PythonVersion::Py3_7),
    (3400, 3419, PythonVersion::Py3_8),
    (3420, 3429, PythonVersion::Py3_9),
    (3430, 3449, PythonVersion::Py3_10),
    (3450, 3499, PythonVersion::Py3_11),
    (3500, 3549, PythonVersion::Py3_12),
    (3550, 3599, PythonVersion::Py3_13),
    (3600, 3649, PythonVersion::Py3_14),
];

/// The Python release a container targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PythonVersion {
    /// All-zero magic: a placeholder written by tools that do not target a
    /// specific interpreter. Decoded with the newest code layout.
    Unversioned,
    Py3_7,
    Py3_8,
    Py3_9,
    Py3_10,
    Py3_11,
    Py3_12,
    Py3_13,
    Py3_14,
}

/// Field order of a marshalled code object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CodeLayout {
    /// 3.7: no positional-only argument count.
    Py37,
    /// 3.8 to 3.10: `varnames`/`freevars`/`cellvars` tuples and `nlocals`.
    Py38,
    /// 3.11 and later: `localsplusnames`/`localspluskinds`, `qualname`, and
    /// an exception table.
    Py311,
}

impl PythonVersion {
    /// Every concrete release, oldest first.
    pub const RELEASES: [PythonVersion; 8] = [
        PythonVersion::Py3_7,
        PythonVersion::Py3_8,
        PythonVersion::Py3_9,
        PythonVersion::Py3_10,
        PythonVersion::Py3_11,
        PythonVersion::Py3_12,
        PythonVersion::Py3_13,
        PythonVersion::Py3_14,
    ];

    /// Detect the release from a header magic. Returns `None` for magics
    /// that belong to no known release.
    pub fn from_magic(magic: [u8; 4]) -> Option<Self> {
        if magic == [0; 4] {
            return Some(PythonVersion::Unversioned);
        }
        if magic[2..] != MAGIC_TAIL {
            return None;
        }
        let number = u16::from_le_bytes([magic[0], magic[1]]);
        MAGIC_RANGES
            .iter()
            .find(|(lo, hi, _)| (*lo..=*hi).contains(&number))
            .map(|(_, _, version)| *version)
    }

    /// Magic number of the final release of this version.
    pub fn magic_number(self) -> u16 {
        match self {
            PythonVersion::Unversioned => 0,
            PythonVersion::Py3_7 => 3394,
            PythonVersion::Py3_8 => 3413,
            PythonVersion::Py3_9 => 3425,
            PythonVersion::Py3_10 => 3439,
            PythonVersion::Py3_11 => 3495,
            PythonVersion::Py3_12 => 3531,
            PythonVersion::Py3_13 => 3571,
            PythonVersion::Py3_14 => 3627,
        }
    }

    /// The 4-byte header magic for this version.
    pub fn magic(self) -> [u8; 4] {
        if self == PythonVersion::Unversioned {
            return [0; 4];
        }
        let [lo, hi] = self.magic_number().to_le_bytes();
        [lo, hi, MAGIC_TAIL[0], MAGIC_TAIL[1]]
    }

    /// Code-object layout used by this version's marshal format.
    pub fn layout(self) -> CodeLayout {
        match self {
            PythonVersion::Py3_7 => CodeLayout::Py37,
            PythonVersion::Py3_8 | PythonVersion::Py3_9 | PythonVersion::Py3_10 => CodeLayout::Py38,
            PythonVersion::Unversioned
            | PythonVersion::Py3_11
            | PythonVersion::Py3_12
            | PythonVersion::Py3_13
            | PythonVersion::Py3_14 => CodeLayout::Py311,
        }
    }

    pub fn is_versioned(self) -> bool {
        self != PythonVersion::Unversioned
    }
}

impl fmt::Display for PythonVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            PythonVersion::Unversioned => "unversioned",
            PythonVersion::Py3_7 => "3.7",
            PythonVersion::Py3_8 => "3.8",
            PythonVersion::Py3_9 => "3.9",
            PythonVersion::Py3_10 => "3.10",
            PythonVersion::Py3_11 => "3.11",
            PythonVersion::Py3_12 => "3.12",
            PythonVersion::Py3_13 => "3.13",
            PythonVersion::Py3_14 => "3.14",
        };
        f.write_str(text)
    }
}

impl FromStr for PythonVersion {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed == "unversioned" {
            return Ok(PythonVersion::Unversioned);
        }
        Self::RELEASES
            .iter()
            .copied()
            .find(|v| v.to_string() == trimmed)
            .ok_or_else(|| CoreError::UnknownVersion(trimmed.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn final_magics_detect_their_release() {
        for version in PythonVersion::RELEASES {
            assert_eq!(PythonVersion::from_magic(version.magic()), Some(version));
        }
    }

    #[test]
    fn known_magic_bytes() {
        assert_eq!(PythonVersion::Py3_12.magic(), [0xcb, 0x0d, 0x0d, 0x0a]);
        assert_eq!(PythonVersion::Py3_13.magic(), [0xf3, 0x0d, 0x0d, 0x0a]);
        assert_eq!(PythonVersion::Py3_7.magic(), [0x42, 0x0d, 0x0d, 0x0a]);
    }

    #[test]
    fn prerelease_magic_maps_to_minor_release() {
        // 3.12a1 used 3500
        let magic = [0xac, 0x0d, b'\r', b'\n'];
        assert_eq!(PythonVersion::from_magic(magic), Some(PythonVersion::Py3_12));
    }

    #[test]
    fn zero_magic_is_unversioned() {
        assert_eq!(PythonVersion::from_magic([0; 4]), Some(PythonVersion::Unversioned));
        assert_eq!(PythonVersion::Unversioned.layout(), CodeLayout::Py311);
    }

    #[test]
    fn foreign_magic_rejected() {
        assert_eq!(PythonVersion::from_magic(*b"TRC\0"), None);
        // right tail, number below 3.7
        assert_eq!(PythonVersion::from_magic([0x33, 0x0d, b'\r', b'\n']), None);
    }

    #[test]
    fn parse_and_display() {
        let v: PythonVersion = "3.10".parse().unwrap();
        assert_eq!(v, PythonVersion::Py3_10);
        assert_eq!(v.to_string(), "3.10");
        assert!("2.7".parse::<PythonVersion>().is_err());
    }

    #[test]
    fn layouts() {
        assert_eq!(PythonVersion::Py3_7.layout(), CodeLayout::Py37);
        assert_eq!(PythonVersion::Py3_9.layout(), CodeLayout::Py38);
        assert_eq!(PythonVersion::Py3_13.layout(), CodeLayout::Py311);
    }
}
