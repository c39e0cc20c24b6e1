use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Road-test licence classes the booking site offers.
///
/// The first six are the public (passenger and motorcycle) classes; the rest
/// are commercial. Each variant serializes as its code, e.g. `"G2"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LicenseClass {
    G2,
    G,
    M2,
    M,
    LM2,
    LM,
    A,
    B,
    C,
    D,
    E,
    F,
    Z,
}

impl LicenseClass {
    pub const ALL: [LicenseClass; 13] = [
        LicenseClass::G2,
        LicenseClass::G,
        LicenseClass::M2,
        LicenseClass::M,
        LicenseClass::LM2,
        LicenseClass::LM,
        LicenseClass::A,
        LicenseClass::B,
        LicenseClass::C,
        LicenseClass::D,
        LicenseClass::E,
        LicenseClass::F,
        LicenseClass::Z,
    ];

    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            LicenseClass::G2 => "G2",
            LicenseClass::G => "G",
            LicenseClass::M2 => "M2",
            LicenseClass::M => "M",
            LicenseClass::LM2 => "LM2",
            LicenseClass::LM => "LM",
            LicenseClass::A => "A",
            LicenseClass::B => "B",
            LicenseClass::C => "C",
            LicenseClass::D => "D",
            LicenseClass::E => "E",
            LicenseClass::F => "F",
            LicenseClass::Z => "Z",
        }
    }

    #[must_use]
    pub fn is_commercial(self) -> bool {
        !matches!(
            self,
            LicenseClass::G2
                | LicenseClass::G
                | LicenseClass::M2
                | LicenseClass::M
                | LicenseClass::LM2
                | LicenseClass::LM
        )
    }
}

impl std::fmt::Display for LicenseClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for LicenseClass {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LicenseClass::ALL
            .into_iter()
            .find(|class| class.code() == s)
            .ok_or_else(|| {
                ConfigError::Validation(format!(
                    "unknown licence class \"{s}\"; expected one of {}",
                    LicenseClass::ALL.map(LicenseClass::code).join(", ")
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_code_back_to_itself() {
        for class in LicenseClass::ALL {
            assert_eq!(class.code().parse::<LicenseClass>().unwrap(), class);
        }
    }

    #[test]
    fn parsing_is_case_sensitive() {
        assert!("g2".parse::<LicenseClass>().is_err());
    }

    #[test]
    fn rejects_unknown_code() {
        let err = "Q".parse::<LicenseClass>().unwrap_err();
        assert!(matches!(err, ConfigError::Validation(ref msg) if msg.contains("\"Q\"")));
    }

    #[test]
    fn public_and_commercial_split() {
        assert!(!LicenseClass::G2.is_commercial());
        assert!(!LicenseClass::LM.is_commercial());
        assert!(LicenseClass::A.is_commercial());
        assert!(LicenseClass::Z.is_commercial());
    }

    #[test]
    fn serializes_as_code() {
        let json = serde_json::to_string(&LicenseClass::LM2).unwrap();
        assert_eq!(json, "\"LM2\"");
        let back: LicenseClass = serde_json::from_str("\"G\"").unwrap();
        assert_eq!(back, LicenseClass::G);
    }
}
