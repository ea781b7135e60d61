/// DTMF digit representation and validation of user-supplied digit strings
use crate::domain::shared::{DomainError, Result};

/// DTMF digit (RFC 4733 events 0-15)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DtmfDigit {
    Zero,
    One,
    Two,
    Three,
    Four,
    Five,
    Six,
    Seven,
    Eight,
    Nine,
    Star,
    Pound,
    A,
    B,
    C,
    D,
}

impl DtmfDigit {
    /// Convert to character representation
    pub fn to_char(&self) -> char {
        match self {
            DtmfDigit::Zero => '0',
            DtmfDigit::One => '1',
            DtmfDigit::Two => '2',
            DtmfDigit::Three => '3',
            DtmfDigit::Four => '4',
            DtmfDigit::Five => '5',
            DtmfDigit::Six => '6',
            DtmfDigit::Seven => '7',
            DtmfDigit::Eight => '8',
            DtmfDigit::Nine => '9',
            DtmfDigit::Star => '*',
            DtmfDigit::Pound => '#',
            DtmfDigit::A => 'A',
            DtmfDigit::B => 'B',
            DtmfDigit::C => 'C',
            DtmfDigit::D => 'D',
        }
    }

    /// Parse from character, letters are case-insensitive
    pub fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            '0' => Some(DtmfDigit::Zero),
            '1' => Some(DtmfDigit::One),
            '2' => Some(DtmfDigit::Two),
            '3' => Some(DtmfDigit::Three),
            '4' => Some(DtmfDigit::Four),
            '5' => Some(DtmfDigit::Five),
            '6' => Some(DtmfDigit::Six),
            '7' => Some(DtmfDigit::Seven),
            '8' => Some(DtmfDigit::Eight),
            '9' => Some(DtmfDigit::Nine),
            '*' => Some(DtmfDigit::Star),
            '#' => Some(DtmfDigit::Pound),
            'A' => Some(DtmfDigit::A),
            'B' => Some(DtmfDigit::B),
            'C' => Some(DtmfDigit::C),
            'D' => Some(DtmfDigit::D),
            _ => None,
        }
    }
}

/// Parse a digit string; empty strings and unknown characters are rejected
pub fn parse_digits(digits: &str) -> Result<Vec<DtmfDigit>> {
    if digits.is_empty() {
        return Err(DomainError::InvalidOperation(
            "DTMF digit string is empty".to_string(),
        ));
    }

    digits
        .chars()
        .map(|c| {
            DtmfDigit::from_char(c).ok_or_else(|| {
                DomainError::InvalidOperation(format!("Invalid DTMF digit {c:?}"))
            })
        })
        .collect()
}

/// Render digits back into the canonical string handed to the stack
pub fn to_string(digits: &[DtmfDigit]) -> String {
    digits.iter().map(DtmfDigit::to_char).collect()
}
