//! Pairing code generation and validation.
//!
//! This module handles the generation and validation of the 4-digit numeric
//! codes one device displays and the other types in to pair.
//!
//! ## Code Format
//!
//! Codes are four decimal digits in the range `1000`–`9999`, giving 9000
//! possible codes. The leading digit is never zero so codes survive being
//! read aloud, written down, or pasted into numeric inputs without losing
//! their length.
//!
//! ## Example
//!
//! ```rust,ignore
//! use droplink_core::code::{CodeGenerator, PairCode};
//!
//! let code = CodeGenerator::new().generate();
//! println!("Pairing code: {code}");
//!
//! let code = PairCode::parse("4821")?;
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Number of digits in a pairing code
pub const CODE_LENGTH: usize = 4;

/// Smallest valid code value
pub const CODE_MIN: u16 = 1000;

/// Largest valid code value
pub const CODE_MAX: u16 = 9999;

/// A validated pairing code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PairCode {
    code: String,
}

impl PairCode {
    /// Parse and validate a pairing code from a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the code is not four digits in `1000`–`9999`.
    pub fn parse(input: &str) -> Result<Self> {
        let normalized = input.trim();

        if normalized.len() != CODE_LENGTH {
            return Err(Error::InvalidCodeFormat(format!(
                "code must be {} digits, got {}",
                CODE_LENGTH,
                normalized.len()
            )));
        }

        let value: u16 = normalized
            .parse()
            .map_err(|_| Error::InvalidCodeFormat(format!("code '{normalized}' is not numeric")))?;

        if !(CODE_MIN..=CODE_MAX).contains(&value) {
            return Err(Error::InvalidCodeFormat(format!(
                "code must be between {CODE_MIN} and {CODE_MAX}"
            )));
        }

        Ok(Self {
            code: normalized.to_string(),
        })
    }

    /// Returns the code as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.code
    }
}

impl std::fmt::Display for PairCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code)
    }
}

impl TryFrom<String> for PairCode {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<PairCode> for String {
    fn from(code: PairCode) -> Self {
        code.code
    }
}

/// Generator for pairing codes.
#[derive(Debug, Default)]
pub struct CodeGenerator {}

impl CodeGenerator {
    /// Create a new code generator.
    #[must_use]
    pub const fn new() -> Self {
        Self {}
    }

    /// Generate a new random pairing code.
    #[must_use]
    pub fn generate(&self) -> PairCode {
        use rand::Rng;

        let value = rand::thread_rng().gen_range(CODE_MIN..=CODE_MAX);

        PairCode {
            code: value.to_string(),
        }
    }
}
