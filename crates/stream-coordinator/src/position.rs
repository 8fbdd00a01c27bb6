//! The `move_to` argument, parsed once at a single boundary into a tagged variant
//! rather than dispatched dynamically throughout the coordinator.

use crate::error::{Error, Result};
use crate::token::Token;

/// A resolved seek target. Built either directly (`Position::TrimHorizon`, etc.) or
/// by [`Position::parse`] from a dynamically-shaped caller-supplied value.
#[derive(Debug, Clone)]
pub enum Position {
    TrimHorizon,
    Latest,
    AtTime(time::OffsetDateTime),
    FromToken(Token),
}

impl Position {
    /// Parses a closed set of shapes: a case-insensitive `"trim_horizon"`/
    /// `"latest"` string, an RFC 3339 timestamp string, or a JSON object matching
    /// the token schema. Anything else fails with [`Error::InvalidPosition`].
    pub fn parse(value: &serde_json::Value) -> Result<Position> {
        if let Some(s) = value.as_str() {
            return match s.to_ascii_lowercase().as_str() {
                "trim_horizon" => Ok(Position::TrimHorizon),
                "latest" => Ok(Position::Latest),
                _ => time::OffsetDateTime::parse(s, &time::format_description::well_known::Rfc3339)
                    .map(Position::AtTime)
                    .map_err(|_| Error::InvalidPosition(s.to_string())),
            };
        }

        if value.is_object() {
            let token: Token = serde_json::from_value(value.clone())
                .map_err(|_| Error::InvalidPosition(value.to_string()))?;
            return Ok(Position::FromToken(token));
        }

        Err(Error::InvalidPosition(value.to_string()))
    }
}

impl From<Token> for Position {
    fn from(token: Token) -> Self {
        Position::FromToken(token)
    }
}
