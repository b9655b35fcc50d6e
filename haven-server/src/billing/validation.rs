//! Card input validation
//!
//! Runs before any store or provider call; malformed input never leaves the
//! process.

use crate::error::{Error, Result};
use chrono::{DateTime, Datelike, Utc};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct CardDetails {
    pub holder_name: String,
    pub number: String,
    /// `MM/YY`
    pub expiry: String,
    pub cvc: String,
}

pub fn validate_card(card: &CardDetails, now: DateTime<Utc>) -> Result<()> {
    if card.holder_name.trim().is_empty() {
        return Err(Error::Validation("Cardholder name is required".to_string()));
    }

    let digits: String = card
        .number
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect();
    if !(13..=19).contains(&digits.len()) || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::Validation("Card number must be 13 to 19 digits".to_string()));
    }
    if !luhn_valid(&digits) {
        return Err(Error::Validation("Card number is not valid".to_string()));
    }

    let (month, year) = parse_expiry(&card.expiry)
        .ok_or_else(|| Error::Validation("Expiry must be in MM/YY format".to_string()))?;
    // Valid through the last day of the expiry month
    if (year, month) < (now.year(), now.month()) {
        return Err(Error::Validation("Card has expired".to_string()));
    }

    let cvc = card.cvc.trim();
    if !(3..=4).contains(&cvc.len()) || !cvc.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::Validation("Security code must be 3 or 4 digits".to_string()));
    }

    Ok(())
}

/// Luhn checksum over an all-digit string
pub fn luhn_valid(digits: &str) -> bool {
    let mut sum = 0;
    for (i, c) in digits.chars().rev().enumerate() {
        let Some(mut d) = c.to_digit(10) else {
            return false;
        };
        if i % 2 == 1 {
            d *= 2;
            if d > 9 {
                d -= 9;
            }
        }
        sum += d;
    }
    !digits.is_empty() && sum % 10 == 0
}

fn parse_expiry(expiry: &str) -> Option<(u32, i32)> {
    let (mm, yy) = expiry.trim().split_once('/')?;
    let (mm, yy) = (mm.trim(), yy.trim());
    if mm.len() != 2 || yy.len() != 2 {
        return None;
    }
    let month: u32 = mm.parse().ok()?;
    let year: i32 = yy.parse().ok()?;
    (1..=12).contains(&month).then_some((month, 2000 + year))
}
