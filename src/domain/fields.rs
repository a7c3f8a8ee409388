//! Field parsers for the registration dialogue.
//!
//! Each collected field gets one parser that returns a normalized value or a
//! `SwapError::Validation` describing what to fix. The dialogue re-prompts
//! the same step on error, so messages are written for the end user.

use crate::domain::{DesiredPlace, Place};
use crate::error::{Result, SwapError};
use chrono::NaiveDate;

/// Parse a single date, normalized to `YYYY-MM-DD`
pub fn parse_date(input: &str) -> Result<String> {
    let trimmed = input.trim();
    let parsed = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%Y/%m/%d"))
        .map_err(|_| {
            SwapError::Validation(format!(
                "'{trimmed}' is not a valid date, expected YYYY-MM-DD"
            ))
        })?;
    Ok(parsed.format("%Y-%m-%d").to_string())
}

/// Parse a time slot of the form `HH:MM-HH:MM`
pub fn parse_slot(input: &str) -> Result<String> {
    let trimmed = input.trim();
    let (start, end) = trimmed.split_once('-').ok_or_else(|| {
        SwapError::Validation(format!(
            "'{trimmed}' is not a valid slot, expected HH:MM-HH:MM"
        ))
    })?;

    let start = parse_clock(start)?;
    let end = parse_clock(end)?;
    if end <= start {
        return Err(SwapError::Validation(format!(
            "slot '{trimmed}' must end after it starts"
        )));
    }

    Ok(format!("{start}-{end}"))
}

fn parse_clock(input: &str) -> Result<String> {
    let trimmed = input.trim();
    let (h, m) = trimmed.split_once(':').ok_or_else(|| {
        SwapError::Validation(format!("'{trimmed}' is not a valid time, expected HH:MM"))
    })?;
    let hour: u32 = h
        .parse()
        .map_err(|_| SwapError::Validation(format!("'{trimmed}' has an invalid hour")))?;
    let minute: u32 = m
        .parse()
        .map_err(|_| SwapError::Validation(format!("'{trimmed}' has an invalid minute")))?;
    if hour > 23 || minute > 59 {
        return Err(SwapError::Validation(format!(
            "'{trimmed}' is not a time of day"
        )));
    }
    Ok(format!("{hour:02}:{minute:02}"))
}

/// Parse a comma-separated list of candidate dates (at least one)
pub fn parse_date_list(input: &str) -> Result<Vec<String>> {
    let dates: Vec<String> = input
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(parse_date)
        .collect::<Result<_>>()?;
    if dates.is_empty() {
        return Err(SwapError::Validation(
            "at least one desired date is required".to_string(),
        ));
    }
    Ok(dates)
}

/// Parse a comma-separated slot list aligned with a previously collected
/// date list; the counts must agree.
pub fn parse_slot_list(input: &str, expected_len: usize) -> Result<Vec<String>> {
    let slots: Vec<String> = input
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(parse_slot)
        .collect::<Result<_>>()?;
    if slots.len() != expected_len {
        return Err(SwapError::Validation(format!(
            "got {} slots for {} dates; list one slot per desired date",
            slots.len(),
            expected_len
        )));
    }
    Ok(slots)
}

/// Parse the original registration venue (closed 2-choice enum)
pub fn parse_place(input: &str) -> Result<Place> {
    Place::try_from(input).map_err(|_| {
        SwapError::Validation(format!(
            "'{}' is not a venue, answer A or B",
            input.trim()
        ))
    })
}

/// Parse the desired venue (closed 3-choice enum including "either")
pub fn parse_desired_place(input: &str) -> Result<DesiredPlace> {
    DesiredPlace::try_from(input).map_err(|_| {
        SwapError::Validation(format!(
            "'{}' is not a venue choice, answer A, B or either",
            input.trim()
        ))
    })
}

/// Non-empty free text (contact, order number)
pub fn parse_nonempty(input: &str, field: &str) -> Result<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(SwapError::Validation(format!("{field} cannot be empty")));
    }
    Ok(trimmed.to_string())
}

/// Phone number: digits with optional separators, at least 7 digits
pub fn parse_phone(input: &str) -> Result<String> {
    let trimmed = input.trim();
    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < 7 || !trimmed.chars().all(|c| c.is_ascii_digit() || "+- ()".contains(c)) {
        return Err(SwapError::Validation(format!(
            "'{trimmed}' does not look like a phone number"
        )));
    }
    Ok(trimmed.to_string())
}

/// Email: a single `@` with non-empty local part and a dotted domain
pub fn parse_email(input: &str) -> Result<String> {
    let trimmed = input.trim();
    let valid = match trimmed.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        None => false,
    };
    if !valid {
        return Err(SwapError::Validation(format!(
            "'{trimmed}' does not look like an email address"
        )));
    }
    Ok(trimmed.to_string())
}
