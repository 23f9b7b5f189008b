//! SCPI response parsing
//!
//! Instruments answer numeric queries with comma separated ASCII values
//! ("1.234E-03", "0,1,0", "+2.5000E+00"). These helpers turn replies into
//! numbers and attach the command to any parse failure.

use crate::adapters::ScpiTransport;
use crate::error::{AppResult, ToolsError};

/// Parse a comma separated list of numbers.
pub fn parse_ascii_values(command: &str, response: &str) -> AppResult<Vec<f64>> {
    let trimmed = response.trim();
    if trimmed.is_empty() {
        return Err(ToolsError::invalid_response(command, response));
    }
    trimmed
        .split(',')
        .map(|item| {
            item.trim()
                .parse::<f64>()
                .map_err(|_| ToolsError::invalid_response(command, response))
        })
        .collect()
}

/// First value of a reply.
pub fn parse_value(command: &str, response: &str) -> AppResult<f64> {
    parse_ascii_values(command, response)?
        .first()
        .copied()
        .ok_or_else(|| ToolsError::invalid_response(command, response))
}

/// First value of a reply as a register word. Fractions are truncated.
pub fn parse_register(command: &str, response: &str) -> AppResult<u32> {
    let value = parse_value(command, response)?;
    if !(0.0..=u32::MAX as f64).contains(&value) {
        return Err(ToolsError::invalid_response(command, response));
    }
    Ok(value as u32)
}

/// Parse a boolean reply ("1", "0", "ON", "OFF").
pub fn parse_bool(command: &str, response: &str) -> AppResult<bool> {
    match response.trim().to_ascii_uppercase().as_str() {
        "1" | "ON" => Ok(true),
        "0" | "OFF" => Ok(false),
        _ => Err(ToolsError::invalid_response(command, response)),
    }
}

/// Remove surrounding double quotes some instruments put around strings.
pub fn unquote(response: &str) -> &str {
    let trimmed = response.trim();
    trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(trimmed)
}

pub async fn query_values<T>(transport: &mut T, command: &str) -> AppResult<Vec<f64>>
where
    T: ScpiTransport + ?Sized,
{
    let response = transport.query(command).await?;
    parse_ascii_values(command, &response)
}

pub async fn query_value<T>(transport: &mut T, command: &str) -> AppResult<f64>
where
    T: ScpiTransport + ?Sized,
{
    let response = transport.query(command).await?;
    parse_value(command, &response)
}

pub async fn query_register<T>(transport: &mut T, command: &str) -> AppResult<u32>
where
    T: ScpiTransport + ?Sized,
{
    let response = transport.query(command).await?;
    parse_register(command, &response)
}

pub async fn query_bool<T>(transport: &mut T, command: &str) -> AppResult<bool>
where
    T: ScpiTransport + ?Sized,
{
    let response = transport.query(command).await?;
    parse_bool(command, &response)
}

/// `*IDN?`
pub async fn identify<T>(transport: &mut T) -> AppResult<String>
where
    T: ScpiTransport + ?Sized,
{
    transport.query("*IDN?").await
}
