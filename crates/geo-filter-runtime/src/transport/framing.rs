//! Message framing for newline-delimited JSON.

use crate::types::{BridgeMessage, RuntimeError, RuntimeResult};

/// Parse a single line of text as a bridge message.
pub fn parse_message(line: &str) -> RuntimeResult<BridgeMessage> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(RuntimeError::ParseError("Empty message".to_string()));
    }

    serde_json::from_str(trimmed).map_err(|e| RuntimeError::ParseError(e.to_string()))
}

/// Serialize a message to a JSON line (with trailing newline).
pub fn frame_message(message: &BridgeMessage) -> RuntimeResult<String> {
    let mut json = serde_json::to_string(message).map_err(RuntimeError::Json)?;
    json.push('\n');
    Ok(json)
}
