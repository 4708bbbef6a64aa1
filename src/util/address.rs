use alloy::primitives::Address;

use crate::error::{EngineError, EngineResult};

/// Validate and checksum-normalize an EVM address.
///
/// Lowercase (or uppercase) hex is accepted and normalized to EIP-55 form.
/// Mixed-case input must carry a correct checksum; a mismatch is rejected
/// rather than silently corrected so the caller re-supplies the exact
/// address they meant.
pub fn normalize_evm_address(input: &str) -> EngineResult<String> {
    let s = input.trim();

    let hex = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .ok_or_else(|| EngineError::Validation("address must start with 0x".into()))?;

    if hex.len() != 40 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(EngineError::Validation(
            "address must be 0x followed by 40 hex characters".into(),
        ));
    }

    let has_lower = hex.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = hex.chars().any(|c| c.is_ascii_uppercase());

    if has_lower && has_upper {
        // Mixed case: the checksum is a claim, verify it.
        let addr = Address::parse_checksummed(format!("0x{hex}"), None)
            .map_err(|_| EngineError::Validation("address checksum mismatch".into()))?;
        return Ok(addr.to_checksum(None));
    }

    let addr: Address = format!("0x{}", hex.to_lowercase())
        .parse()
        .map_err(|_| EngineError::Validation("invalid address".into()))?;
    Ok(addr.to_checksum(None))
}
