use alloy::primitives::{B256, Bytes, U256};

/// Largest value the encryption service accepts for a bid (8-bit unsigned).
pub const MAX_QUANTIZED_BID: u8 = u8::MAX;

/// Maps a bid amount onto the range supported by the encryption service by
/// integer division with `unit`, saturating at [`MAX_QUANTIZED_BID`].
///
/// This is lossy: all amounts within the same `unit` wide bucket encrypt to
/// the same value and everything from `256 * unit` upwards collapses into the
/// top bucket. A zero `unit` is rejected when the configuration is validated;
/// should one get here anyway every bid maps to zero.
pub fn quantize(amount: U256, unit: U256) -> u8 {
    let Some(quotient) = amount.checked_div(unit) else {
        return 0;
    };
    u8::try_from(quotient).unwrap_or(MAX_QUANTIZED_BID)
}

/// Ciphertext handle and attestation for one bid. Only lives between the
/// encryption and the submission of the bid.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptedBid {
    pub handle: B256,
    pub attestation: Bytes,
}
