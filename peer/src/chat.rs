//! Chat payload validation.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::PeerError;

/// Sender tag used for the local echo of our own chat lines.
pub const YOU: &str = "[You]";

/// Validate a sticker before sending or displaying it: the encoded payload
/// must fit the configured ceiling (so the datagram stays near the MTU) and
/// must decode as Base64.
pub fn validate_sticker(data: &str, max_len: usize) -> Result<(), PeerError> {
    if data.len() > max_len {
        return Err(PeerError::StickerOversize);
    }
    STANDARD
        .decode(data)
        .map_err(|_| PeerError::StickerBadEncoding)?;
    Ok(())
}
