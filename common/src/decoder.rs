use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// How image bytes travel over the topic. Fixed per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// Raw JPEG bytes.
    #[default]
    Binary,
    /// UTF-8 text that already holds the base64-encoded image, standard
    /// alphabet, with or without `=` padding.
    Text,
}

/// Standard alphabet that accepts both padded and unpadded input.
const TEXT_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("payload is empty")]
    Empty,
    #[error("text payload is not valid UTF-8: {0}")]
    NotUtf8(#[from] std::str::Utf8Error),
    #[error("text payload is not valid base64: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
}

/// Base64-encode raw image bytes.
pub fn decode_binary(payload: &[u8]) -> String {
    STANDARD.encode(payload)
}

/// Pass a pre-encoded text payload through unchanged, after checking it
/// really is base64.
pub fn decode_text(payload: &[u8]) -> Result<String, DecodeError> {
    let text = std::str::from_utf8(payload)?;
    TEXT_ENGINE.decode(text)?;
    Ok(text.to_owned())
}

/// Recover the image bytes from base64 text produced by either wire format.
pub fn image_bytes(base64: &str) -> Result<Vec<u8>, DecodeError> {
    Ok(TEXT_ENGINE.decode(base64)?)
}

/// Build the bytes a publisher puts on the wire for one JPEG frame.
pub fn encode_payload(format: WireFormat, jpeg: &[u8]) -> Vec<u8> {
    match format {
        WireFormat::Binary => jpeg.to_vec(),
        WireFormat::Text => STANDARD.encode(jpeg).into_bytes(),
    }
}

/// Turns inbound payloads into base64 image text according to one fixed
/// [`WireFormat`].
#[derive(Debug, Clone, Copy)]
pub struct MessageDecoder {
    format: WireFormat,
}

impl MessageDecoder {
    pub fn new(format: WireFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }

    pub fn decode(&self, payload: &[u8]) -> Result<String, DecodeError> {
        if payload.is_empty() {
            return Err(DecodeError::Empty);
        }
        match self.format {
            WireFormat::Binary => Ok(decode_binary(payload)),
            WireFormat::Text => decode_text(payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_png_magic() {
        assert_eq!(decode_binary(&[0x89, 0x50, 0x4E, 0x47]), "iVBORw==");
    }

    #[test]
    fn binary_roundtrips_every_byte_value() {
        let bytes: Vec<u8> = (0..=255u8).chain((0..=255u8).rev()).collect();
        for len in [0, 1, 2, 3, 4, 255, bytes.len()] {
            let encoded = decode_binary(&bytes[..len]);
            assert_eq!(STANDARD.decode(&encoded).unwrap(), &bytes[..len]);
        }
    }

    #[test]
    fn text_is_identity() {
        for s in ["iVBORw0KGgo=", "iVBORw==", "/9j/4AAQSkZJRg==", ""] {
            assert_eq!(decode_text(s.as_bytes()).unwrap(), s);
        }
    }

    #[test]
    fn text_accepts_unpadded_base64_verbatim() {
        for s in ["iVBORw0KGgo", "iVBORw", "/9j/4AAQSkZJRg"] {
            assert_eq!(decode_text(s.as_bytes()).unwrap(), s);
        }
        assert_eq!(image_bytes("iVBORw").unwrap(), [0x89, 0x50, 0x4E, 0x47]);
    }

    #[test]
    fn text_rejects_non_base64() {
        let err = decode_text(b"not base64!").unwrap_err();
        assert!(matches!(err, DecodeError::InvalidBase64(_)));
    }

    #[test]
    fn text_rejects_invalid_utf8() {
        let err = decode_text(&[0xFF, 0xD8, 0xFF]).unwrap_err();
        assert!(matches!(err, DecodeError::NotUtf8(_)));
    }

    #[test]
    fn decoder_rejects_empty_payload_in_both_modes() {
        for format in [WireFormat::Binary, WireFormat::Text] {
            assert_eq!(MessageDecoder::new(format).decode(b""), Err(DecodeError::Empty));
        }
    }

    #[test]
    fn decoder_follows_configured_format() {
        // "iVBORw==" is valid base64 text, but a binary deployment encodes it again.
        let payload = b"iVBORw==";
        assert_eq!(
            MessageDecoder::new(WireFormat::Text).decode(payload).unwrap(),
            "iVBORw=="
        );
        assert_eq!(
            MessageDecoder::new(WireFormat::Binary).decode(payload).unwrap(),
            "aVZCT1J3PT0="
        );
    }

    #[test]
    fn publisher_payload_matches_viewer_decoding() {
        let jpeg = [0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10];
        for format in [WireFormat::Binary, WireFormat::Text] {
            let wire = encode_payload(format, &jpeg);
            let b64 = MessageDecoder::new(format).decode(&wire).unwrap();
            assert_eq!(STANDARD.decode(b64).unwrap(), jpeg);
        }
    }
}
