use thiserror::Error;

/// Wire size of one peer broadcast: two little-endian IEEE-754 floats.
pub const PEER_FRAME_LEN: usize = 8;

/// Decoded peer broadcast payload. The layout must match the sender's
/// packed `(temperature, humidity)` struct byte for byte.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeerFrame {
    pub temperature: f32,
    pub humidity: f32,
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("unexpected frame length {actual} (expected {PEER_FRAME_LEN} bytes)")]
    Length { actual: usize },
}

/// Decode a peer frame. Anything but an exact-length frame is rejected
/// whole; there is no partial interpretation.
pub fn decode_frame(data: &[u8]) -> Result<PeerFrame, FrameError> {
    if data.len() != PEER_FRAME_LEN {
        return Err(FrameError::Length { actual: data.len() });
    }

    Ok(PeerFrame {
        temperature: f32::from_le_bytes(data[0..4].try_into().unwrap()),
        humidity: f32::from_le_bytes(data[4..8].try_into().unwrap()),
    })
}

/// `AA:BB:CC:DD:EE:FF` rendering of a sender address for diagnostics logs.
pub fn format_mac(addr: &[u8]) -> String {
    if addr.is_empty() {
        return "<unknown>".to_string();
    }

    addr.iter()
        .map(|byte| format!("{byte:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn frame_bytes(temperature: f32, humidity: f32) -> Vec<u8> {
        let mut bytes = temperature.to_le_bytes().to_vec();
        bytes.extend_from_slice(&humidity.to_le_bytes());
        bytes
    }

    #[test]
    fn decodes_exact_bit_patterns() {
        let bytes = frame_bytes(23.2, 54.0);
        let frame = decode_frame(&bytes).unwrap();

        assert_eq!(frame.temperature.to_bits(), 23.2_f32.to_bits());
        assert_eq!(frame.humidity.to_bits(), 54.0_f32.to_bits());
    }

    #[test]
    fn decodes_non_finite_values_without_judgement() {
        // No range validation: a well-formed frame carrying garbage decodes.
        let bytes = frame_bytes(f32::NAN, f32::INFINITY);
        let frame = decode_frame(&bytes).unwrap();

        assert!(frame.temperature.is_nan());
        assert!(frame.humidity.is_infinite());
    }

    #[test]
    fn rejects_every_other_length() {
        for len in [0, 1, 4, 7, 9, 16] {
            let bytes = vec![0_u8; len];
            assert_eq!(
                decode_frame(&bytes),
                Err(FrameError::Length { actual: len }),
                "length {len} must be rejected"
            );
        }
    }

    #[test]
    fn formats_sender_addresses() {
        assert_eq!(
            format_mac(&[0xA4, 0xCF, 0x12, 0x00, 0xFE, 0x9B]),
            "A4:CF:12:00:FE:9B"
        );
        assert_eq!(format_mac(&[]), "<unknown>");
    }
}
