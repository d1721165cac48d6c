use base64::Engine;

/// Sample rate of PCM16 audio exchanged with the OpenAI Realtime API and the browser.
pub const PCM16_SAMPLE_RATE: u32 = 24000;

/// Reinterprets little-endian bytes from the browser as PCM16 samples.
/// A trailing odd byte is dropped.
pub fn pcm16_from_le_bytes(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect()
}

/// Base64-encodes PCM16 samples as little-endian bytes.
pub fn encode_i16(pcm16: &[i16]) -> String {
    let pcm16_bytes: Vec<u8> = pcm16
        .iter()
        .flat_map(|&sample| sample.to_le_bytes())
        .collect();
    base64::engine::general_purpose::STANDARD.encode(&pcm16_bytes)
}

/// Length in milliseconds of a base64 PCM16 chunk, without decoding it.
pub fn chunk_duration_ms(base64_fragment: &str) -> u64 {
    let padding = base64_fragment.bytes().rev().take_while(|&b| b == b'=').count();
    let byte_len = (base64_fragment.len() / 4 * 3).saturating_sub(padding);
    (byte_len / 2) as u64 * 1000 / PCM16_SAMPLE_RATE as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm16_from_le_bytes() {
        assert_eq!(pcm16_from_le_bytes(&[0x00, 0x40, 0x00, 0x80]), vec![16384, i16::MIN]);
        assert_eq!(pcm16_from_le_bytes(&[0x01, 0x00, 0xff]), vec![1]);
        assert!(pcm16_from_le_bytes(&[]).is_empty());
    }

    #[test]
    fn test_encode_i16() {
        let encoded = encode_i16(&[256, -256, 0]);
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&encoded)
            .unwrap();
        assert_eq!(bytes, vec![0x00, 0x01, 0x00, 0xff, 0x00, 0x00]);
        assert_eq!(encode_i16(&[]), "");
    }

    #[test]
    fn test_chunk_duration_ms() {
        // 24000 samples = one second
        let one_second = encode_i16(&vec![0i16; 24000]);
        assert_eq!(chunk_duration_ms(&one_second), 1000);

        let odd = encode_i16(&[1, 2, 3]);
        assert_eq!(chunk_duration_ms(&odd), 0);
        assert_eq!(chunk_duration_ms(""), 0);
    }
}
