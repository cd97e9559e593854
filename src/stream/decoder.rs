/// Incremental UTF-8 decoding across chunk boundaries.
///
/// A multi-byte sequence split between two reads is held back until the rest
/// arrives. Invalid sequences decode to U+FFFD, like a lossy text decoder.
/// One decoder belongs to exactly one stream; its state is position-dependent.
#[derive(Debug, Default)]
pub struct Utf8StreamDecoder {
    remainder: Vec<u8>,
}

impl Utf8StreamDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `bytes` in streaming mode.
    ///
    /// Returns all text that is complete so far; an incomplete trailing
    /// sequence is kept for the next call.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        if self.remainder.is_empty() {
            let mut out = String::with_capacity(bytes.len());
            let tail = push_lossy_prefix(bytes, &mut out);
            self.remainder.extend_from_slice(tail);
            return out;
        }

        self.remainder.extend_from_slice(bytes);
        let pending = std::mem::take(&mut self.remainder);
        let mut out = String::with_capacity(pending.len());
        let tail = push_lossy_prefix(&pending, &mut out);
        self.remainder.extend_from_slice(tail);
        out
    }

    /// End of stream: emit whatever is still held back.
    ///
    /// A truncated trailing sequence becomes U+FFFD.
    pub fn flush(&mut self) -> String {
        if self.remainder.is_empty() {
            return String::new();
        }
        let out = String::from_utf8_lossy(&self.remainder).into_owned();
        self.remainder.clear();
        out
    }

    /// Bytes currently held back waiting for the rest of a sequence.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.remainder.len()
    }
}

/// Append the decodable prefix of `bytes` to `out` and return the incomplete
/// tail (at most three bytes of a sequence that may still complete).
fn push_lossy_prefix<'a>(mut bytes: &'a [u8], out: &mut String) -> &'a [u8] {
    loop {
        match std::str::from_utf8(bytes) {
            Ok(text) => {
                out.push_str(text);
                return &[];
            }
            Err(e) => {
                let valid_up_to = e.valid_up_to();
                // Safety: valid_up_to is guaranteed to be a valid UTF-8 boundary.
                let text = unsafe { std::str::from_utf8_unchecked(&bytes[..valid_up_to]) };
                out.push_str(text);
                match e.error_len() {
                    Some(invalid_len) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        bytes = &bytes[valid_up_to + invalid_len..];
                    }
                    None => return &bytes[valid_up_to..],
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_cjk_characters_decode_cleanly() {
        // "data: 你" + "好\n\n", split inside the UTF-8 stream
        let mut decoder = Utf8StreamDecoder::new();
        let first = decoder.decode(&[0x64, 0x61, 0x74, 0x61, 0x3a, 0x20, 0xe4, 0xbd, 0xa0, 0xe5]);
        assert_eq!(first, "data: 你");
        assert_eq!(decoder.pending_len(), 1);
        let second = decoder.decode(&[0xa5, 0xbd, 0x0a, 0x0a]);
        assert_eq!(second, "好\n\n");
        assert!(decoder.flush().is_empty());
    }

    #[test]
    fn emoji_split_byte_by_byte() {
        let bytes = "测试😀".as_bytes();
        let mut decoder = Utf8StreamDecoder::new();
        let mut text = String::new();
        for byte in bytes {
            text.push_str(&decoder.decode(std::slice::from_ref(byte)));
        }
        text.push_str(&decoder.flush());
        assert_eq!(text, "测试😀");
        assert!(!text.contains(char::REPLACEMENT_CHARACTER));
    }

    #[test]
    fn invalid_bytes_become_replacement_characters() {
        let mut decoder = Utf8StreamDecoder::new();
        assert_eq!(decoder.decode(b"a\xffb"), "a\u{fffd}b");
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn invalid_byte_after_held_prefix() {
        let mut decoder = Utf8StreamDecoder::new();
        assert_eq!(decoder.decode(&[0xe4]), "");
        assert_eq!(decoder.decode(b"x"), "\u{fffd}x");
    }

    #[test]
    fn flush_replaces_truncated_tail() {
        let mut decoder = Utf8StreamDecoder::new();
        assert_eq!(decoder.decode(&[b'o', b'k', 0xf0, 0x9f]), "ok");
        assert_eq!(decoder.flush(), "\u{fffd}");
        assert_eq!(decoder.pending_len(), 0);
    }
}
