/// Incremental UTF-8 decoder for a chunked response body.
///
/// A code point split across chunks is held back until the rest arrives. Invalid
/// sequences become U+FFFD instead of failing the stream.
#[derive(Debug, Default)]
pub struct Utf8StreamDecoder {
    pending: Vec<u8>,
}

impl Utf8StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);

        let mut decoded = String::with_capacity(self.pending.len());
        let mut cursor = 0;

        while cursor < self.pending.len() {
            match std::str::from_utf8(&self.pending[cursor..]) {
                Ok(valid) => {
                    decoded.push_str(valid);
                    cursor = self.pending.len();
                }
                Err(error) => {
                    let valid_end = cursor + error.valid_up_to();
                    // valid_up_to() guarantees this prefix is well-formed.
                    if let Ok(valid) = std::str::from_utf8(&self.pending[cursor..valid_end]) {
                        decoded.push_str(valid);
                    }

                    match error.error_len() {
                        Some(invalid_len) => {
                            decoded.push(char::REPLACEMENT_CHARACTER);
                            cursor = valid_end + invalid_len;
                        }
                        None => {
                            // Truncated sequence at the end: wait for the next chunk.
                            cursor = valid_end;
                            break;
                        }
                    }
                }
            }
        }

        self.pending.drain(..cursor);
        decoded
    }

    /// Flushes bytes left over at end of stream.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            return String::new();
        }
        self.pending.clear();
        char::REPLACEMENT_CHARACTER.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_passes_straight_through() {
        let mut decoder = Utf8StreamDecoder::new();
        assert_eq!(decoder.decode(b"hello "), "hello ");
        assert_eq!(decoder.decode(b"world"), "world");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn split_code_point_is_reassembled() {
        let bytes = "¡olé 🚀!".as_bytes();
        let rocket_start = "¡olé ".len();

        let mut decoder = Utf8StreamDecoder::new();
        let mut rendered = String::new();
        rendered.push_str(&decoder.decode(&bytes[..1]));
        rendered.push_str(&decoder.decode(&bytes[1..rocket_start + 2]));
        rendered.push_str(&decoder.decode(&bytes[rocket_start + 2..]));
        rendered.push_str(&decoder.finish());

        assert_eq!(rendered, "¡olé 🚀!");
    }

    #[test]
    fn half_a_code_point_renders_nothing_yet() {
        let mut decoder = Utf8StreamDecoder::new();
        assert_eq!(decoder.decode(&[0xC3]), "");
        assert_eq!(decoder.decode(&[0xA9]), "é");
    }

    #[test]
    fn invalid_bytes_are_replaced() {
        let mut decoder = Utf8StreamDecoder::new();
        assert_eq!(decoder.decode(b"a\xFFb"), "a\u{FFFD}b");
    }

    #[test]
    fn truncated_tail_flushes_as_replacement() {
        let mut decoder = Utf8StreamDecoder::new();
        assert_eq!(decoder.decode(b"ok\xE2\x82"), "ok");
        assert_eq!(decoder.finish(), "\u{FFFD}");
        assert_eq!(decoder.finish(), "");
    }
}
