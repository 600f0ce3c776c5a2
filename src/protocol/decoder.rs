//! Incremental wire decoder.
//!
//! The transport delivers instruction text in arbitrary fragments: one
//! network read may carry half an instruction, or several instructions and
//! the head of the next. [`InstructionDecoder`] buffers fed text and yields
//! complete instructions in arrival order, leaving partial input pending
//! until the terminating `;` arrives.
//!
//! Malformed input (non-numeric length prefix, oversized element, wrong
//! element terminator) is a protocol error, never a silent stall.

// ============================================================================
// Imports
// ============================================================================

use crate::error::{Error, Result};

use super::instruction::{COMMA, DOT, Instruction, SEMICOLON};

// ============================================================================
// Constants
// ============================================================================

/// Maximum digits accepted in an element length prefix.
const MAX_LENGTH_DIGITS: usize = 8;

/// Maximum element length in unicode scalar values.
///
/// Blob chunks are a few kilobytes; anything near this bound is a corrupt
/// or hostile frame.
const MAX_ELEMENT_CHARS: usize = 1 << 22;

// ============================================================================
// InstructionDecoder
// ============================================================================

/// Restartable decoder for `;`-terminated instruction frames.
///
/// Feed raw text with [`feed`](Self::feed), then drain complete
/// instructions with [`poll`](Self::poll). The decoder is restartable
/// against any fragmentation: splitting an encoded frame at every possible
/// boundary yields the same instructions.
#[derive(Debug, Default)]
pub struct InstructionDecoder {
    /// Undecoded tail, kept as scalar values because length prefixes count
    /// characters.
    buf: Vec<char>,
}

impl InstructionDecoder {
    /// Creates an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends raw text received from the transport.
    pub fn feed(&mut self, chunk: &str) {
        self.buf.extend(chunk.chars());
    }

    /// Returns the next complete instruction, if one is buffered.
    ///
    /// `Ok(None)` means more input is needed; the pending fragment stays
    /// buffered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] on a malformed length prefix or element
    /// terminator. The decoder is poisoned for the connection at that
    /// point; callers treat this as fatal.
    pub fn poll(&mut self) -> Result<Option<Instruction>> {
        let mut pos = 0usize;
        let mut elements: Vec<String> = Vec::new();

        loop {
            // Parse the decimal length prefix.
            let digits_start = pos;
            while pos < self.buf.len() && self.buf[pos].is_ascii_digit() {
                pos += 1;
            }
            if pos - digits_start > MAX_LENGTH_DIGITS {
                return Err(Error::protocol("element length prefix too long"));
            }
            if pos >= self.buf.len() {
                return Ok(None);
            }
            if self.buf[pos] != DOT {
                return Err(Error::protocol(format!(
                    "expected '.' after length prefix, found {:?}",
                    self.buf[pos]
                )));
            }
            if pos == digits_start {
                return Err(Error::protocol("empty element length prefix"));
            }
            let length: usize = self.buf[digits_start..pos]
                .iter()
                .collect::<String>()
                .parse()
                .map_err(|_| Error::protocol("unparsable element length prefix"))?;
            if length > MAX_ELEMENT_CHARS {
                return Err(Error::protocol(format!(
                    "element length {length} exceeds limit"
                )));
            }

            // Wait for the content plus its one-character terminator.
            let content_start = pos + 1;
            let terminator_at = content_start + length;
            if terminator_at >= self.buf.len() {
                return Ok(None);
            }

            elements.push(self.buf[content_start..terminator_at].iter().collect());

            match self.buf[terminator_at] {
                COMMA => pos = terminator_at + 1,
                SEMICOLON => {
                    self.buf.drain(..=terminator_at);
                    let opcode = elements.remove(0);
                    return Ok(Some(Instruction::new(opcode, elements)));
                }
                other => {
                    return Err(Error::protocol(format!(
                        "expected ',' or ';' after element, found {other:?}"
                    )));
                }
            }
        }
    }

    /// Feeds a chunk and drains every instruction it completes.
    ///
    /// # Errors
    ///
    /// Returns the first [`Error::Protocol`] encountered; instructions
    /// decoded before the malformed frame are lost with the connection.
    pub fn decode(&mut self, chunk: &str) -> Result<Vec<Instruction>> {
        self.feed(chunk);
        let mut out = Vec::new();
        while let Some(ins) = self.poll()? {
            out.push(ins);
        }
        Ok(out)
    }

    /// Returns `true` if a partial frame is pending.
    #[inline]
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.buf.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    fn decode_one(raw: &str) -> Instruction {
        let mut dec = InstructionDecoder::new();
        let mut got = dec.decode(raw).expect("decode");
        assert_eq!(got.len(), 1, "expected one instruction from {raw:?}");
        got.remove(0)
    }

    #[test]
    fn test_decode_simple() {
        let ins = decode_one("4.sync,2.42;");
        assert_eq!(ins.opcode(), "sync");
        assert_eq!(ins.args(), &["42".to_string()]);
    }

    #[test]
    fn test_decode_no_args() {
        let ins = decode_one("3.nop;");
        assert_eq!(ins.opcode(), "nop");
        assert!(ins.args().is_empty());
    }

    #[test]
    fn test_decode_empty_elements() {
        let ins = decode_one("0.,0.,3.abc;");
        assert_eq!(ins.opcode(), "");
        assert_eq!(ins.args(), &[String::new(), "abc".to_string()]);
    }

    #[test]
    fn test_decode_reserved_characters_in_content() {
        let ins = decode_one("3.put,7.a.b,c;d;");
        assert_eq!(ins.opcode(), "put");
        assert_eq!(ins.arg(0), "a.b,c;d");
    }

    #[test]
    fn test_decode_unicode_lengths() {
        let ins = decode_one("4.name,2.桌面;");
        assert_eq!(ins.arg(0), "桌面");
    }

    #[test]
    fn test_decode_multiple_instructions_one_read() {
        let mut dec = InstructionDecoder::new();
        let got = dec.decode("3.nop;4.sync,2.42;").expect("decode");
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].opcode(), "nop");
        assert_eq!(got[1].opcode(), "sync");
        assert!(!dec.has_pending());
    }

    #[test]
    fn test_partial_frame_stays_pending() {
        let mut dec = InstructionDecoder::new();
        assert!(dec.decode("4.syn").expect("decode").is_empty());
        assert!(dec.has_pending());
        let got = dec.decode("c,2.42;").expect("decode");
        assert_eq!(got.len(), 1);
        assert_eq!(got[0], Instruction::of("sync", &["42"]));
    }

    #[test]
    fn test_split_at_every_byte_boundary() {
        let encoded = Instruction::of("clipboard", &["1", "text/plain", "桌面 ;,."]).encode();
        let chars: Vec<char> = encoded.chars().collect();
        for split in 1..chars.len() {
            let head: String = chars[..split].iter().collect();
            let tail: String = chars[split..].iter().collect();
            let mut dec = InstructionDecoder::new();
            assert!(dec.decode(&head).expect("head").is_empty());
            let got = dec.decode(&tail).expect("tail");
            assert_eq!(got.len(), 1, "split at {split}");
            assert_eq!(got[0].encode(), encoded);
        }
    }

    #[test]
    fn test_malformed_length_prefix_is_error() {
        let mut dec = InstructionDecoder::new();
        assert!(dec.decode("x.sync;").is_err());

        let mut dec = InstructionDecoder::new();
        assert!(dec.decode(".sync;").is_err());
    }

    #[test]
    fn test_oversized_length_prefix_is_error() {
        let mut dec = InstructionDecoder::new();
        assert!(dec.decode("999999999.x;").is_err());
    }

    #[test]
    fn test_bad_element_terminator_is_error() {
        // length prefix claims 3 but the element is followed by neither
        // ',' nor ';'
        let mut dec = InstructionDecoder::new();
        assert!(dec.decode("3.syncX").is_err());
    }

    proptest! {
        #[test]
        fn prop_roundtrip(opcode in "[a-z]{0,8}", args in proptest::collection::vec(".{0,12}", 0..4)) {
            let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
            let ins = Instruction::of(&opcode, &arg_refs);
            let decoded = decode_one(&ins.encode());
            prop_assert_eq!(decoded, ins);
        }

        #[test]
        fn prop_fragmentation_restartable(split in 1usize..64, args in proptest::collection::vec(".{0,16}", 1..4)) {
            let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
            let ins = Instruction::of("blob", &arg_refs);
            let encoded: Vec<char> = ins.encode().chars().collect();
            let split = split.min(encoded.len() - 1);

            let head: String = encoded[..split].iter().collect();
            let tail: String = encoded[split..].iter().collect();
            let mut dec = InstructionDecoder::new();
            let mut got = dec.decode(&head).expect("head");
            got.extend(dec.decode(&tail).expect("tail"));
            prop_assert_eq!(got.len(), 1);
            prop_assert_eq!(got.remove(0), ins);
        }
    }
}
