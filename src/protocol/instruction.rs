//! Instruction value type and wire encoding.
//!
//! An instruction is an opcode plus ordered string arguments, the unit of
//! the wire protocol. On the wire each element is written as
//! `<decimal-length>.<content>`, elements are joined by `,` and the
//! instruction is terminated by `;`:
//!
//! ```text
//! 4.sync,2.42;        (opcode "sync", one argument "42")
//! ```
//!
//! Element lengths count unicode scalar values, not bytes, so multi-byte
//! content survives the round trip.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

// ============================================================================
// Delimiters
// ============================================================================

/// Separates an element's length prefix from its content.
pub(crate) const DOT: char = '.';

/// Separates elements of one instruction.
pub(crate) const COMMA: char = ',';

/// Terminates an instruction.
pub(crate) const SEMICOLON: char = ';';

// ============================================================================
// Instruction
// ============================================================================

/// One opcode plus ordered string arguments.
///
/// Immutable once decoded or constructed. Produced by the transport
/// decoder, consumed by the instruction dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    opcode: String,
    args: Vec<String>,
}

impl Instruction {
    /// Creates an instruction from an opcode and arguments.
    #[must_use]
    pub fn new(opcode: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            opcode: opcode.into(),
            args,
        }
    }

    /// Convenience constructor from string slices.
    #[must_use]
    pub fn of(opcode: &str, args: &[&str]) -> Self {
        Self {
            opcode: opcode.to_string(),
            args: args.iter().map(|a| (*a).to_string()).collect(),
        }
    }

    /// Returns the opcode.
    #[inline]
    #[must_use]
    pub fn opcode(&self) -> &str {
        &self.opcode
    }

    /// Returns the ordered argument list.
    #[inline]
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Returns the argument at `index`, or the empty string.
    ///
    /// The wire protocol treats absent trailing arguments as empty, so
    /// handlers can index without bounds ceremony.
    #[inline]
    #[must_use]
    pub fn arg(&self, index: usize) -> &str {
        self.args.get(index).map_or("", String::as_str)
    }

    /// Encodes the instruction into its wire form.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(self.wire_len_hint());
        encode_element(&mut out, &self.opcode);
        for arg in &self.args {
            out.push(COMMA);
            encode_element(&mut out, arg);
        }
        out.push(SEMICOLON);
        out
    }

    /// Rough size hint for the encoded form.
    fn wire_len_hint(&self) -> usize {
        let payload: usize = self.args.iter().map(String::len).sum::<usize>() + self.opcode.len();
        // length prefixes + delimiters
        payload + (self.args.len() + 1) * 8
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Appends one `<length>.<content>` element.
fn encode_element(out: &mut String, element: &str) {
    let chars = element.chars().count();
    out.push_str(&chars.to_string());
    out.push(DOT);
    out.push_str(element);
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_simple() {
        let ins = Instruction::of("sync", &["42"]);
        assert_eq!(ins.encode(), "4.sync,2.42;");
    }

    #[test]
    fn test_encode_no_args() {
        let ins = Instruction::of("nop", &[]);
        assert_eq!(ins.encode(), "3.nop;");
    }

    #[test]
    fn test_encode_empty_arg() {
        let ins = Instruction::of("clipboard", &["1", ""]);
        assert_eq!(ins.encode(), "9.clipboard,1.1,0.;");
    }

    #[test]
    fn test_encode_counts_chars_not_bytes() {
        // two scalar values, six bytes
        let ins = Instruction::of("name", &["桌面"]);
        assert_eq!(ins.encode(), "4.name,2.桌面;");
    }

    #[test]
    fn test_encode_reserved_characters() {
        // content containing the protocol delimiters is carried verbatim,
        // protected by the length prefix
        let ins = Instruction::of("put", &["a.b,c;d"]);
        assert_eq!(ins.encode(), "3.put,7.a.b,c;d;");
    }

    #[test]
    fn test_arg_out_of_range_is_empty() {
        let ins = Instruction::of("key", &["65307"]);
        assert_eq!(ins.arg(0), "65307");
        assert_eq!(ins.arg(1), "");
        assert_eq!(ins.arg(9), "");
    }
}
