//! Printable-string and constant extraction.

use std::sync::LazyLock;

use regex::Regex;

use crate::Instruction;

/// Minimum run length reported by [`extract_strings`].
pub const MIN_STRING_LEN: usize = 4;

static HEX_LITERAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"0x([0-9a-fA-F]+)").unwrap_or_else(|_| unreachable!("static pattern"))
});

/// A printable run found in a byte buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FoundString {
    /// Offset of the first byte within the scanned buffer.
    pub offset: usize,
    pub text: String,
}

const fn is_printable(byte: u8) -> bool {
    matches!(byte, 0x20..=0x7E)
}

/// Scan for maximal runs of printable ASCII at least `min_len` long.
pub fn scan_strings(bytes: &[u8], min_len: usize) -> Vec<FoundString> {
    let mut found = Vec::new();
    let mut start = None;

    for (i, &byte) in bytes.iter().enumerate() {
        match (is_printable(byte), start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                if i - s >= min_len {
                    found.push(FoundString {
                        offset: s,
                        text: String::from_utf8_lossy(&bytes[s..i]).into_owned(),
                    });
                }
                start = None;
            }
            _ => {}
        }
    }

    if let Some(s) = start
        .filter(|&s| bytes.len() - s >= min_len)
    {
        found.push(FoundString {
            offset: s,
            text: String::from_utf8_lossy(&bytes[s..]).into_owned(),
        });
    }

    found
}

/// Printable ASCII runs of at least [`MIN_STRING_LEN`] bytes.
pub fn extract_strings(bytes: &[u8]) -> Vec<String> {
    scan_strings(bytes, MIN_STRING_LEN)
        .into_iter()
        .map(|s| s.text)
        .collect()
}

/// Unique hexadecimal immediates appearing in operand text, in first-seen order.
pub fn find_constants(instructions: &[Instruction]) -> Vec<u64> {
    let mut constants: Vec<u64> = Vec::new();
    for insn in instructions {
        for caps in HEX_LITERAL.captures_iter(&insn.operands) {
            let Ok(value) = u64::from_str_radix(&caps[1], 16) else {
                continue;
            };
            if !constants.contains(&value) {
                constants.push(value);
            }
        }
    }
    constants
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_strings() {
        let data = b"\x00\x01hello\x00abc\x00world!\xffxyzw";
        assert_eq!(extract_strings(data), vec!["hello", "world!", "xyzw"]);
    }

    #[test]
    fn test_short_runs_dropped() {
        assert!(extract_strings(b"abc\x00de\x00f").is_empty());
    }

    #[test]
    fn test_scan_offsets() {
        let found = scan_strings(b"\x7f\x7fGNU libc\x00", 4);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].offset, 2);
        assert_eq!(found[0].text, "GNU libc");
    }

    #[test]
    fn test_find_constants() {
        let insns = vec![
            Instruction {
                operands: "rax, 0x10".into(),
                ..Default::default()
            },
            Instruction {
                operands: "qword ptr [rip + 0x2fe2], 0x10".into(),
                ..Default::default()
            },
        ];
        assert_eq!(find_constants(&insns), vec![0x10, 0x2fe2]);
    }
}
