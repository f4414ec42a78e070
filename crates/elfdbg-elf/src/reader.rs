//! Bounds-checked field reads honouring the file's class and byte order.

/// Byte-order and class aware view over an ELF file.
///
/// Every read is checked; out-of-range reads yield `None` instead of
/// panicking so that malformed tables degrade to partial results.
#[derive(Clone, Copy, Debug)]
pub struct Reader<'a> {
    data: &'a [u8],
    little: bool,
    class64: bool,
}

impl<'a> Reader<'a> {
    pub const fn new(data: &'a [u8], little: bool, class64: bool) -> Self {
        Self {
            data,
            little,
            class64,
        }
    }

    pub const fn data(&self) -> &'a [u8] {
        self.data
    }

    pub const fn is_64bit(&self) -> bool {
        self.class64
    }

    pub const fn is_little_endian(&self) -> bool {
        self.little
    }

    /// Width in bytes of an address-sized field.
    pub const fn word_size(&self) -> usize {
        if self.class64 { 8 } else { 4 }
    }

    pub fn bytes(&self, offset: usize, len: usize) -> Option<&'a [u8]> {
        self.data.get(offset..offset.checked_add(len)?)
    }

    /// Bytes from `offset` clipped to the end of the file, at most `len`.
    pub fn bytes_clipped(&self, offset: usize, len: usize) -> &'a [u8] {
        let start = offset.min(self.data.len());
        let end = offset.saturating_add(len).min(self.data.len());
        &self.data[start..end]
    }

    fn array<const N: usize>(&self, offset: usize) -> Option<[u8; N]> {
        self.bytes(offset, N)?.try_into().ok()
    }

    pub fn u8(&self, offset: usize) -> Option<u8> {
        self.data.get(offset).copied()
    }

    pub fn u16(&self, offset: usize) -> Option<u16> {
        let raw = self.array::<2>(offset)?;
        Some(if self.little {
            u16::from_le_bytes(raw)
        } else {
            u16::from_be_bytes(raw)
        })
    }

    pub fn u32(&self, offset: usize) -> Option<u32> {
        let raw = self.array::<4>(offset)?;
        Some(if self.little {
            u32::from_le_bytes(raw)
        } else {
            u32::from_be_bytes(raw)
        })
    }

    pub fn u64(&self, offset: usize) -> Option<u64> {
        let raw = self.array::<8>(offset)?;
        Some(if self.little {
            u64::from_le_bytes(raw)
        } else {
            u64::from_be_bytes(raw)
        })
    }

    /// Address-sized field: 4 bytes for ELF32, 8 for ELF64.
    pub fn word(&self, offset: usize) -> Option<u64> {
        if self.class64 {
            self.u64(offset)
        } else {
            self.u32(offset).map(u64::from)
        }
    }

    /// NUL-terminated string at `offset`; empty when out of range.
    pub fn cstr(&self, offset: usize) -> String {
        let Some(tail) = self.data.get(offset..) else {
            return String::new();
        };
        let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
        String::from_utf8_lossy(&tail[..end]).into_owned()
    }
}

/// Convert a file-provided 64-bit quantity to `usize`, saturating.
pub fn to_usize(value: u64) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endianness() {
        let data = [0x12, 0x34, 0x56, 0x78];
        assert_eq!(Reader::new(&data, true, false).u32(0), Some(0x7856_3412));
        assert_eq!(Reader::new(&data, false, false).u32(0), Some(0x1234_5678));
        assert_eq!(Reader::new(&data, false, false).u16(2), Some(0x5678));
    }

    #[test]
    fn test_out_of_range() {
        let data = [0u8; 6];
        let r = Reader::new(&data, true, true);
        assert_eq!(r.u64(0), None);
        assert_eq!(r.u32(4), None);
        assert_eq!(r.u16(usize::MAX), None);
        assert_eq!(r.word(0), None);
        assert!(r.cstr(100).is_empty());
        assert!(r.bytes_clipped(4, 100).len() == 2);
    }

    #[test]
    fn test_cstr() {
        let data = b"\0.text\0.data";
        let r = Reader::new(data, true, true);
        assert_eq!(r.cstr(1), ".text");
        assert_eq!(r.cstr(7), ".data");
    }
}
