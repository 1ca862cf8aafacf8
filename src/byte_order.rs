//! Helpers for explicit byte-order conversions.
//!
//! Length fields may be one, two, four or eight bytes wide and may be encoded
//! in either network (big-endian) or little-endian order. These helpers keep
//! Clippy expectations scoped to the conversion points so the codec code can
//! remain explicit about wire endianness without repeating lint annotations.

/// Width of an unsigned integer field on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntWidth {
    /// One byte.
    U8,
    /// Two bytes.
    U16,
    /// Four bytes.
    U32,
    /// Eight bytes.
    U64,
}

impl IntWidth {
    /// Number of bytes occupied by the field.
    #[must_use]
    pub const fn byte_len(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
            Self::U32 => 4,
            Self::U64 => 8,
        }
    }
}

impl TryFrom<usize> for IntWidth {
    type Error = ();

    fn try_from(bytes: usize) -> Result<Self, Self::Error> {
        match bytes {
            1 => Ok(Self::U8),
            2 => Ok(Self::U16),
            4 => Ok(Self::U32),
            8 => Ok(Self::U64),
            _ => Err(()),
        }
    }
}

/// Byte order of a multi-byte integer on the wire.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ByteOrder {
    /// Network byte order, most significant byte first.
    #[default]
    BigEndian,
    /// Least significant byte first.
    LittleEndian,
}

impl ByteOrder {
    /// Map the `networkByteOrder` flag used by decoder configuration onto a
    /// [`ByteOrder`].
    #[must_use]
    pub const fn from_network_flag(network: bool) -> Self {
        if network {
            Self::BigEndian
        } else {
            Self::LittleEndian
        }
    }

    /// Read a `width` byte unsigned integer from the start of `bytes`.
    ///
    /// Returns `None` when fewer than `width` bytes are available.
    ///
    /// # Examples
    ///
    /// ```
    /// use wireproxy::byte_order::{ByteOrder, IntWidth};
    ///
    /// assert_eq!(ByteOrder::BigEndian.read_uint(IntWidth::U16, &[0x01, 0x02]), Some(0x0102));
    /// assert_eq!(ByteOrder::LittleEndian.read_uint(IntWidth::U16, &[0x01, 0x02]), Some(0x0201));
    /// assert_eq!(ByteOrder::BigEndian.read_uint(IntWidth::U32, &[0; 3]), None);
    /// ```
    #[must_use]
    pub fn read_uint(self, width: IntWidth, bytes: &[u8]) -> Option<u64> {
        let field = bytes.get(..width.byte_len())?;
        match width {
            IntWidth::U8 => Some(u64::from(field[0])),
            IntWidth::U16 => <[u8; 2]>::try_from(field)
                .ok()
                .map(|b| u64::from(self.read_u16(b))),
            IntWidth::U32 => <[u8; 4]>::try_from(field)
                .ok()
                .map(|b| u64::from(self.read_u32(b))),
            IntWidth::U64 => <[u8; 8]>::try_from(field).ok().map(|b| self.read_u64(b)),
        }
    }

    /// Append `value` to `dst` as a `width` byte integer in this byte order.
    ///
    /// Returns `None`, leaving `dst` untouched, when `value` does not fit in
    /// `width` bytes.
    ///
    /// # Examples
    ///
    /// ```
    /// use wireproxy::byte_order::{ByteOrder, IntWidth};
    ///
    /// let mut out = Vec::new();
    /// ByteOrder::LittleEndian.write_uint(0x0102, IntWidth::U16, &mut out);
    /// assert_eq!(out, [0x02, 0x01]);
    /// assert!(ByteOrder::BigEndian.write_uint(256, IntWidth::U8, &mut out).is_none());
    /// ```
    pub fn write_uint(self, value: u64, width: IntWidth, dst: &mut Vec<u8>) -> Option<()> {
        match width {
            IntWidth::U8 => dst.push(u8::try_from(value).ok()?),
            IntWidth::U16 => dst.extend_from_slice(&self.write_u16(u16::try_from(value).ok()?)),
            IntWidth::U32 => dst.extend_from_slice(&self.write_u32(u32::try_from(value).ok()?)),
            IntWidth::U64 => dst.extend_from_slice(&self.write_u64(value)),
        }
        Some(())
    }

    fn read_u16(self, bytes: [u8; 2]) -> u16 {
        match self {
            Self::BigEndian => read_network_u16(bytes),
            Self::LittleEndian => u16::from_le_bytes(bytes),
        }
    }

    fn read_u32(self, bytes: [u8; 4]) -> u32 {
        match self {
            Self::BigEndian => read_network_u32(bytes),
            Self::LittleEndian => u32::from_le_bytes(bytes),
        }
    }

    fn read_u64(self, bytes: [u8; 8]) -> u64 {
        match self {
            Self::BigEndian => read_network_u64(bytes),
            Self::LittleEndian => u64::from_le_bytes(bytes),
        }
    }

    fn write_u16(self, value: u16) -> [u8; 2] {
        match self {
            Self::BigEndian => write_network_u16(value),
            Self::LittleEndian => value.to_le_bytes(),
        }
    }

    fn write_u32(self, value: u32) -> [u8; 4] {
        match self {
            Self::BigEndian => write_network_u32(value),
            Self::LittleEndian => value.to_le_bytes(),
        }
    }

    fn write_u64(self, value: u64) -> [u8; 8] {
        match self {
            Self::BigEndian => write_network_u64(value),
            Self::LittleEndian => value.to_le_bytes(),
        }
    }
}

/// Serialise a `u16` in network byte order (big-endian).
#[must_use]
pub fn write_network_u16(value: u16) -> [u8; 2] {
    #[expect(
        clippy::big_endian_bytes,
        reason = "Network byte order requires big-endian bytes."
    )]
    value.to_be_bytes()
}

/// Parse a network-order `u16` from its on-wire representation.
#[must_use]
pub fn read_network_u16(bytes: [u8; 2]) -> u16 {
    #[expect(
        clippy::big_endian_bytes,
        reason = "Network byte order requires big-endian bytes."
    )]
    u16::from_be_bytes(bytes)
}

/// Serialise a `u32` in network byte order (big-endian).
///
/// # Examples
///
/// ```
/// use wireproxy::byte_order::write_network_u32;
///
/// assert_eq!(write_network_u32(0x1234_5678), [0x12, 0x34, 0x56, 0x78]);
/// ```
#[must_use]
pub fn write_network_u32(value: u32) -> [u8; 4] {
    #[expect(
        clippy::big_endian_bytes,
        reason = "Network byte order requires big-endian bytes."
    )]
    value.to_be_bytes()
}

/// Parse a network-order `u32` from its on-wire representation.
#[must_use]
pub fn read_network_u32(bytes: [u8; 4]) -> u32 {
    #[expect(
        clippy::big_endian_bytes,
        reason = "Network byte order requires big-endian bytes."
    )]
    u32::from_be_bytes(bytes)
}

/// Serialise a `u64` in network byte order (big-endian).
#[must_use]
pub fn write_network_u64(value: u64) -> [u8; 8] {
    #[expect(
        clippy::big_endian_bytes,
        reason = "Network byte order requires big-endian bytes."
    )]
    value.to_be_bytes()
}

/// Parse a network-order `u64` from its on-wire representation.
///
/// # Examples
///
/// ```
/// use wireproxy::byte_order::read_network_u64;
///
/// assert_eq!(read_network_u64([0, 0, 0, 0, 0, 0, 0, 1]), 1);
/// ```
#[must_use]
pub fn read_network_u64(bytes: [u8; 8]) -> u64 {
    #[expect(
        clippy::big_endian_bytes,
        reason = "Network byte order requires big-endian bytes."
    )]
    u64::from_be_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{ByteOrder, IntWidth};

    #[rstest]
    #[case::one_byte(&[0xfe], IntWidth::U8, ByteOrder::BigEndian, 0xfe)]
    #[case::two_be(&[0x00, 0x10], IntWidth::U16, ByteOrder::BigEndian, 0x10)]
    #[case::two_le(&[0x10, 0x00], IntWidth::U16, ByteOrder::LittleEndian, 0x10)]
    #[case::four_be(&[0x00, 0x00, 0x00, 0x02], IntWidth::U32, ByteOrder::BigEndian, 2)]
    #[case::four_le(&[0x02, 0x00, 0x00, 0x00], IntWidth::U32, ByteOrder::LittleEndian, 2)]
    #[case::eight_be(&[0, 0, 0, 0, 0, 0, 0x01, 0x00], IntWidth::U64, ByteOrder::BigEndian, 256)]
    #[case::eight_le(&[0x00, 0x01, 0, 0, 0, 0, 0, 0], IntWidth::U64, ByteOrder::LittleEndian, 256)]
    fn reads_every_supported_width(
        #[case] bytes: &[u8],
        #[case] width: IntWidth,
        #[case] order: ByteOrder,
        #[case] expected: u64,
    ) {
        assert_eq!(order.read_uint(width, bytes), Some(expected));
    }

    #[rstest]
    #[case(0)]
    #[case(3)]
    #[case(5)]
    #[case(16)]
    fn rejects_unsupported_widths(#[case] width: usize) {
        assert!(IntWidth::try_from(width).is_err());
    }

    #[test]
    fn short_input_reads_nothing() {
        assert_eq!(ByteOrder::BigEndian.read_uint(IntWidth::U64, &[1, 2, 3]), None);
    }

    #[test]
    fn oversized_value_is_not_written() {
        let mut out = Vec::new();
        assert!(ByteOrder::BigEndian.write_uint(70_000, IntWidth::U16, &mut out).is_none());
        assert!(out.is_empty());
    }

    #[test]
    fn network_flag_selects_big_endian() {
        assert_eq!(ByteOrder::from_network_flag(true), ByteOrder::BigEndian);
        assert_eq!(ByteOrder::from_network_flag(false), ByteOrder::LittleEndian);
    }
}
