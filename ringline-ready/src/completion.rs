/// Operation tags encoded in the upper 8 bits of user_data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpTag {
    /// Outbound connect.
    Connect = 0,
    /// Standing read-ahead.
    Read = 1,
    /// Write flush (one per handle in flight).
    Write = 2,
}

impl OpTag {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(OpTag::Connect),
            1 => Some(OpTag::Read),
            2 => Some(OpTag::Write),
            _ => None,
        }
    }
}

/// Encoded user_data identifying the handle an operation belongs to.
///
/// Layout (64-bit):
/// ```text
/// Bits 63..56: OpTag (8 bits)
/// Bits 55..32: Handle slot index (24 bits, max 16M handles)
/// Bits 31..0:  Handle generation (32 bits)
/// ```
///
/// Backends treat the value as opaque and echo it back in the matching
/// [`Completion`](crate::backend::Completion).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UserData(pub u64);

impl UserData {
    const TAG_SHIFT: u64 = 56;
    const INDEX_SHIFT: u64 = 32;
    const TAG_MASK: u64 = 0xFF << Self::TAG_SHIFT;
    const INDEX_MASK: u64 = 0x00FF_FFFF << Self::INDEX_SHIFT;
    const GENERATION_MASK: u64 = 0xFFFF_FFFF;

    /// Encode an operation tag, handle index, and generation into user_data.
    #[inline]
    pub fn encode(tag: OpTag, index: u32, generation: u32) -> Self {
        debug_assert!(index < (1 << 24), "handle index exceeds 24 bits");
        let v = ((tag as u64) << Self::TAG_SHIFT)
            | (((index as u64) & 0x00FF_FFFF) << Self::INDEX_SHIFT)
            | (generation as u64);
        UserData(v)
    }

    /// Decode the operation tag.
    #[inline]
    pub fn tag(self) -> Option<OpTag> {
        let raw = ((self.0 & Self::TAG_MASK) >> Self::TAG_SHIFT) as u8;
        OpTag::from_u8(raw)
    }

    /// Decode the handle slot index.
    #[inline]
    pub fn index(self) -> u32 {
        ((self.0 & Self::INDEX_MASK) >> Self::INDEX_SHIFT) as u32
    }

    /// Decode the handle generation.
    #[inline]
    pub fn generation(self) -> u32 {
        (self.0 & Self::GENERATION_MASK) as u32
    }

    /// Get the raw u64 value.
    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_each_tag() {
        for tag in [OpTag::Connect, OpTag::Read, OpTag::Write] {
            let ud = UserData::encode(tag, 0x00AB_CDEF, 0xDEAD_BEEF);
            assert_eq!(ud.tag(), Some(tag));
            assert_eq!(ud.index(), 0x00AB_CDEF);
            assert_eq!(ud.generation(), 0xDEAD_BEEF);
        }
    }

    #[test]
    fn max_index() {
        let max = (1u32 << 24) - 1;
        let ud = UserData::encode(OpTag::Write, max, u32::MAX);
        assert_eq!(ud.index(), max);
        assert_eq!(ud.generation(), u32::MAX);
    }

    #[test]
    fn invalid_tag() {
        let ud = UserData(0xFF << 56);
        assert_eq!(ud.tag(), None);
    }
}
