bitflags::bitflags! {
    /// The id of a region in a [`CompactHeightfield`](crate::CompactHeightfield).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    #[repr(transparent)]
    pub struct RegionId: u16 {
        /// No region assigned. Spans outside any region, i.e. not walkable.
        const NONE = 0;
        /// Heightfield border flag.
        /// If a region id has this bit set, then the region is a border
        /// region and its spans are considered un-walkable.
        /// (Used during the region and contour build process.)
        const BORDER = 0x8000;
        /// The maximum representable region id including flag bits.
        const MAX = u16::MAX;
    }
}

impl RegionId {
    /// The region id with all flag bits stripped.
    #[inline]
    pub fn without_flags(self) -> Self {
        self & !Self::BORDER
    }
}

impl Default for RegionId {
    fn default() -> Self {
        Self::NONE
    }
}

impl From<u16> for RegionId {
    fn from(value: u16) -> Self {
        RegionId::from_bits_retain(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn border_flag_strips() {
        let region = RegionId::from(7) | RegionId::BORDER;
        assert!(region.contains(RegionId::BORDER));
        assert_eq!(region.without_flags(), RegionId::from(7));
    }
}
