use crate::config::NUM_BLOCKS;
use crate::error::{FsError, Result};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

#[derive(Debug, PartialEq)]
pub enum State {
    Free,
    Used,
}

#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Clone, Copy)]
pub struct Bitmap {
    /// One bit per device block, set while the block is free. 1024 blocks pack
    /// into sixteen words, well inside the single block the bitmap is persisted to.
    bitmap: [u64; NUM_BLOCKS / 64],
}

impl Bitmap {
    /// Every block starts out free.
    pub fn new() -> Self {
        Self {
            bitmap: [!0; NUM_BLOCKS / 64],
        }
    }

    /// Reads the bitmap from the front of a persisted block. Returns `None` if
    /// the buffer is too short to hold it.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        Self::read_from_prefix(buf)
    }

    pub fn serialize(&self) -> &[u8] {
        self.as_bytes()
    }

    pub fn get(&self, blocknr: usize) -> State {
        assert!(blocknr < NUM_BLOCKS);
        // Grab of the u64 containing the significant bit.
        let word = self.bitmap[blocknr / 64];

        let inner_offset = blocknr % 64;
        match (word >> inner_offset) & 0b01 {
            1 => State::Free,
            _ => State::Used,
        }
    }

    /// Marks a block as used regardless of its current state. Format uses this
    /// to carve out the metadata regions.
    pub fn set_reserved(&mut self, blocknr: usize) -> Result<()> {
        let mask = Self::mask(blocknr)?;
        self.bitmap[blocknr / 64] &= !mask;
        Ok(())
    }

    /// Returns a block to the free pool.
    pub fn set_free(&mut self, blocknr: usize) -> Result<()> {
        let mask = Self::mask(blocknr)?;
        self.bitmap[blocknr / 64] |= mask;
        Ok(())
    }

    fn mask(blocknr: usize) -> Result<u64> {
        if blocknr >= NUM_BLOCKS {
            return Err(FsError::Corrupt(format!(
                "block {} is past the end of the device",
                blocknr
            )));
        }
        Ok(0b01_u64 << (blocknr % 64))
    }

    /// Takes the lowest-numbered free block, or `None` once the device is full.
    pub fn acquire(&mut self) -> Option<usize> {
        let blocknr = NextAvailableAllocation::new(self).next()?;
        self.set_reserved(blocknr).ok()?;
        Some(blocknr)
    }

    pub fn free_count(&self) -> usize {
        self.bitmap.iter().map(|word| word.count_ones() as usize).sum()
    }
}

impl Default for Bitmap {
    fn default() -> Self {
        Self::new()
    }
}

/// Implements a naive block allocation policy for new data block requirements. This policy will
/// retrieve the next available sequential block and on each call to the iterator will return the
/// next consecutive available blocks.
///
/// ## Other Pre-Allocation Policies
///
/// 1. Allocation that attempts to find enough contiguous available blocks so data can be allocated
///    close together (speed ups through sequential reads).
/// 2. Allocation that attempts to spread randomly over blocks to prevent wear of physical devices
///    in the front section (that may be rewritten many times before allocating to the back).
pub struct NextAvailableAllocation<'a> {
    /// Keeps track of the next starting place for looking for available blocks.
    marker: usize,
    /// A simple bitmap tracking which blocks are allocated and which are free.
    bitmap: &'a Bitmap,
}

impl<'a> NextAvailableAllocation<'a> {
    pub fn new(bitmap: &'a Bitmap) -> Self {
        Self { marker: 0, bitmap }
    }
}

impl Iterator for NextAvailableAllocation<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        while self.marker < NUM_BLOCKS {
            let i = self.marker;
            self.marker += 1;
            if let State::Free = self.bitmap.get(i) {
                return Some(i);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_read_and_write_values_to_bitmap() {
        let mut bmp = Bitmap::new();

        bmp.set_reserved(2).unwrap();

        assert_eq!(bmp.get(0), State::Free);
        assert_eq!(bmp.get(2), State::Used);
    }

    #[test]
    fn can_set_values_at_ends_of_bitmap() {
        let mut bmp = Bitmap::new();

        bmp.set_reserved(0).unwrap();
        bmp.set_reserved(NUM_BLOCKS - 1).unwrap();

        assert_eq!(bmp.get(0), State::Used);
        assert_eq!(bmp.get(NUM_BLOCKS - 1), State::Used);
        assert_eq!(bmp.free_count(), NUM_BLOCKS - 2);
    }

    #[test]
    fn can_toggle_block_between_free_and_used() {
        let mut bmp = Bitmap::new();

        bmp.set_reserved(10).unwrap();
        assert_eq!(bmp.get(10), State::Used);

        bmp.set_free(10).unwrap();
        assert_eq!(bmp.get(10), State::Free);
        // Neighbouring bits are untouched.
        assert_eq!(bmp.get(9), State::Free);
        assert_eq!(bmp.get(11), State::Free);
    }

    #[test]
    fn acquire_returns_lowest_free_block() {
        let mut bmp = Bitmap::new();
        bmp.set_reserved(0).unwrap();
        bmp.set_reserved(1).unwrap();
        bmp.set_reserved(3).unwrap();

        assert_eq!(bmp.acquire(), Some(2));
        assert_eq!(bmp.acquire(), Some(4));
        bmp.set_free(1).unwrap();
        assert_eq!(bmp.acquire(), Some(1));
    }

    #[test]
    fn acquire_reports_exhaustion() {
        let mut bmp = Bitmap::new();
        for i in 0..NUM_BLOCKS {
            bmp.set_reserved(i).unwrap();
        }
        assert_eq!(bmp.acquire(), None);
        assert_eq!(bmp.free_count(), 0);
    }

    #[test]
    fn allocation_iterator_skips_used_blocks() {
        let mut bmp = Bitmap::new();
        for i in 0..NUM_BLOCKS - 2 {
            bmp.set_reserved(i).unwrap();
        }
        let free: Vec<usize> = NextAvailableAllocation::new(&bmp).collect();
        assert_eq!(free, vec![NUM_BLOCKS - 2, NUM_BLOCKS - 1]);
    }

    #[test]
    fn can_serialize_and_deserialize_state() {
        let mut bmp = Bitmap::new();
        bmp.set_reserved(10).unwrap();
        bmp.set_reserved(11).unwrap();
        bmp.set_reserved(12).unwrap();

        let mut block = vec![0u8; 1024];
        block[..bmp.serialize().len()].copy_from_slice(bmp.serialize());
        let read_bmp = Bitmap::parse(&block).unwrap();
        assert_eq!(read_bmp.bitmap, bmp.bitmap);

        assert!(Bitmap::parse(&block[..4]).is_none());
    }

    #[test]
    fn out_of_range_blocks_are_refused() {
        let mut bmp = Bitmap::new();
        assert!(matches!(bmp.set_free(NUM_BLOCKS), Err(FsError::Corrupt(_))));
        assert!(matches!(
            bmp.set_reserved(NUM_BLOCKS + 4000),
            Err(FsError::Corrupt(_))
        ));
        assert_eq!(bmp.free_count(), NUM_BLOCKS);
    }
}
