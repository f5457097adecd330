use crate::mem::config::{MappingKind, MemoryConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coordinates {
    pub rank: u64,
    pub bank: u64,
    pub row: u64,
    pub block: u64,
}

/// Translates device-local addresses into rank/bank/row/block coordinates.
#[derive(Debug, Clone)]
pub struct MemoryMapping {
    kind: MappingKind,
    num_ranks: u64,
    banks_per_rank: u64,
    rows_per_bank: u64,
    blocks_per_row: u64,
    block_size: u64,
}

impl MemoryMapping {
    pub fn new(
        kind: MappingKind,
        num_ranks: u64,
        banks_per_rank: u64,
        rows_per_bank: u64,
        blocks_per_row: u64,
        block_size: u64,
    ) -> Self {
        assert!(block_size.is_power_of_two(), "block size must be a power of two");
        Self {
            kind,
            num_ranks,
            banks_per_rank,
            rows_per_bank,
            blocks_per_row,
            block_size,
        }
    }

    pub fn from_config(config: &MemoryConfig) -> Self {
        Self::new(
            config.mapping,
            config.num_ranks,
            config.banks_per_rank,
            config.rows_per_bank,
            config.blocks_per_row,
            config.block_size,
        )
    }

    pub fn total_size(&self) -> u64 {
        self.num_ranks * self.banks_per_rank * self.rows_per_bank * self.blocks_per_row * self.block_size
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    pub fn num_banks(&self) -> usize {
        (self.num_ranks * self.banks_per_rank) as usize
    }

    pub fn block_address(&self, addr: u64) -> u64 {
        addr & !(self.block_size - 1)
    }

    pub fn decompose(&self, addr: u64) -> Coordinates {
        assert!(
            addr < self.total_size(),
            "address {:#x} outside of mapped range [0, {:#x})",
            addr,
            self.total_size()
        );
        let mut rest = addr / self.block_size;
        let mut take = |n: u64| {
            let v = rest % n;
            rest /= n;
            v
        };
        match self.kind {
            MappingKind::RowRankBankCol => {
                let block = take(self.blocks_per_row);
                let bank = take(self.banks_per_rank);
                let rank = take(self.num_ranks);
                let row = take(self.rows_per_bank);
                Coordinates { rank, bank, row, block }
            }
            MappingKind::RankBankRowCol => {
                let block = take(self.blocks_per_row);
                let row = take(self.rows_per_bank);
                let bank = take(self.banks_per_rank);
                let rank = take(self.num_ranks);
                Coordinates { rank, bank, row, block }
            }
        }
    }

    /// Flat bank index across ranks.
    pub fn bank_index(&self, coords: &Coordinates) -> usize {
        (coords.rank * self.banks_per_rank + coords.bank) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(kind: MappingKind) -> MemoryMapping {
        // 2 ranks x 4 banks x 8 rows x 16 blocks of 64 bytes
        MemoryMapping::new(kind, 2, 4, 8, 16, 64)
    }

    #[test]
    fn total_size_is_product_of_geometry() {
        assert_eq!(2 * 4 * 8 * 16 * 64, mapping(MappingKind::RowRankBankCol).total_size());
    }

    #[test]
    fn row_interleaving_spreads_rows_over_banks() {
        let m = mapping(MappingKind::RowRankBankCol);
        let first = m.decompose(0);
        let same_row = m.decompose(15 * 64 + 3);
        let next_bank = m.decompose(16 * 64);
        assert_eq!(Coordinates { rank: 0, bank: 0, row: 0, block: 0 }, first);
        assert_eq!(Coordinates { rank: 0, bank: 0, row: 0, block: 15 }, same_row);
        assert_eq!(Coordinates { rank: 0, bank: 1, row: 0, block: 0 }, next_bank);
        let next_rank = m.decompose(4 * 16 * 64);
        assert_eq!(1, next_rank.rank);
        assert_eq!(4, m.bank_index(&next_rank));
    }

    #[test]
    fn bank_interleaving_fills_a_bank_first() {
        let m = mapping(MappingKind::RankBankRowCol);
        let c = m.decompose(16 * 64);
        assert_eq!(Coordinates { rank: 0, bank: 0, row: 1, block: 0 }, c);
        let c = m.decompose(8 * 16 * 64);
        assert_eq!(1, c.bank);
    }

    #[test]
    fn block_address_clears_offset_bits() {
        let m = mapping(MappingKind::RowRankBankCol);
        assert_eq!(0x40, m.block_address(0x7f));
    }

    #[test]
    #[should_panic(expected = "outside of mapped range")]
    fn out_of_range_address_aborts() {
        let m = mapping(MappingKind::RowRankBankCol);
        m.decompose(m.total_size());
    }
}
