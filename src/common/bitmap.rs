//! Small bitmap helpers shared by storage and the operator runtime.

use roaring::RoaringBitmap;

/// Complement of `bitmap` against the row-id universe `[0, row_count)`.
pub fn complement(bitmap: &RoaringBitmap, row_count: u32) -> RoaringBitmap {
    let mut universe = RoaringBitmap::new();
    universe.insert_range(0..row_count);
    universe -= bitmap;
    universe
}

/// Bitmap covering exactly `[0, row_count)`.
pub fn full(row_count: u32) -> RoaringBitmap {
    let mut universe = RoaringBitmap::new();
    universe.insert_range(0..row_count);
    universe
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complement_round_trip() {
        let bitmap: RoaringBitmap = [1u32, 3, 4].into_iter().collect();
        let complemented = complement(&bitmap, 6);
        assert_eq!(complemented.iter().collect::<Vec<_>>(), vec![0, 2, 5]);
        assert_eq!(complement(&complemented, 6), bitmap);
        assert_eq!(&bitmap | &complemented, full(6));
    }

    #[test]
    fn complement_of_empty_universe() {
        assert!(complement(&RoaringBitmap::new(), 0).is_empty());
    }
}
