use crate::error::{ArgError, Result};

/// A region of the genome with a constant rate. The region is defined by its (inclusive) start
/// and (exclusive) end position.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RateRegion {
    pub start: usize,
    pub end: usize,
    pub value: f64,
}

impl RateRegion {
    pub fn new(start: usize, end: usize, value: f64) -> Self {
        Self { start, end, value }
    }

    /// Whether the region covers the given position
    pub fn contains(&self, pos: usize) -> bool {
        self.start <= pos && pos < self.end
    }
}

/// A position-keyed piecewise-constant track of rates (mutation or recombination).
/// Regions are kept sorted and never overlap, so lookups are a binary search.
/// Positions that are not covered by any region fall back to a caller-provided default.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RateMap {
    regions: Vec<RateRegion>,
}

impl RateMap {
    /// Create an empty rate map. Every lookup returns the default value.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a rate map from a list of regions. The regions must be sorted by position and must
    /// not overlap.
    pub fn from_regions(regions: impl IntoIterator<Item = RateRegion>) -> Result<Self> {
        let mut map = Self::new();
        for region in regions {
            map.push(region)?;
        }
        Ok(map)
    }

    /// Append a region to the end of the track.
    ///
    /// # Errors
    /// A configuration error is returned if the region is empty or starts before the end of the
    /// last region in the track.
    pub fn push(&mut self, region: RateRegion) -> Result<()> {
        if region.start >= region.end {
            return Err(ArgError::config(format!(
                "rate map region [{}, {}) is empty",
                region.start, region.end
            )));
        }

        if let Some(last) = self.regions.last() {
            if region.start < last.end {
                return Err(ArgError::config(format!(
                    "rate map region [{}, {}) overlaps or precedes region [{}, {})",
                    region.start, region.end, last.start, last.end
                )));
            }
        }

        self.regions.push(region);
        Ok(())
    }

    /// Index of the region covering `pos`, if any
    pub fn find_index(&self, pos: usize) -> Option<usize> {
        let idx = self.regions.partition_point(|region| region.end <= pos);
        self.regions
            .get(idx)
            .filter(|region| region.contains(pos))
            .map(|_| idx)
    }

    /// Look up the rate at `pos`, returning `default` for positions outside of all regions.
    pub fn find(&self, pos: usize, default: f64) -> f64 {
        self.find_index(pos)
            .map_or(default, |idx| self.regions[idx].value)
    }

    pub fn get(&self, index: usize) -> Option<&RateRegion> {
        self.regions.get(index)
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RateRegion> + ExactSizeIterator + '_ {
        self.regions.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_override_region() {
        let map = RateMap::from_regions([RateRegion::new(1000, 5000, 2e-8)]).unwrap();

        assert_eq!(map.find(0, 1e-8), 1e-8);
        assert_eq!(map.find(999, 1e-8), 1e-8);
        assert_eq!(map.find(1000, 1e-8), 2e-8);
        assert_eq!(map.find(4999, 1e-8), 2e-8);
        assert_eq!(map.find(5000, 1e-8), 1e-8);
    }

    #[test]
    fn adjacent_regions() {
        let map = RateMap::from_regions([
            RateRegion::new(0, 10, 1.0),
            RateRegion::new(10, 20, 2.0),
            RateRegion::new(30, 40, 3.0),
        ])
        .unwrap();

        assert_eq!(map.find_index(9), Some(0));
        assert_eq!(map.find_index(10), Some(1));
        assert_eq!(map.find_index(25), None);
        assert_eq!(map.find(35, 0.0), 3.0);
        assert_eq!(map.find(40, 0.0), 0.0);
    }

    #[test]
    fn reject_overlap() {
        let mut map = RateMap::new();
        map.push(RateRegion::new(0, 10, 1.0)).unwrap();
        assert!(map.push(RateRegion::new(5, 15, 1.0)).is_err());
        assert!(map.push(RateRegion::new(20, 20, 1.0)).is_err());
        assert_eq!(map.len(), 1);
    }
}
