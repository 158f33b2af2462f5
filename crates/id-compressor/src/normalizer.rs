use std::collections::BTreeMap;

/// The generation counts a session handed out as local ids, kept as a
/// minimal set of disjoint `(first gen count, length)` ranges.
///
/// Adjacent and overlapping insertions are merged, so two normalizers
/// holding the same gen counts compare equal no matter how they were built.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionSpaceNormalizer {
    // first gen count -> length
    ranges: BTreeMap<u64, u64>,
}

impl SessionSpaceNormalizer {
    /// Creates an empty normalizer.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ranges: BTreeMap::new(),
        }
    }

    /// Returns `true` if no gen counts are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Returns the number of disjoint ranges tracked.
    #[must_use]
    pub fn range_count(&self) -> usize {
        self.ranges.len()
    }

    /// Adds `count` gen counts starting at `first_gen_count`.
    ///
    /// Ranges of length zero are ignored.
    pub fn add_local_range(&mut self, first_gen_count: u64, count: u64) {
        if count == 0 {
            return;
        }
        let mut start = first_gen_count;
        let mut end = first_gen_count + count;

        // Absorb a predecessor that overlaps or touches the new range.
        if let Some((&prev_start, &prev_len)) = self.ranges.range(..=start).next_back() {
            let prev_end = prev_start + prev_len;
            if prev_end >= start {
                start = prev_start;
                end = end.max(prev_end);
                self.ranges.remove(&prev_start);
            }
        }

        // Absorb every successor that starts inside or right after it.
        while let Some((&next_start, &next_len)) = self.ranges.range(start..=end).next() {
            end = end.max(next_start + next_len);
            self.ranges.remove(&next_start);
        }

        self.ranges.insert(start, end - start);
    }

    /// Returns `true` if `gen_count` was added as a local id.
    #[must_use]
    pub fn contains(&self, gen_count: u64) -> bool {
        self.ranges
            .range(..=gen_count)
            .next_back()
            .is_some_and(|(&start, &len)| gen_count < start + len)
    }

    /// Returns the tracked ranges clipped to the inclusive window
    /// `[first_gen_count, last_gen_count]`, in ascending order.
    #[must_use]
    pub fn ranges_between(&self, first_gen_count: u64, last_gen_count: u64) -> Vec<(u64, u64)> {
        if last_gen_count < first_gen_count {
            return Vec::new();
        }
        let window_end = last_gen_count + 1;
        let lower = self
            .ranges
            .range(..=first_gen_count)
            .next_back()
            .map_or(first_gen_count, |(&start, _)| start);
        self.ranges
            .range(lower..window_end)
            .filter_map(|(&start, &len)| {
                let clipped_start = start.max(first_gen_count);
                let clipped_end = (start + len).min(window_end);
                (clipped_start < clipped_end).then_some((clipped_start, clipped_end - clipped_start))
            })
            .collect()
    }

    /// Iterates over every tracked range in ascending order.
    pub fn ranges(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.ranges.iter().map(|(&start, &len)| (start, len))
    }
}

impl FromIterator<(u64, u64)> for SessionSpaceNormalizer {
    fn from_iter<I: IntoIterator<Item = (u64, u64)>>(iter: I) -> Self {
        let mut normalizer = Self::new();
        for (first_gen_count, count) in iter {
            normalizer.add_local_range(first_gen_count, count);
        }
        normalizer
    }
}
