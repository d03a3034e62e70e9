// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Running gridding statistics: the sum of weights and the summed
//! gradient-squared (chi-squared) statistic, reset at the start of a gradient
//! pass and incremented once per finalize.

/// Accumulated per-pass statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatisticsAccumulator {
    pub sumwt: f64,
    pub chisq: f64,
}

impl StatisticsAccumulator {
    pub fn reset(&mut self) {
        *self = StatisticsAccumulator::default();
    }

    pub fn add(&mut self, sumwt: f64, chisq: f64) {
        self.sumwt += sumwt;
        self.chisq += chisq;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulate_and_reset() {
        let mut stats = StatisticsAccumulator::default();
        stats.add(2.0, 0.5);
        stats.add(3.0, 1.5);
        assert_eq!(stats.sumwt, 5.0);
        assert_eq!(stats.chisq, 2.0);
        stats.reset();
        assert_eq!(stats, StatisticsAccumulator::default());
    }
}
