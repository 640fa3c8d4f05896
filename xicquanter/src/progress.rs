use std::ops::{Add, AddAssign};

use xicquant::RecalculationSummary;

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ProgressRecord {
    pub files: usize,
    pub label_groups: usize,
    pub crosslinks: usize,
    pub recalculated: usize,
    pub recalculation_failures: usize,
    pub integrated: usize,
    pub integration_failures: usize,
    pub ratios: usize,
}

impl ProgressRecord {
    pub fn record_recalculation(&mut self, summary: &RecalculationSummary) {
        self.recalculated += summary.recalculated;
        self.recalculation_failures += summary.failed;
    }
}

impl Add for ProgressRecord {
    type Output = ProgressRecord;

    fn add(self, rhs: Self) -> Self::Output {
        let mut dup = self;
        dup += rhs;
        dup
    }
}

impl AddAssign for ProgressRecord {
    fn add_assign(&mut self, rhs: Self) {
        self.files += rhs.files;
        self.label_groups += rhs.label_groups;
        self.crosslinks += rhs.crosslinks;
        self.recalculated += rhs.recalculated;
        self.recalculation_failures += rhs.recalculation_failures;
        self.integrated += rhs.integrated;
        self.integration_failures += rhs.integration_failures;
        self.ratios += rhs.ratios;
    }
}
