/*! Averagine isotopic models used to fill in theoretical isotope m/z and abundance */
use std::collections::hash_map::{self, HashMap};

use chemical_elements::isotopic_pattern::{
    BafflingRecursiveIsotopicPatternGenerator, TheoreticalIsotopicPattern,
};
use chemical_elements::{ChemicalComposition, ElementSpecification, PROTON as _PROTON};
use tracing::trace;

/// The mass of H+, a hydrogen atom minus an electron
pub const PROTON: f64 = _PROTON;

/// The mass difference between isotopes `C[13]` and `C[12]`
pub const NEUTRON_SHIFT: f64 = 1.0033548378;

/// The m/z difference between isotopic peaks at a given charge state
#[inline]
pub fn isotopic_shift(charge: i32) -> f64 {
    NEUTRON_SHIFT / charge.abs().max(1) as f64
}

/// Convert a neutral mass to an m/z at `charge` using `charge_carrier`
#[inline]
pub fn mass_charge_ratio(neutral_mass: f64, charge: i32, charge_carrier: f64) -> f64 {
    let z = charge as f64;
    (neutral_mass + z * charge_carrier) / z.abs()
}

/// A fractional elemental composition with non-ordinal element counts used to represent
/// "averaged" chemical compositions.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FractionalComposition<'a>(HashMap<ElementSpecification<'a>, f64>);

impl<'a> FromIterator<(ElementSpecification<'a>, f64)> for FractionalComposition<'a> {
    fn from_iter<T: IntoIterator<Item = (ElementSpecification<'a>, f64)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> FractionalComposition<'a> {
    pub fn iter(&self) -> hash_map::Iter<'_, ElementSpecification<'a>, f64> {
        self.0.iter()
    }

    pub fn mass(&self) -> f64 {
        self.iter()
            .map(|(e, c)| e.element.most_abundant_mass * *c)
            .sum()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The theoretical m/z and relative abundance of the first few isotopes of an ion,
/// with abundances normalized to sum to 1.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TheoreticalEnvelope {
    pub mz: Vec<f64>,
    pub abundance: Vec<f64>,
}

impl TheoreticalEnvelope {
    pub fn len(&self) -> usize {
        self.mz.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mz.is_empty()
    }

    pub fn get(&self, isotope: usize) -> Option<(f64, f64)> {
        Some((*self.mz.get(isotope)?, *self.abundance.get(isotope)?))
    }
}

/// An averagine model: an "average monomer" composition scaled linearly to the
/// mass of interest.
#[derive(Debug, Clone)]
pub struct IsotopicModel<'lifespan> {
    pub base_composition: FractionalComposition<'lifespan>,
    pub base_mass: f64,
    hydrogen: Option<ElementSpecification<'lifespan>>,
    generator: BafflingRecursiveIsotopicPatternGenerator<'lifespan>,
}

impl<'lifespan: 'transient, 'transient> IsotopicModel<'lifespan> {
    pub fn new(base_composition: FractionalComposition<'lifespan>) -> Self {
        Self {
            base_mass: base_composition.mass(),
            base_composition,
            hydrogen: ElementSpecification::parse("H").ok(),
            generator: BafflingRecursiveIsotopicPatternGenerator::new(),
        }
    }

    /// Build an integral composition of approximately `neutral_mass`, correcting the
    /// rounding error with hydrogens
    pub fn scale(&self, neutral_mass: f64) -> ChemicalComposition<'transient> {
        let scale = neutral_mass / self.base_mass;
        let mut scaled = ChemicalComposition::new();
        for (elt, count) in self.base_composition.iter() {
            scaled.set(*elt, (*count * scale).round() as i32);
        }
        if let Some(hydrogen) = self.hydrogen.as_ref() {
            let delta = (scaled.mass() - neutral_mass).round() as i32;
            let hydrogens = scaled[hydrogen];
            if hydrogens > delta {
                scaled[hydrogen] -= delta;
            } else {
                scaled[hydrogen] = 0;
            }
        }
        scaled
    }

    /// The first `count` isotopes of an ion of `neutral_mass` at `charge`, anchored on the
    /// exact monoisotopic m/z. Isotopes beyond what the generator produces are
    /// extrapolated with zero abundance.
    pub fn isotopic_envelope(
        &mut self,
        neutral_mass: f64,
        charge: i32,
        count: usize,
    ) -> TheoreticalEnvelope {
        let monoisotopic_mz = mass_charge_ratio(neutral_mass, charge, PROTON);
        if !neutral_mass.is_finite() || neutral_mass <= 0.0 || charge == 0 || count == 0 {
            return TheoreticalEnvelope::default();
        }
        let composition = self.scale(neutral_mass);
        let peaks = self
            .generator
            .isotopic_variants(composition, 0, charge, PROTON);
        let tid = TheoreticalIsotopicPattern::from(peaks);
        let diff = monoisotopic_mz - tid.origin;

        let mut mz = Vec::with_capacity(count);
        let mut abundance = Vec::with_capacity(count);
        for p in tid.peaks.iter().take(count) {
            mz.push(p.mz + diff);
            abundance.push(p.intensity as f64);
        }
        let shift = isotopic_shift(charge);
        while mz.len() < count {
            mz.push(monoisotopic_mz + mz.len() as f64 * shift);
            abundance.push(0.0);
        }
        let total: f64 = abundance.iter().sum();
        if total > 0.0 {
            abundance.iter_mut().for_each(|a| *a /= total);
        }
        trace!("Generated {count} isotopes for {neutral_mass:0.4} at charge {charge}");
        TheoreticalEnvelope { mz, abundance }
    }
}

impl<T: IntoIterator<Item = (&'static str, f64)>> From<T> for IsotopicModel<'_> {
    fn from(iter: T) -> Self {
        IsotopicModel::new(
            iter.into_iter()
                .filter_map(|(e, c)| e.parse().ok().map(|e| (e, c)))
                .collect(),
        )
    }
}

/// Pre-defined averagine compositions
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum IsotopicModels {
    #[default]
    Peptide,
    Glycopeptide,
}

impl From<IsotopicModels> for IsotopicModel<'_> {
    fn from(source: IsotopicModels) -> IsotopicModel<'static> {
        match source {
            IsotopicModels::Peptide => vec![
                ("H", 7.7583f64),
                ("C", 4.9384),
                ("S", 0.0417),
                ("O", 1.4773),
                ("N", 1.3577),
            ],
            IsotopicModels::Glycopeptide => vec![
                ("H", 15.75),
                ("C", 10.93),
                ("S", 0.02054),
                ("O", 6.4773),
                ("N", 1.6577),
            ],
        }
        .into()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_composition() {
        let model: IsotopicModel = IsotopicModels::Peptide.into();
        assert_eq!(model.base_composition.len(), 5);
        assert!(model.base_mass > 110.5 && model.base_mass < 111.5);
    }

    #[test]
    fn test_envelope() {
        let mut model: IsotopicModel = IsotopicModels::Peptide.into();
        let env = model.isotopic_envelope(1998.0, 2, 3);
        assert_eq!(env.len(), 3);
        let mono = mass_charge_ratio(1998.0, 2, PROTON);
        assert!((env.mz[0] - mono).abs() < 1e-6);
        assert!((env.mz[1] - env.mz[0] - isotopic_shift(2)).abs() < 1e-2);
        assert!((env.abundance.iter().sum::<f64>() - 1.0).abs() < 1e-6);
        assert!(env.abundance.iter().all(|a| *a > 0.0));

        assert!(model.isotopic_envelope(f64::NAN, 2, 3).is_empty());
    }
}
