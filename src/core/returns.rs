use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use super::error::{EngineError, EngineResult};
use super::types::{AllocationWeights, AssetClass, AssetReturnTable};

/// Independent normal annual-return samplers, one per asset class.
#[derive(Debug, Clone)]
pub struct ReturnModel {
    equities: Normal<f64>,
    bonds: Normal<f64>,
    cash: Normal<f64>,
}

impl ReturnModel {
    pub fn new(table: &AssetReturnTable) -> EngineResult<Self> {
        Ok(Self {
            equities: class_distribution(table, AssetClass::Equities)?,
            bonds: class_distribution(table, AssetClass::Bonds)?,
            cash: class_distribution(table, AssetClass::Cash)?,
        })
    }

    pub fn sample_annual<R: Rng + ?Sized>(&self, class: AssetClass, rng: &mut R) -> f64 {
        match class {
            AssetClass::Equities => self.equities.sample(rng),
            AssetClass::Bonds => self.bonds.sample(rng),
            AssetClass::Cash => self.cash.sample(rng),
        }
    }

    /// Each class is drawn on its own, then weighted and summed.
    pub fn sample_portfolio_annual<R: Rng + ?Sized>(
        &self,
        weights: &AllocationWeights,
        rng: &mut R,
    ) -> f64 {
        AssetClass::ALL
            .iter()
            .map(|&class| self.sample_annual(class, &mut *rng) * weights.weight(class))
            .sum()
    }
}

fn class_distribution(table: &AssetReturnTable, class: AssetClass) -> EngineResult<Normal<f64>> {
    let assumptions = table.get(class);
    if !assumptions.mean_annual_return.is_finite() {
        return Err(EngineError::InvalidReturnModel {
            class: class.to_string(),
            reason: "mean return must be finite".to_string(),
        });
    }
    if !assumptions.annual_stdev.is_finite() || assumptions.annual_stdev < 0.0 {
        return Err(EngineError::InvalidReturnModel {
            class: class.to_string(),
            reason: format!("stdev must be finite and >= 0, got {}", assumptions.annual_stdev),
        });
    }
    Normal::new(assumptions.mean_annual_return, assumptions.annual_stdev).map_err(|e| {
        EngineError::InvalidReturnModel {
            class: class.to_string(),
            reason: e.to_string(),
        }
    })
}

/// Compound conversion of an annual rate to an equivalent per-period rate.
pub fn annual_to_period(annual: f64, periods_per_year: u32) -> f64 {
    (1.0 + annual).powf(1.0 / periods_per_year as f64) - 1.0
}

pub fn annual_to_monthly(annual: f64) -> f64 {
    annual_to_period(annual, 12)
}

pub fn derive_seed(base_seed: u64, trial: u64) -> u64 {
    splitmix64(base_seed ^ trial.rotate_left(32))
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

pub fn trial_rng(base_seed: u64, trial: u64) -> StdRng {
    StdRng::seed_from_u64(derive_seed(base_seed, trial))
}

/// Seed used when the caller does not pin one: every call draws fresh entropy.
pub fn resolve_seed(seed: Option<u64>) -> u64 {
    seed.unwrap_or_else(rand::random::<u64>)
}
