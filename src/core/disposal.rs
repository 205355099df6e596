use tracing::debug;

use super::error::{EngineError, EngineResult};
use super::returns::annual_to_monthly;
use super::types::{
    AllocationWeights, AssetAssumptions, AssetClass, AssetReturnTable, DeemedDisposalResult,
    DisposalBundle, ProjectionConfig, UserProfile,
};

/// Running totals for a single-asset holding subject to deemed disposal.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DeemedDisposalState {
    pub balance: f64,
    pub total_contributions: f64,
    pub total_fees: f64,
    pub total_taxes: f64,
    pub unrealized_gain: f64,
}

impl DeemedDisposalState {
    pub fn new(opening_balance: f64) -> Self {
        Self {
            balance: opening_balance,
            ..Self::default()
        }
    }

    /// One month of growth. Gain and fee are both taken on the opening balance;
    /// the fee is netted off before the gain reaches the taxable accumulator.
    pub fn accrue(&mut self, monthly_return: f64, monthly_fee: f64, contribution: f64) {
        let gain = self.balance * monthly_return;
        let fee = self.balance * monthly_fee;
        self.balance += gain + contribution - fee;
        self.total_contributions += contribution;
        self.total_fees += fee;
        self.unrealized_gain += gain - fee;
    }

    /// Taxes the accumulated gain at `tax_rate` and resets the accumulator.
    pub fn dispose(&mut self, tax_rate: f64) -> f64 {
        let tax = self.unrealized_gain * tax_rate;
        self.balance -= tax;
        self.total_taxes += tax;
        self.unrealized_gain = 0.0;
        tax
    }

    pub fn gains_before_tax(&self) -> f64 {
        self.balance - self.total_contributions + self.total_taxes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisposalPhase {
    /// Gains accrue; `months` counts months since the last event.
    Accumulating { months: u32 },
    /// The holding period just completed and the accumulator is taxable.
    EventDue,
}

impl DisposalPhase {
    pub fn start() -> Self {
        DisposalPhase::Accumulating { months: 0 }
    }

    pub fn after_month(self, interval_months: u32) -> Self {
        let months = match self {
            DisposalPhase::Accumulating { months } => months + 1,
            DisposalPhase::EventDue => 1,
        };
        if months >= interval_months {
            DisposalPhase::EventDue
        } else {
            DisposalPhase::Accumulating { months }
        }
    }
}

/// Runs the single-asset holding for `years` at the class's fixed assumed
/// return, applying a deemed-disposal charge every `interval_months`.
pub fn simulate_deemed_disposal(
    class: AssetClass,
    assumptions: &AssetAssumptions,
    monthly_contribution: f64,
    years: u32,
    opening_balance: f64,
    interval_months: u32,
) -> EngineResult<DeemedDisposalResult> {
    if years == 0 {
        return Err(EngineError::invalid("years", "must be > 0"));
    }
    if interval_months == 0 {
        return Err(EngineError::invalid("interval_months", "must be > 0"));
    }

    let months = years * 12;
    let monthly_return = annual_to_monthly(assumptions.mean_annual_return);
    let monthly_fee = annual_to_monthly(assumptions.annual_fee_rate);
    let tax_rate = assumptions.capital_gains_tax_rate;

    let mut state = DeemedDisposalState::new(opening_balance);
    let mut phase = DisposalPhase::start();
    let mut history = Vec::with_capacity(months as usize);
    let mut disposal_months = Vec::new();

    for month in 1..=months {
        state.accrue(monthly_return, monthly_fee, monthly_contribution);
        phase = phase.after_month(interval_months);
        if phase == DisposalPhase::EventDue && tax_rate > 0.0 {
            let tax = state.dispose(tax_rate);
            disposal_months.push(month);
            debug!(asset_class = %class, month, tax, "Deemed disposal event");
        }
        history.push(state.balance);
    }

    Ok(DeemedDisposalResult {
        asset_class: class,
        tax_rate,
        history,
        disposal_months,
        final_balance: state.balance,
        total_contributions: state.total_contributions,
        total_fees: state.total_fees,
        total_taxes: state.total_taxes,
        gains_before_tax: state.gains_before_tax(),
    })
}

/// Looks the asset class up by name; unknown names are a configuration error.
pub fn simulate_deemed_disposal_for(
    asset: &str,
    table: &AssetReturnTable,
    monthly_contribution: f64,
    years: u32,
    opening_balance: f64,
    interval_months: u32,
) -> EngineResult<DeemedDisposalResult> {
    let class: AssetClass = asset.parse()?;
    simulate_deemed_disposal(
        class,
        table.get(class),
        monthly_contribution,
        years,
        opening_balance,
        interval_months,
    )
}

/// Splits the user's contributions and pot across the three classes by weight
/// and runs each class independently.
pub fn simulate_allocation_disposal(
    profile: &UserProfile,
    allocation: &AllocationWeights,
    table: &AssetReturnTable,
    config: &ProjectionConfig,
) -> EngineResult<DisposalBundle> {
    profile.validate()?;
    allocation.validate()?;
    let years = profile.horizon_years()?;
    let monthly_contribution = profile.annual_income * profile.contribution_rate / 12.0;

    let run = |class: AssetClass| {
        let weight = allocation.weight(class);
        simulate_deemed_disposal(
            class,
            table.get(class),
            monthly_contribution * weight,
            years,
            profile.pension_balance * weight,
            config.disposal_interval_months,
        )
    };

    Ok(DisposalBundle {
        equities: run(AssetClass::Equities)?,
        bonds: run(AssetClass::Bonds)?,
        cash: run(AssetClass::Cash)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{prop_assert, prop_assert_eq, proptest};

    const INTERVAL: u32 = 96;

    fn assert_approx(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual}, tolerance {tol}"
        );
    }

    fn table() -> AssetReturnTable {
        AssetReturnTable::default()
    }

    #[test]
    fn phase_reaches_event_every_interval() {
        let mut phase = DisposalPhase::start();
        let mut events = Vec::new();
        for month in 1..=20 {
            phase = phase.after_month(8);
            if phase == DisposalPhase::EventDue {
                events.push(month);
            }
        }
        assert_eq!(events, vec![8, 16]);
    }

    #[test]
    fn taxes_are_charged_exactly_at_disposal_boundaries() {
        let result = simulate_deemed_disposal_for("equities", &table(), 500.0, 20, 10_000.0, INTERVAL)
            .expect("valid class");

        assert_eq!(result.history.len(), 240);
        assert_eq!(result.disposal_months, vec![96, 192]);
        assert!(result.total_taxes > 0.0);

        // The balance only drops at the event months.
        for (idx, pair) in result.history.windows(2).enumerate() {
            let month = idx as u32 + 2;
            if result.disposal_months.contains(&month) {
                continue;
            }
            assert!(pair[1] > pair[0], "balance fell at month {month}");
        }
    }

    #[test]
    fn single_period_tax_matches_hand_calculation() {
        let assumptions = AssetAssumptions {
            mean_annual_return: 0.10,
            annual_stdev: 0.0,
            annual_fee_rate: 0.0,
            capital_gains_tax_rate: 0.41,
        };
        let result = simulate_deemed_disposal(
            AssetClass::Equities,
            &assumptions,
            0.0,
            8,
            1_000.0,
            INTERVAL,
        )
        .expect("valid run");

        let grown = 1_000.0 * 1.10_f64.powi(8);
        let tax = (grown - 1_000.0) * 0.41;
        assert_approx(result.total_taxes, tax, 1e-6);
        assert_approx(result.final_balance, grown - tax, 1e-6);
        assert_approx(result.total_fees, 0.0, 1e-12);
        // The opening balance is not subtracted, only contributions.
        assert_approx(result.gains_before_tax, grown, 1e-6);
        assert_approx(
            result.gains_before_tax,
            result.final_balance - result.total_contributions + result.total_taxes,
            1e-9,
        );
    }

    #[test]
    fn fees_are_netted_before_reaching_the_taxable_gain() {
        let assumptions = AssetAssumptions {
            mean_annual_return: 0.03,
            annual_stdev: 0.0,
            annual_fee_rate: 0.03,
            capital_gains_tax_rate: 0.41,
        };
        let result = simulate_deemed_disposal(
            AssetClass::Bonds,
            &assumptions,
            100.0,
            10,
            5_000.0,
            INTERVAL,
        )
        .expect("valid run");

        assert_eq!(result.disposal_months, vec![96]);
        assert_approx(result.total_taxes, 0.0, 1e-9);
        assert_approx(result.final_balance, 5_000.0 + 100.0 * 120.0, 1e-6);
        assert!(result.total_fees > 0.0);
    }

    #[test]
    fn gains_before_tax_adds_back_taxes() {
        let result =
            simulate_deemed_disposal_for("bonds", &table(), 250.0, 17, 2_000.0, INTERVAL)
                .expect("valid class");
        assert_approx(
            result.gains_before_tax,
            result.final_balance - result.total_contributions + result.total_taxes,
            1e-9,
        );
        assert_approx(result.total_contributions, 250.0 * 17.0 * 12.0, 1e-6);
    }

    #[test]
    fn unknown_asset_class_is_rejected() {
        let err = simulate_deemed_disposal_for("crypto", &table(), 100.0, 10, 0.0, INTERVAL)
            .expect_err("must reject");
        assert_eq!(err, EngineError::UnknownAssetClass("crypto".to_string()));
    }

    #[test]
    fn zero_years_is_rejected() {
        let err = simulate_deemed_disposal_for("cash", &table(), 100.0, 0, 0.0, INTERVAL)
            .expect_err("must reject");
        assert!(matches!(err, EngineError::InvalidParameter { name: "years", .. }));
    }

    #[test]
    fn allocation_bundle_splits_contributions_by_weight() {
        let profile = UserProfile {
            current_age: 45,
            retirement_age: 65,
            annual_income: 60_000.0,
            pension_balance: 10_000.0,
            contribution_rate: 0.15,
            target_monthly_income: 2_000.0,
            sector: "All sectors".to_string(),
        };
        let allocation = AllocationWeights::new(0.5, 0.4, 0.1);
        let bundle = simulate_allocation_disposal(
            &profile,
            &allocation,
            &table(),
            &ProjectionConfig::default(),
        )
        .expect("valid bundle");

        let monthly = 60_000.0 * 0.15 / 12.0;
        assert_approx(bundle.equities.total_contributions, monthly * 0.5 * 240.0, 1e-6);
        assert_approx(bundle.bonds.total_contributions, monthly * 0.4 * 240.0, 1e-6);
        assert_approx(bundle.cash.total_contributions, monthly * 0.1 * 240.0, 1e-6);
        assert_eq!(bundle.equities.disposal_months, vec![96, 192]);
        assert_eq!(bundle.cash.total_taxes, 0.0);
        assert_eq!(bundle.cash.total_fees, 0.0);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(48))]

        #[test]
        fn prop_cash_never_pays_tax(
            years in 1u32..60,
            contribution in 0u32..5_000,
            opening in 0u32..500_000
        ) {
            let result = simulate_deemed_disposal_for(
                "cash", &table(), contribution as f64, years, opening as f64, INTERVAL,
            ).expect("valid class");
            prop_assert_eq!(result.total_taxes, 0.0);
            prop_assert!(result.disposal_months.is_empty());
        }

        #[test]
        fn prop_no_tax_before_first_disposal(
            years in 1u32..8,
            contribution in 0u32..5_000,
            opening in 0u32..500_000,
            equities in proptest::bool::ANY
        ) {
            let asset = if equities { "equities" } else { "bonds" };
            let result = simulate_deemed_disposal_for(
                asset, &table(), contribution as f64, years, opening as f64, INTERVAL,
            ).expect("valid class");
            prop_assert_eq!(result.total_taxes, 0.0);
        }

        #[test]
        fn prop_events_land_on_multiples_of_interval(years in 8u32..50, opening in 1u32..500_000) {
            let result = simulate_deemed_disposal_for(
                "equities", &table(), 0.0, years, opening as f64, INTERVAL,
            ).expect("valid class");
            let expected: Vec<u32> = (1..=years * 12 / INTERVAL).map(|k| k * INTERVAL).collect();
            prop_assert_eq!(&result.disposal_months, &expected);
            prop_assert!(result.total_taxes > 0.0);
        }
    }
}
