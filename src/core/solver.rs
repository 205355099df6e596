use serde::Serialize;
use tracing::debug;

use super::engine::simulate_trials;
use super::error::{EngineError, EngineResult};
use super::returns::annual_to_monthly;
use super::stats::percentile;
use super::types::{GoalGap, ProjectionConfig, ProjectionRequest, UserProfile};

/// Compares the median terminal balance with the fund needed to draw the
/// target income through retirement.
pub fn goal_gap(
    profile: &UserProfile,
    config: &ProjectionConfig,
    median_terminal: f64,
) -> EngineResult<GoalGap> {
    let months = profile.horizon_months()?;
    let retirement_years = (config.life_expectancy + config.buffer_years)
        .saturating_sub(profile.retirement_age)
        .max(1);
    let target_fund = profile.target_monthly_income * 12.0 * retirement_years as f64;
    let gap = target_fund - median_terminal;

    let gap_percentage = if target_fund > 0.0 {
        gap.abs() / target_fund * 100.0
    } else {
        0.0
    };

    let (shortfall, surplus, required_monthly_contribution) = if gap > 0.0 {
        let required = required_monthly_contribution(
            profile.pension_balance,
            target_fund,
            months,
            config.goal_growth_rate,
        );
        (Some(gap), None, Some(required))
    } else {
        (None, Some(-gap), None)
    };

    Ok(GoalGap {
        retirement_years,
        target_fund,
        median_terminal,
        gap,
        shortfall,
        surplus,
        gap_percentage,
        required_monthly_contribution,
    })
}

/// Level monthly payment that, together with the grown current balance,
/// reaches `target_fund` after `months` at `annual_rate`. Never negative.
pub fn required_monthly_contribution(
    current_balance: f64,
    target_fund: f64,
    months: usize,
    annual_rate: f64,
) -> f64 {
    if months == 0 {
        return (target_fund - current_balance).max(0.0);
    }
    let r = annual_to_monthly(annual_rate);
    let n = months as f64;
    let growth = (1.0 + r).powf(n);
    let remaining = target_fund - current_balance * growth;
    let payment = if r.abs() < 1e-12 {
        remaining / n
    } else {
        remaining * r / (growth - 1.0)
    };
    payment.max(0.0)
}

#[derive(Debug, Clone, Copy)]
pub struct RateSolveConfig {
    pub search_min: f64,
    pub search_max: f64,
    pub tolerance: f64,
    pub max_iterations: u32,
    pub simulations_per_iteration: u32,
    /// Shared by every candidate so the objective only moves with the rate.
    pub seed: u64,
}

impl Default for RateSolveConfig {
    fn default() -> Self {
        Self {
            search_min: 0.0,
            search_max: 1.0,
            tolerance: 1e-4,
            max_iterations: 40,
            simulations_per_iteration: 500,
            seed: 0x5EED,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateSolveIteration {
    pub iteration: u32,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub candidate_rate: f64,
    pub median_terminal: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateSolveResult {
    pub target_fund: f64,
    pub search_min: f64,
    pub search_max: f64,
    pub tolerance: f64,
    pub solved_rate: Option<f64>,
    pub achieved_median: Option<f64>,
    pub iterations: Vec<RateSolveIteration>,
    pub converged: bool,
    pub feasible: bool,
    pub message: String,
}

/// Smallest contribution rate whose median terminal balance reaches the
/// target fund, found by bisection.
pub fn solve_contribution_rate(
    request: &ProjectionRequest,
    salary_growth: f64,
    config: RateSolveConfig,
) -> EngineResult<RateSolveResult> {
    request.validate()?;
    validate_config(config)?;

    let target_fund = goal_gap(&request.profile, &request.config, 0.0)?.target_fund;
    let meets = |median: f64| median + 1e-9 >= target_fund;

    let low = median_for_rate(request, salary_growth, config, config.search_min)?;
    let high = median_for_rate(request, salary_growth, config, config.search_max)?;

    let mut iterations = Vec::with_capacity(config.max_iterations as usize);
    let mut solved_rate = None;
    let mut converged = false;
    let feasible;
    let message;

    if meets(low) {
        solved_rate = Some(config.search_min);
        converged = true;
        feasible = true;
        message = "Already meets target at lower rate bound.".to_string();
    } else if !meets(high) {
        feasible = false;
        message = "No feasible contribution rate found within the search bounds.".to_string();
    } else {
        let mut lo = config.search_min;
        let mut hi = config.search_max;
        let mut it = 0;
        while it < config.max_iterations {
            it += 1;
            let mid = (lo + hi) * 0.5;
            let median = median_for_rate(request, salary_growth, config, mid)?;
            iterations.push(RateSolveIteration {
                iteration: it,
                lower_bound: lo,
                upper_bound: hi,
                candidate_rate: mid,
                median_terminal: median,
            });

            if meets(median) {
                hi = mid;
            } else {
                lo = mid;
            }

            if (hi - lo).abs() <= config.tolerance {
                converged = true;
                break;
            }
        }
        solved_rate = Some(hi);
        feasible = true;
        message = if converged {
            "Solved required contribution rate.".to_string()
        } else {
            "Reached max iterations before tolerance was met; returning best estimate.".to_string()
        };
    }

    let achieved_median = match solved_rate {
        Some(rate) => Some(median_for_rate(request, salary_growth, config, rate)?),
        None => None,
    };

    debug!(
        target_fund,
        ?solved_rate,
        iterations = iterations.len(),
        converged,
        feasible,
        "Contribution rate solve finished"
    );

    Ok(RateSolveResult {
        target_fund,
        search_min: config.search_min,
        search_max: config.search_max,
        tolerance: config.tolerance,
        solved_rate,
        achieved_median,
        iterations,
        converged,
        feasible,
        message,
    })
}

fn median_for_rate(
    base: &ProjectionRequest,
    salary_growth: f64,
    config: RateSolveConfig,
    rate: f64,
) -> EngineResult<f64> {
    let mut request = base.clone();
    request.profile.contribution_rate = rate;
    request.config.trials = config.simulations_per_iteration;

    let mut terminals: Vec<f64> = simulate_trials(&request, salary_growth, config.seed)?
        .iter()
        .map(|path| path.terminal())
        .collect();
    Ok(percentile(&mut terminals, 50.0))
}

fn validate_config(config: RateSolveConfig) -> EngineResult<()> {
    if !config.search_min.is_finite() || !config.search_max.is_finite() {
        return Err(EngineError::invalid("search bounds", "must be finite"));
    }
    if config.search_min < 0.0 || config.search_max > 1.0 {
        return Err(EngineError::invalid("search bounds", "must lie within 0..=1"));
    }
    if config.search_max <= config.search_min {
        return Err(EngineError::invalid(
            "search_max",
            "must be greater than search_min",
        ));
    }
    if !config.tolerance.is_finite() || config.tolerance <= 0.0 {
        return Err(EngineError::invalid("tolerance", "must be > 0"));
    }
    if config.max_iterations == 0 {
        return Err(EngineError::invalid("max_iterations", "must be > 0"));
    }
    if config.simulations_per_iteration == 0 {
        return Err(EngineError::invalid(
            "simulations_per_iteration",
            "must be > 0",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::engine::simulate_fixed_return_path;
    use crate::core::types::{AllocationWeights, AssetReturnTable};
    use proptest::prelude::{prop_assert, proptest};

    fn assert_close(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual}, tolerance {tol}"
        );
    }

    fn profile() -> UserProfile {
        UserProfile {
            current_age: 40,
            retirement_age: 65,
            annual_income: 50_000.0,
            pension_balance: 20_000.0,
            contribution_rate: 0.10,
            target_monthly_income: 2_500.0,
            sector: "All sectors".to_string(),
        }
    }

    fn deterministic_request() -> ProjectionRequest {
        ProjectionRequest {
            profile: profile(),
            allocation: AllocationWeights::new(0.5, 0.4, 0.1),
            returns: AssetReturnTable::default().without_volatility(),
            config: ProjectionConfig {
                trials: 1,
                seed: Some(1),
                ..ProjectionConfig::default()
            },
        }
    }

    #[test]
    fn shortfall_reports_annuity_payment() {
        let config = ProjectionConfig::default();
        let gap = goal_gap(&profile(), &config, 300_000.0).expect("valid");

        assert_eq!(gap.retirement_years, 22);
        assert_close(gap.target_fund, 2_500.0 * 12.0 * 22.0, 1e-9);
        assert_close(gap.gap, 660_000.0 - 300_000.0, 1e-9);
        assert_close(gap.shortfall.expect("shortfall"), 360_000.0, 1e-9);
        assert!(gap.surplus.is_none());
        assert_close(gap.gap_percentage, 360_000.0 / 660_000.0 * 100.0, 1e-9);

        let r = 1.04_f64.powf(1.0 / 12.0) - 1.0;
        let n = 300.0;
        let fv_existing = 20_000.0 * (1.0 + r).powf(n);
        let expected = (660_000.0 - fv_existing) * r / ((1.0 + r).powf(n) - 1.0);
        assert_close(
            gap.required_monthly_contribution.expect("payment"),
            expected,
            1e-6,
        );
    }

    #[test]
    fn surplus_has_no_required_contribution() {
        let gap = goal_gap(&profile(), &ProjectionConfig::default(), 800_000.0).expect("valid");
        assert!(gap.shortfall.is_none());
        assert_close(gap.surplus.expect("surplus"), 140_000.0, 1e-9);
        assert!(gap.required_monthly_contribution.is_none());
        assert!(gap.gap_percentage > 0.0);
    }

    #[test]
    fn late_retirement_keeps_one_year_of_income() {
        let mut late = profile();
        late.current_age = 80;
        late.retirement_age = 90;
        let gap = goal_gap(&late, &ProjectionConfig::default(), 0.0).expect("valid");
        assert_eq!(gap.retirement_years, 1);
        assert_close(gap.target_fund, 30_000.0, 1e-9);
    }

    #[test]
    fn zero_growth_uses_arithmetic_limit() {
        let payment = required_monthly_contribution(1_000.0, 13_000.0, 120, 0.0);
        assert_close(payment, 100.0, 1e-9);
    }

    #[test]
    fn large_existing_balance_clamps_requirement_to_zero() {
        let gap = goal_gap(
            &UserProfile {
                pension_balance: 2_000_000.0,
                ..profile()
            },
            &ProjectionConfig::default(),
            0.0,
        )
        .expect("valid");
        assert_eq!(gap.required_monthly_contribution, Some(0.0));
    }

    #[test]
    fn solver_matches_linear_zero_volatility_solution() {
        let request = deterministic_request();
        let weighted = 0.5 * 0.10 + 0.4 * 0.05 + 0.1 * 0.02;

        // With fixed returns the terminal balance is affine in the rate.
        let at = |rate: f64| {
            let mut p = request.profile.clone();
            p.contribution_rate = rate;
            simulate_fixed_return_path(&p, weighted, 0.0, 0.02)
                .expect("valid")
                .terminal()
        };
        let base = at(0.0);
        let slope = at(1.0) - base;
        let target = 660_000.0;
        let expected = (target - base) / slope;

        let config = RateSolveConfig {
            simulations_per_iteration: 1,
            tolerance: 1e-6,
            ..RateSolveConfig::default()
        };
        let result = solve_contribution_rate(&request, 0.0, config).expect("must solve");
        assert!(result.feasible);
        assert!(result.converged);
        assert_close(result.target_fund, target, 1e-9);
        assert_close(result.solved_rate.expect("rate"), expected, 1e-5);
        assert!(result.achieved_median.expect("median") + 1e-6 >= target);
    }

    #[test]
    fn solver_reports_infeasible_when_bounds_too_low() {
        let request = deterministic_request();
        let config = RateSolveConfig {
            search_max: 0.01,
            simulations_per_iteration: 1,
            ..RateSolveConfig::default()
        };
        let result = solve_contribution_rate(&request, 0.0, config).expect("must return");
        assert!(!result.feasible);
        assert!(result.solved_rate.is_none());
        assert!(result.iterations.is_empty());
    }

    #[test]
    fn solver_short_circuits_when_lower_bound_already_meets_target() {
        let mut request = deterministic_request();
        request.profile.pension_balance = 5_000_000.0;
        let config = RateSolveConfig {
            simulations_per_iteration: 1,
            ..RateSolveConfig::default()
        };
        let result = solve_contribution_rate(&request, 0.0, config).expect("must solve");
        assert_eq!(result.solved_rate, Some(0.0));
        assert!(result.converged);
    }

    #[test]
    fn solver_rejects_inverted_bounds() {
        let config = RateSolveConfig {
            search_min: 0.5,
            search_max: 0.2,
            ..RateSolveConfig::default()
        };
        let err = solve_contribution_rate(&deterministic_request(), 0.0, config)
            .expect_err("must reject");
        assert!(matches!(err, EngineError::InvalidParameter { name: "search_max", .. }));
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(32))]

        #[test]
        fn prop_required_contribution_closes_the_gap(
            balance in 0u32..200_000,
            target in 1u32..2_000_000,
            months in 1usize..600,
            rate_bps in 0u32..800
        ) {
            let annual = rate_bps as f64 / 10_000.0;
            let payment = required_monthly_contribution(balance as f64, target as f64, months, annual);
            prop_assert!(payment >= 0.0);

            let r = annual_to_monthly(annual);
            let mut fund = balance as f64;
            for _ in 0..months {
                fund = fund * (1.0 + r) + payment;
            }
            // End-of-month payments accumulate to at least the target.
            prop_assert!(fund + 1e-4 * (target as f64).max(1.0) >= target as f64);
        }
    }
}
