use rand::Rng;
use rayon::prelude::*;
use tracing::{debug, info};

use super::error::EngineResult;
use super::returns::{ReturnModel, annual_to_monthly, resolve_seed, trial_rng};
use super::salary::{SalaryDataSource, estimate_salary_growth};
use super::solver::goal_gap;
use super::stats::{mean, percentile_bands, percentile_of_sorted};
use super::types::{
    AllocationWeights, PercentileSeries, ProjectionRequest, ProjectionResult, RetirementIncome,
    SimulationPath, TerminalSummary, UserProfile,
};

pub const MONTHS_PER_YEAR: usize = 12;

/// Runs the full monthly Monte Carlo projection for one request.
pub fn run_projection(
    request: &ProjectionRequest,
    salary: &dyn SalaryDataSource,
) -> EngineResult<ProjectionResult> {
    request.validate()?;
    let salary_growth = estimate_salary_growth(
        salary,
        &request.profile.sector,
        request.profile.current_age,
        request.config.default_salary_growth,
    );
    run_projection_with_growth(request, salary_growth)
}

/// Same as [`run_projection`] with the salary growth rate already resolved.
pub fn run_projection_with_growth(
    request: &ProjectionRequest,
    salary_growth: f64,
) -> EngineResult<ProjectionResult> {
    request.validate()?;
    let profile = &request.profile;
    let config = &request.config;
    let seed = resolve_seed(config.seed);
    let months = profile.horizon_months()?;

    info!(
        trials = config.trials,
        months,
        seed,
        salary_growth,
        "Starting pension projection"
    );

    let paths = simulate_trials(request, salary_growth, seed)?;
    let balances: Vec<Vec<f64>> = paths.into_iter().map(|path| path.balances).collect();

    let percentile_paths = percentile_bands(&balances, &config.percentiles)
        .into_iter()
        .zip(&config.percentiles)
        .map(|(values, &percentile)| PercentileSeries { percentile, values })
        .collect();

    let mut terminals: Vec<f64> = balances
        .iter()
        .map(|path| path.last().copied().unwrap_or(profile.pension_balance))
        .collect();
    terminals.sort_by(|a, b| a.total_cmp(b));
    let terminal = TerminalSummary {
        p5: percentile_of_sorted(&terminals, 5.0),
        p10: percentile_of_sorted(&terminals, 10.0),
        median: percentile_of_sorted(&terminals, 50.0),
        p90: percentile_of_sorted(&terminals, 90.0),
        p95: percentile_of_sorted(&terminals, 95.0),
        mean: mean(&terminals),
    };

    let swr = config.safe_withdrawal_rate;
    let retirement_income = RetirementIncome {
        p10_annual: terminal.p10 * swr,
        median_annual: terminal.median * swr,
        p90_annual: terminal.p90 * swr,
        median_monthly: terminal.median * swr / 12.0,
    };

    let cash_baseline = simulate_fixed_return_path(
        profile,
        config.cash_baseline_return,
        salary_growth,
        config.inflation_rate,
    )?;

    let goal = goal_gap(profile, config, terminal.median)?;

    info!(
        median = terminal.median,
        p10 = terminal.p10,
        p90 = terminal.p90,
        gap = goal.gap,
        "Pension projection finished"
    );

    Ok(ProjectionResult {
        months,
        seed,
        salary_growth_rate: salary_growth,
        percentile_paths,
        terminal,
        retirement_income,
        cash_baseline_terminal: cash_baseline.terminal(),
        cash_baseline_path: cash_baseline.balances,
        total_nominal_contributions: total_nominal_contributions(profile, salary_growth)?,
        goal,
    })
}

/// Runs every trial of the multi-asset simulator. Trials are seeded
/// independently from `seed`, so the result does not depend on scheduling.
pub fn simulate_trials(
    request: &ProjectionRequest,
    salary_growth: f64,
    seed: u64,
) -> EngineResult<Vec<SimulationPath>> {
    let model = ReturnModel::new(&request.returns)?;
    let profile = &request.profile;
    let allocation = &request.allocation;
    let inflation = request.config.inflation_rate;

    (0..request.config.trials as u64)
        .into_par_iter()
        .map(|trial| {
            let mut rng = trial_rng(seed, trial);
            simulate_path(profile, allocation, &model, salary_growth, inflation, &mut rng)
        })
        .collect()
}

/// One monthly-stepped trial: sampled return, contribution, growth, then
/// inflation deflation. Income grows once per simulated year.
pub fn simulate_path<R: Rng + ?Sized>(
    profile: &UserProfile,
    allocation: &AllocationWeights,
    model: &ReturnModel,
    salary_growth: f64,
    inflation_rate: f64,
    rng: &mut R,
) -> EngineResult<SimulationPath> {
    step_monthly(profile, salary_growth, inflation_rate, || {
        annual_to_monthly(model.sample_portfolio_annual(allocation, &mut *rng))
    })
}

/// Deterministic path at a fixed annual return, used for the cash-only baseline.
pub fn simulate_fixed_return_path(
    profile: &UserProfile,
    annual_return: f64,
    salary_growth: f64,
    inflation_rate: f64,
) -> EngineResult<SimulationPath> {
    let monthly_return = annual_to_monthly(annual_return);
    step_monthly(profile, salary_growth, inflation_rate, || monthly_return)
}

fn step_monthly(
    profile: &UserProfile,
    salary_growth: f64,
    inflation_rate: f64,
    mut next_monthly_return: impl FnMut() -> f64,
) -> EngineResult<SimulationPath> {
    let months = profile.horizon_months()?;
    let inflation_monthly = annual_to_monthly(inflation_rate);

    let mut balance = profile.pension_balance;
    let mut income = profile.annual_income;
    let mut deflator = 1.0;
    let mut balances = Vec::with_capacity(months);

    for month in 0..months {
        let monthly_return = next_monthly_return();
        if month > 0 && month % MONTHS_PER_YEAR == 0 {
            income *= 1.0 + salary_growth;
        }

        let contribution = income * profile.contribution_rate / MONTHS_PER_YEAR as f64;
        balance = (balance + contribution) * (1.0 + monthly_return);
        balance /= 1.0 + inflation_monthly;
        deflator *= 1.0 + inflation_monthly;
        balances.push(balance);
    }

    Ok(SimulationPath {
        nominal_terminal: balance * deflator,
        balances,
    })
}

/// Sum of all nominal contributions paid before retirement.
pub fn total_nominal_contributions(profile: &UserProfile, salary_growth: f64) -> EngineResult<f64> {
    let years = profile.horizon_years()?;
    let mut income = profile.annual_income;
    let mut total = 0.0;
    for _ in 0..years {
        total += income * profile.contribution_rate;
        income *= 1.0 + salary_growth;
    }
    debug!(years, total, "Computed nominal contributions");
    Ok(total)
}
