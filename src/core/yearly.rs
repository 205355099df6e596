use rand::Rng;
use rayon::prelude::*;
use tracing::info;

use super::error::EngineResult;
use super::returns::{ReturnModel, resolve_seed, trial_rng};
use super::salary::{SalaryDataSource, estimate_salary_growth};
use super::stats::{column_means, mean};
use super::types::{ProjectionRequest, YearlyProjectionResult};

#[derive(Debug, Clone)]
struct YearlyTrial {
    real_balances: Vec<f64>,
    incomes: Vec<f64>,
    final_income: f64,
}

pub fn run_yearly_projection(
    request: &ProjectionRequest,
    salary: &dyn SalaryDataSource,
) -> EngineResult<YearlyProjectionResult> {
    request.validate()?;
    let salary_growth = estimate_salary_growth(
        salary,
        &request.profile.sector,
        request.profile.current_age,
        request.config.default_salary_growth,
    );
    run_yearly_projection_with_growth(request, salary_growth)
}

/// Year-stepped projection. The success rate and expected income always count
/// the deflated state pension on top of the safe withdrawal; the per-year
/// income series only shows it when retiring at or after state pension age.
pub fn run_yearly_projection_with_growth(
    request: &ProjectionRequest,
    salary_growth: f64,
) -> EngineResult<YearlyProjectionResult> {
    request.validate()?;
    let profile = &request.profile;
    let config = &request.config;
    let years = profile.horizon_years()?;
    let seed = resolve_seed(config.seed);
    let model = ReturnModel::new(&request.returns)?;

    let state_pension =
        config.state_pension_annual * (1.0 + config.state_pension_growth).powi(years as i32);
    let pension_payable = profile.retirement_age >= config.state_pension_age;

    info!(
        trials = config.trials,
        years,
        seed,
        pension_payable,
        "Starting yearly projection"
    );

    let trials: Vec<YearlyTrial> = (0..config.trials as u64)
        .into_par_iter()
        .map(|trial| {
            let mut rng = trial_rng(seed, trial);
            simulate_yearly_trial(
                request,
                &model,
                salary_growth,
                years,
                state_pension,
                pension_payable,
                &mut rng,
            )
        })
        .collect();

    let balance_paths: Vec<Vec<f64>> = trials.iter().map(|t| t.real_balances.clone()).collect();
    let income_paths: Vec<Vec<f64>> = trials.iter().map(|t| t.incomes.clone()).collect();
    let final_incomes: Vec<f64> = trials.iter().map(|t| t.final_income).collect();

    let target_annual = profile.target_monthly_income * 12.0;
    let successes = final_incomes.iter().filter(|&&v| v >= target_annual).count();
    let success_rate = successes as f64 / final_incomes.len() as f64;
    let required_total_fund = target_annual / config.safe_withdrawal_rate;
    let months = years as f64 * 12.0;

    Ok(YearlyProjectionResult {
        seed,
        salary_growth_rate: salary_growth,
        ages: (profile.current_age..=profile.retirement_age).collect(),
        mean_balances: column_means(&balance_paths),
        mean_incomes: column_means(&income_paths),
        projected_state_pension: state_pension,
        success_rate,
        expected_monthly_income: mean(&final_incomes) / 12.0,
        required_total_fund,
        required_monthly_saving: required_total_fund / months,
    })
}

fn simulate_yearly_trial<R: Rng + ?Sized>(
    request: &ProjectionRequest,
    model: &ReturnModel,
    salary_growth: f64,
    years: u32,
    state_pension: f64,
    pension_payable: bool,
    rng: &mut R,
) -> YearlyTrial {
    let profile = &request.profile;
    let config = &request.config;
    let swr = config.safe_withdrawal_rate;

    let mut income = profile.annual_income;
    let mut balance = profile.pension_balance;
    let mut deflator = 1.0;
    let mut real = balance;
    let mut real_balances = Vec::with_capacity(years as usize + 1);
    let mut incomes = Vec::with_capacity(years as usize + 1);
    real_balances.push(balance);
    incomes.push(0.0);

    for year in 1..=years {
        let roi = model.sample_portfolio_annual(&request.allocation, &mut *rng);
        income *= 1.0 + salary_growth;
        balance = (balance + profile.contribution_rate * income) * (1.0 + roi);
        deflator *= 1.0 + config.inflation_rate;

        real = balance / deflator;
        let mut drawable = real * swr;
        if pension_payable && year == years {
            drawable += state_pension / deflator;
        }
        real_balances.push(real);
        incomes.push(drawable);
    }

    YearlyTrial {
        final_income: real * swr + state_pension / deflator,
        real_balances,
        incomes,
    }
}
