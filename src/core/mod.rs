mod disposal;
mod engine;
mod error;
mod returns;
mod salary;
mod solver;
mod stats;
mod types;
mod yearly;

pub use disposal::{
    DeemedDisposalState, DisposalPhase, simulate_allocation_disposal, simulate_deemed_disposal,
    simulate_deemed_disposal_for,
};
pub use engine::{
    MONTHS_PER_YEAR, run_projection, run_projection_with_growth, simulate_fixed_return_path,
    simulate_path, simulate_trials, total_nominal_contributions,
};
pub use error::{EngineError, EngineResult};
pub use returns::{ReturnModel, annual_to_monthly, annual_to_period, derive_seed, trial_rng};
pub use salary::{
    AgeBracket, SalaryDataSource, SalaryObservation, SalaryTable, estimate_salary_growth,
};
pub use solver::{
    RateSolveConfig, RateSolveIteration, RateSolveResult, goal_gap, required_monthly_contribution,
    solve_contribution_rate,
};
pub use stats::{column_means, mean, percentile, percentile_bands, percentile_of_sorted};
pub use types::{
    ALLOCATION_TOLERANCE, AllocationPreset, AllocationWeights, AssetAssumptions, AssetClass,
    AssetReturnTable, DeemedDisposalResult, DisposalBundle, GoalGap, PercentileSeries,
    ProjectionConfig, ProjectionRequest, ProjectionResult, RetirementIncome, SimulationPath,
    TerminalSummary, UserProfile, YearlyProjectionResult,
};
pub use yearly::{run_yearly_projection, run_yearly_projection_with_growth};
