use axum::{
    Router,
    extract::{Json, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::core::{
    AllocationPreset, AllocationWeights, AssetAssumptions, AssetReturnTable, ProjectionConfig,
    ProjectionRequest, RateSolveConfig, SalaryDataSource, SalaryTable, UserProfile,
    estimate_salary_growth, run_projection_with_growth, run_yearly_projection_with_growth,
    simulate_allocation_disposal, solve_contribution_rate,
};

const MAX_TRIALS: u32 = 100_000;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum CliPreset {
    Conservative,
    Balanced,
    Aggressive,
}

impl From<CliPreset> for AllocationPreset {
    fn from(value: CliPreset) -> Self {
        match value {
            CliPreset::Conservative => AllocationPreset::Conservative,
            CliPreset::Balanced => AllocationPreset::Balanced,
            CliPreset::Aggressive => AllocationPreset::Aggressive,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum CliMode {
    /// Monthly Monte Carlo projection with goal tracking
    Monthly,
    /// Year-stepped projection including the state pension
    Yearly,
    /// Deemed-disposal comparison per asset class
    DeemedDisposal,
    /// Smallest contribution rate that reaches the target fund
    SolveRate,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiPreset {
    #[serde(alias = "Conservative")]
    Conservative,
    #[serde(alias = "Balanced")]
    Balanced,
    #[serde(alias = "Aggressive")]
    Aggressive,
}

impl From<ApiPreset> for CliPreset {
    fn from(value: ApiPreset) -> Self {
        match value {
            ApiPreset::Conservative => CliPreset::Conservative,
            ApiPreset::Balanced => CliPreset::Balanced,
            ApiPreset::Aggressive => CliPreset::Aggressive,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ProjectionPayload {
    current_age: Option<u32>,
    retirement_age: Option<u32>,
    annual_income: Option<f64>,
    pension_balance: Option<f64>,
    contribution_rate: Option<f64>,
    target_monthly_income: Option<f64>,
    sector: Option<String>,

    preset: Option<ApiPreset>,
    equity_allocation: Option<f64>,
    bond_allocation: Option<f64>,
    cash_allocation: Option<f64>,
    normalize_allocation: Option<bool>,

    equity_return: Option<f64>,
    equity_volatility: Option<f64>,
    bond_return: Option<f64>,
    bond_volatility: Option<f64>,
    cash_return: Option<f64>,
    cash_volatility: Option<f64>,

    inflation_rate: Option<f64>,
    salary_growth: Option<f64>,
    trials: Option<u32>,
    seed: Option<u64>,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "pensionsim",
    about = "Monte Carlo pension projection (multi-asset growth, goal tracking, deemed disposal)"
)]
pub struct Cli {
    #[arg(long)]
    current_age: u32,
    #[arg(long)]
    retirement_age: u32,
    #[arg(long, help = "Gross annual income")]
    annual_income: f64,
    #[arg(long, default_value_t = 0.0)]
    pension_balance: f64,
    #[arg(
        long,
        default_value_t = 15.0,
        help = "Share of salary contributed in percent"
    )]
    contribution_rate: f64,
    #[arg(long, default_value_t = 2_000.0)]
    target_monthly_income: f64,
    #[arg(long, default_value = "All sectors")]
    sector: String,

    #[arg(
        long,
        value_enum,
        help = "Named allocation; overrides the individual allocation flags"
    )]
    preset: Option<CliPreset>,
    #[arg(long, default_value_t = 50.0, help = "Equity weight in percent")]
    equity_allocation: f64,
    #[arg(long, default_value_t = 40.0, help = "Bond weight in percent")]
    bond_allocation: f64,
    #[arg(long, default_value_t = 10.0, help = "Cash weight in percent")]
    cash_allocation: f64,
    #[arg(
        long,
        default_value_t = false,
        help = "Rescale allocation weights that do not sum to 100"
    )]
    normalize_allocation: bool,

    #[arg(long, default_value_t = 10.0, help = "Expected annual equity return in percent")]
    equity_return: f64,
    #[arg(long, default_value_t = 15.0, help = "Equity annual volatility in percent")]
    equity_volatility: f64,
    #[arg(long, default_value_t = 5.0)]
    bond_return: f64,
    #[arg(long, default_value_t = 5.0)]
    bond_volatility: f64,
    #[arg(long, default_value_t = 2.0)]
    cash_return: f64,
    #[arg(long, default_value_t = 1.0)]
    cash_volatility: f64,

    #[arg(long, default_value_t = 2.0, help = "Annual inflation in percent")]
    inflation_rate: f64,
    #[arg(
        long,
        help = "Annual salary growth in percent; estimated from the salary dataset when omitted"
    )]
    salary_growth: Option<f64>,
    #[arg(long, help = "JSON salary dataset used for growth estimation")]
    salary_data: Option<PathBuf>,
    #[arg(long, default_value_t = 1_000)]
    trials: u32,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long, value_enum, default_value_t = CliMode::Monthly)]
    mode: CliMode,
}

#[derive(Debug)]
struct ApiRequest {
    request: ProjectionRequest,
    salary_growth: Option<f64>,
}

impl ApiRequest {
    fn resolved_salary_growth(&self, salary: &dyn SalaryDataSource) -> f64 {
        self.salary_growth.unwrap_or_else(|| {
            estimate_salary_growth(
                salary,
                &self.request.profile.sector,
                self.request.profile.current_age,
                self.request.config.default_salary_growth,
            )
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PresetResponse {
    name: AllocationPreset,
    equity: f64,
    bonds: f64,
    cash: f64,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Clone)]
struct AppState {
    salary: Arc<SalaryTable>,
}

fn build_request(cli: &Cli) -> Result<ApiRequest, String> {
    if cli.retirement_age <= cli.current_age {
        return Err("--retirement-age must be > --current-age".to_string());
    }

    if cli.trials == 0 {
        return Err("--trials must be > 0".to_string());
    }

    if cli.trials > MAX_TRIALS {
        return Err(format!("--trials must be <= {MAX_TRIALS}"));
    }

    if !(0.0..=100.0).contains(&cli.contribution_rate) {
        return Err("--contribution-rate must be between 0 and 100".to_string());
    }

    for (flag, value) in [
        ("--annual-income", cli.annual_income),
        ("--pension-balance", cli.pension_balance),
        ("--target-monthly-income", cli.target_monthly_income),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err(format!("{flag} must be >= 0"));
        }
    }

    for (flag, value) in [
        ("--equity-volatility", cli.equity_volatility),
        ("--bond-volatility", cli.bond_volatility),
        ("--cash-volatility", cli.cash_volatility),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err(format!("{flag} must be >= 0"));
        }
    }

    for (flag, value) in [
        ("--equity-return", cli.equity_return),
        ("--bond-return", cli.bond_return),
        ("--cash-return", cli.cash_return),
        ("--inflation-rate", cli.inflation_rate),
    ] {
        if !value.is_finite() || value <= -100.0 {
            return Err(format!("{flag} must be > -100"));
        }
    }

    if let Some(growth) = cli.salary_growth {
        if !growth.is_finite() || growth <= -100.0 {
            return Err("--salary-growth must be > -100".to_string());
        }
    }

    let allocation = build_allocation(cli)?;

    let returns = AssetReturnTable {
        equities: AssetAssumptions {
            mean_annual_return: cli.equity_return / 100.0,
            annual_stdev: cli.equity_volatility / 100.0,
            ..AssetReturnTable::default().equities
        },
        bonds: AssetAssumptions {
            mean_annual_return: cli.bond_return / 100.0,
            annual_stdev: cli.bond_volatility / 100.0,
            ..AssetReturnTable::default().bonds
        },
        cash: AssetAssumptions {
            mean_annual_return: cli.cash_return / 100.0,
            annual_stdev: cli.cash_volatility / 100.0,
            ..AssetReturnTable::default().cash
        },
    };

    let request = ProjectionRequest {
        profile: UserProfile {
            current_age: cli.current_age,
            retirement_age: cli.retirement_age,
            annual_income: cli.annual_income,
            pension_balance: cli.pension_balance,
            contribution_rate: cli.contribution_rate / 100.0,
            target_monthly_income: cli.target_monthly_income,
            sector: cli.sector.clone(),
        },
        allocation,
        returns,
        config: ProjectionConfig {
            inflation_rate: cli.inflation_rate / 100.0,
            trials: cli.trials,
            seed: cli.seed,
            ..ProjectionConfig::default()
        },
    };
    request.validate().map_err(|e| e.to_string())?;

    Ok(ApiRequest {
        request,
        salary_growth: cli.salary_growth.map(|g| g / 100.0),
    })
}

fn build_allocation(cli: &Cli) -> Result<AllocationWeights, String> {
    if let Some(preset) = cli.preset {
        return Ok(AllocationPreset::from(preset).weights());
    }

    for (flag, value) in [
        ("--equity-allocation", cli.equity_allocation),
        ("--bond-allocation", cli.bond_allocation),
        ("--cash-allocation", cli.cash_allocation),
    ] {
        if !value.is_finite() || !(0.0..=100.0).contains(&value) {
            return Err(format!("{flag} must be between 0 and 100"));
        }
    }

    let weights = AllocationWeights::from_percentages(
        cli.equity_allocation,
        cli.bond_allocation,
        cli.cash_allocation,
    );
    if cli.normalize_allocation {
        return weights.normalized().map_err(|e| e.to_string());
    }
    weights.validate().map_err(|_| {
        format!(
            "--equity-allocation, --bond-allocation and --cash-allocation must sum to 100 (got {}); pass --normalize-allocation to rescale",
            weights.sum() * 100.0
        )
    })?;
    Ok(weights)
}

/// Runs the selected projection for a command-line invocation and returns the
/// pretty-printed JSON result.
pub fn run_cli(cli: &Cli) -> Result<String, String> {
    let salary = match &cli.salary_data {
        Some(path) => SalaryTable::from_path(path)?,
        None => SalaryTable::default(),
    };
    let api = build_request(cli)?;
    let growth = api.resolved_salary_growth(&salary);
    let request = &api.request;

    let json = match cli.mode {
        CliMode::Monthly => serde_json::to_string_pretty(
            &run_projection_with_growth(request, growth).map_err(|e| e.to_string())?,
        ),
        CliMode::Yearly => serde_json::to_string_pretty(
            &run_yearly_projection_with_growth(request, growth).map_err(|e| e.to_string())?,
        ),
        CliMode::DeemedDisposal => serde_json::to_string_pretty(
            &simulate_allocation_disposal(
                &request.profile,
                &request.allocation,
                &request.returns,
                &request.config,
            )
            .map_err(|e| e.to_string())?,
        ),
        CliMode::SolveRate => serde_json::to_string_pretty(
            &solve_contribution_rate(request, growth, solve_config(request))
                .map_err(|e| e.to_string())?,
        ),
    };
    json.map_err(|e| format!("Failed to serialize result: {e}"))
}

fn solve_config(request: &ProjectionRequest) -> RateSolveConfig {
    let defaults = RateSolveConfig::default();
    RateSolveConfig {
        simulations_per_iteration: request.config.trials.min(defaults.simulations_per_iteration),
        seed: request.config.seed.unwrap_or(defaults.seed),
        ..defaults
    }
}

pub async fn run_http_server(port: u16, salary: SalaryTable) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    if salary.is_empty() {
        warn!("No salary dataset loaded; salary growth falls back to the default rate");
    }
    let state = AppState {
        salary: Arc::new(salary),
    };
    let app = Router::new()
        .route(
            "/api/projection",
            get(projection_get_handler).post(projection_post_handler),
        )
        .route(
            "/api/yearly-projection",
            get(yearly_get_handler).post(yearly_post_handler),
        )
        .route(
            "/api/deemed-disposal",
            get(disposal_get_handler).post(disposal_post_handler),
        )
        .route(
            "/api/solve-contribution",
            get(solve_get_handler).post(solve_post_handler),
        )
        .route("/api/presets", get(presets_handler))
        .route("/api/sectors", get(sectors_handler))
        .fallback(not_found_handler)
        .with_state(state);

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Pension projection HTTP API listening");

    axum::serve(listener, app).await
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn projection_get_handler(
    State(state): State<AppState>,
    Query(payload): Query<ProjectionPayload>,
) -> Response {
    projection_handler_impl(&state, payload)
}

async fn projection_post_handler(
    State(state): State<AppState>,
    Json(payload): Json<ProjectionPayload>,
) -> Response {
    projection_handler_impl(&state, payload)
}

async fn yearly_get_handler(
    State(state): State<AppState>,
    Query(payload): Query<ProjectionPayload>,
) -> Response {
    yearly_handler_impl(&state, payload)
}

async fn yearly_post_handler(
    State(state): State<AppState>,
    Json(payload): Json<ProjectionPayload>,
) -> Response {
    yearly_handler_impl(&state, payload)
}

async fn disposal_get_handler(Query(payload): Query<ProjectionPayload>) -> Response {
    disposal_handler_impl(payload)
}

async fn disposal_post_handler(Json(payload): Json<ProjectionPayload>) -> Response {
    disposal_handler_impl(payload)
}

async fn solve_get_handler(
    State(state): State<AppState>,
    Query(payload): Query<ProjectionPayload>,
) -> Response {
    solve_handler_impl(&state, payload)
}

async fn solve_post_handler(
    State(state): State<AppState>,
    Json(payload): Json<ProjectionPayload>,
) -> Response {
    solve_handler_impl(&state, payload)
}

async fn presets_handler() -> Response {
    json_response(StatusCode::OK, preset_list())
}

async fn sectors_handler(State(state): State<AppState>) -> Response {
    json_response(StatusCode::OK, state.salary.sectors())
}

fn projection_handler_impl(state: &AppState, payload: ProjectionPayload) -> Response {
    let api = match api_request_from_payload(payload) {
        Ok(api) => api,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };
    let growth = api.resolved_salary_growth(state.salary.as_ref());
    match run_projection_with_growth(&api.request, growth) {
        Ok(result) => json_response(StatusCode::OK, result),
        Err(e) => error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    }
}

fn yearly_handler_impl(state: &AppState, payload: ProjectionPayload) -> Response {
    let api = match api_request_from_payload(payload) {
        Ok(api) => api,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };
    let growth = api.resolved_salary_growth(state.salary.as_ref());
    match run_yearly_projection_with_growth(&api.request, growth) {
        Ok(result) => json_response(StatusCode::OK, result),
        Err(e) => error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    }
}

fn disposal_handler_impl(payload: ProjectionPayload) -> Response {
    let api = match api_request_from_payload(payload) {
        Ok(api) => api,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };
    let request = &api.request;
    match simulate_allocation_disposal(
        &request.profile,
        &request.allocation,
        &request.returns,
        &request.config,
    ) {
        Ok(bundle) => json_response(StatusCode::OK, bundle),
        Err(e) => error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    }
}

fn solve_handler_impl(state: &AppState, payload: ProjectionPayload) -> Response {
    let api = match api_request_from_payload(payload) {
        Ok(api) => api,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };
    let growth = api.resolved_salary_growth(state.salary.as_ref());
    match solve_contribution_rate(&api.request, growth, solve_config(&api.request)) {
        Ok(result) => json_response(StatusCode::OK, result),
        Err(e) => error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    }
}

fn preset_list() -> Vec<PresetResponse> {
    AllocationPreset::ALL
        .iter()
        .map(|&preset| {
            let weights = preset.weights();
            PresetResponse {
                name: preset,
                equity: weights.equity,
                bonds: weights.bonds,
                cash: weights.cash,
            }
        })
        .collect()
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
fn api_request_from_json(json: &str) -> Result<ApiRequest, String> {
    let payload = serde_json::from_str::<ProjectionPayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    api_request_from_payload(payload)
}

fn api_request_from_payload(payload: ProjectionPayload) -> Result<ApiRequest, String> {
    let mut cli = default_cli_for_api();

    if let Some(v) = payload.current_age {
        cli.current_age = v;
    }
    if let Some(v) = payload.retirement_age {
        cli.retirement_age = v;
    }
    if let Some(v) = payload.annual_income {
        cli.annual_income = v;
    }
    if let Some(v) = payload.pension_balance {
        cli.pension_balance = v;
    }
    if let Some(v) = payload.contribution_rate {
        cli.contribution_rate = v;
    }
    if let Some(v) = payload.target_monthly_income {
        cli.target_monthly_income = v;
    }
    if let Some(v) = payload.sector {
        cli.sector = v;
    }

    if let Some(v) = payload.preset {
        cli.preset = Some(v.into());
    }
    if let Some(v) = payload.equity_allocation {
        cli.equity_allocation = v;
    }
    if let Some(v) = payload.bond_allocation {
        cli.bond_allocation = v;
    }
    if let Some(v) = payload.cash_allocation {
        cli.cash_allocation = v;
    }
    if let Some(v) = payload.normalize_allocation {
        cli.normalize_allocation = v;
    }

    if let Some(v) = payload.equity_return {
        cli.equity_return = v;
    }
    if let Some(v) = payload.equity_volatility {
        cli.equity_volatility = v;
    }
    if let Some(v) = payload.bond_return {
        cli.bond_return = v;
    }
    if let Some(v) = payload.bond_volatility {
        cli.bond_volatility = v;
    }
    if let Some(v) = payload.cash_return {
        cli.cash_return = v;
    }
    if let Some(v) = payload.cash_volatility {
        cli.cash_volatility = v;
    }

    if let Some(v) = payload.inflation_rate {
        cli.inflation_rate = v;
    }
    if payload.salary_growth.is_some() {
        cli.salary_growth = payload.salary_growth;
    }
    if let Some(v) = payload.trials {
        cli.trials = v;
    }
    if payload.seed.is_some() {
        cli.seed = payload.seed;
    }

    build_request(&cli)
}

fn default_cli_for_api() -> Cli {
    Cli {
        current_age: 30,
        retirement_age: 65,
        annual_income: 60_000.0,
        pension_balance: 0.0,
        contribution_rate: 15.0,
        target_monthly_income: 2_000.0,
        sector: "All sectors".to_string(),
        preset: None,
        equity_allocation: 50.0,
        bond_allocation: 40.0,
        cash_allocation: 10.0,
        normalize_allocation: false,
        equity_return: 10.0,
        equity_volatility: 15.0,
        bond_return: 5.0,
        bond_volatility: 5.0,
        cash_return: 2.0,
        cash_volatility: 1.0,
        inflation_rate: 2.0,
        salary_growth: None,
        salary_data: None,
        trials: 1_000,
        seed: None,
        mode: CliMode::Monthly,
    }
}
