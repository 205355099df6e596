use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::{EngineError, EngineResult};

/// Tolerance used when checking that allocation weights sum to one.
pub const ALLOCATION_TOLERANCE: f64 = 1e-6;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetClass {
    Equities,
    Bonds,
    Cash,
}

impl AssetClass {
    pub const ALL: [AssetClass; 3] = [AssetClass::Equities, AssetClass::Bonds, AssetClass::Cash];

    pub fn as_str(self) -> &'static str {
        match self {
            AssetClass::Equities => "equities",
            AssetClass::Bonds => "bonds",
            AssetClass::Cash => "cash",
        }
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetClass {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "equities" | "equity" => Ok(AssetClass::Equities),
            "bonds" | "bond" => Ok(AssetClass::Bonds),
            "cash" => Ok(AssetClass::Cash),
            _ => Err(EngineError::UnknownAssetClass(s.to_string())),
        }
    }
}

/// Snapshot of the user's answers. The engine only ever reads it.
#[derive(Debug, Clone)]
pub struct UserProfile {
    pub current_age: u32,
    pub retirement_age: u32,
    pub annual_income: f64,
    pub pension_balance: f64,
    pub contribution_rate: f64,
    pub target_monthly_income: f64,
    pub sector: String,
}

impl UserProfile {
    pub fn horizon_years(&self) -> EngineResult<u32> {
        if self.retirement_age <= self.current_age {
            return Err(EngineError::EmptyHorizon {
                current_age: self.current_age,
                retirement_age: self.retirement_age,
            });
        }
        Ok(self.retirement_age - self.current_age)
    }

    pub fn horizon_months(&self) -> EngineResult<usize> {
        Ok(self.horizon_years()? as usize * 12)
    }

    pub fn validate(&self) -> EngineResult<()> {
        self.horizon_years()?;
        if !(0.0..=1.0).contains(&self.contribution_rate) {
            return Err(EngineError::invalid(
                "contribution_rate",
                format!("must be between 0 and 1, got {}", self.contribution_rate),
            ));
        }
        for (name, value) in [
            ("annual_income", self.annual_income),
            ("pension_balance", self.pension_balance),
            ("target_monthly_income", self.target_monthly_income),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(EngineError::invalid(
                    name,
                    format!("must be finite and >= 0, got {value}"),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AllocationWeights {
    pub equity: f64,
    pub bonds: f64,
    pub cash: f64,
}

impl AllocationWeights {
    pub fn new(equity: f64, bonds: f64, cash: f64) -> Self {
        Self {
            equity,
            bonds,
            cash,
        }
    }

    /// Builds weights from a slider triplet expressed in percent.
    pub fn from_percentages(equity: f64, bonds: f64, cash: f64) -> Self {
        Self::new(equity / 100.0, bonds / 100.0, cash / 100.0)
    }

    pub fn weight(&self, class: AssetClass) -> f64 {
        match class {
            AssetClass::Equities => self.equity,
            AssetClass::Bonds => self.bonds,
            AssetClass::Cash => self.cash,
        }
    }

    pub fn sum(&self) -> f64 {
        self.equity + self.bonds + self.cash
    }

    /// Rejects weights that are negative or do not sum to one. The engine never
    /// renormalizes on its own; callers use [`AllocationWeights::normalized`].
    pub fn validate(&self) -> EngineResult<()> {
        if AssetClass::ALL
            .iter()
            .any(|&class| !self.weight(class).is_finite() || self.weight(class) < 0.0)
        {
            return Err(EngineError::NegativeWeight);
        }
        let sum = self.sum();
        if (sum - 1.0).abs() > ALLOCATION_TOLERANCE {
            return Err(EngineError::AllocationNotNormalized { sum });
        }
        Ok(())
    }

    pub fn normalized(&self) -> EngineResult<Self> {
        if AssetClass::ALL
            .iter()
            .any(|&class| !self.weight(class).is_finite() || self.weight(class) < 0.0)
        {
            return Err(EngineError::NegativeWeight);
        }
        let sum = self.sum();
        if sum <= 0.0 {
            return Err(EngineError::AllocationNotNormalized { sum });
        }
        Ok(Self::new(self.equity / sum, self.bonds / sum, self.cash / sum))
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AllocationPreset {
    Conservative,
    Balanced,
    Aggressive,
}

impl AllocationPreset {
    pub const ALL: [AllocationPreset; 3] = [
        AllocationPreset::Conservative,
        AllocationPreset::Balanced,
        AllocationPreset::Aggressive,
    ];

    pub fn weights(self) -> AllocationWeights {
        match self {
            AllocationPreset::Conservative => AllocationWeights::from_percentages(20.0, 70.0, 10.0),
            AllocationPreset::Balanced => AllocationWeights::from_percentages(50.0, 40.0, 10.0),
            AllocationPreset::Aggressive => AllocationWeights::from_percentages(80.0, 15.0, 5.0),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetAssumptions {
    pub mean_annual_return: f64,
    pub annual_stdev: f64,
    pub annual_fee_rate: f64,
    pub capital_gains_tax_rate: f64,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetReturnTable {
    pub equities: AssetAssumptions,
    pub bonds: AssetAssumptions,
    pub cash: AssetAssumptions,
}

impl AssetReturnTable {
    pub fn get(&self, class: AssetClass) -> &AssetAssumptions {
        match class {
            AssetClass::Equities => &self.equities,
            AssetClass::Bonds => &self.bonds,
            AssetClass::Cash => &self.cash,
        }
    }

    pub fn get_mut(&mut self, class: AssetClass) -> &mut AssetAssumptions {
        match class {
            AssetClass::Equities => &mut self.equities,
            AssetClass::Bonds => &mut self.bonds,
            AssetClass::Cash => &mut self.cash,
        }
    }

    /// Same table with every volatility set to zero.
    pub fn without_volatility(mut self) -> Self {
        for class in AssetClass::ALL {
            self.get_mut(class).annual_stdev = 0.0;
        }
        self
    }
}

impl Default for AssetReturnTable {
    fn default() -> Self {
        Self {
            equities: AssetAssumptions {
                mean_annual_return: 0.10,
                annual_stdev: 0.15,
                annual_fee_rate: 0.002,
                capital_gains_tax_rate: 0.41,
            },
            bonds: AssetAssumptions {
                mean_annual_return: 0.05,
                annual_stdev: 0.05,
                annual_fee_rate: 0.002,
                capital_gains_tax_rate: 0.41,
            },
            cash: AssetAssumptions {
                mean_annual_return: 0.02,
                annual_stdev: 0.01,
                annual_fee_rate: 0.0,
                capital_gains_tax_rate: 0.0,
            },
        }
    }
}

/// Engine constants. Passed explicitly with every request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProjectionConfig {
    pub inflation_rate: f64,
    pub default_salary_growth: f64,
    pub trials: u32,
    pub percentiles: Vec<f64>,
    pub seed: Option<u64>,
    pub cash_baseline_return: f64,
    pub life_expectancy: u32,
    pub buffer_years: u32,
    pub safe_withdrawal_rate: f64,
    pub goal_growth_rate: f64,
    pub disposal_interval_months: u32,
    pub state_pension_annual: f64,
    pub state_pension_growth: f64,
    pub state_pension_age: u32,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            inflation_rate: 0.02,
            default_salary_growth: 0.025,
            trials: 1000,
            percentiles: vec![10.0, 50.0, 90.0],
            seed: None,
            cash_baseline_return: 0.01,
            life_expectancy: 82,
            buffer_years: 5,
            safe_withdrawal_rate: 0.04,
            goal_growth_rate: 0.04,
            disposal_interval_months: 96,
            state_pension_annual: 13_800.0,
            state_pension_growth: 0.0433,
            state_pension_age: 66,
        }
    }
}

impl ProjectionConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if self.trials == 0 {
            return Err(EngineError::invalid("trials", "must be > 0"));
        }
        if self.percentiles.is_empty() {
            return Err(EngineError::invalid("percentiles", "must not be empty"));
        }
        if let Some(p) = self
            .percentiles
            .iter()
            .find(|p| !(0.0..=100.0).contains(*p))
        {
            return Err(EngineError::invalid(
                "percentiles",
                format!("{p} is outside 0..=100"),
            ));
        }
        if self.disposal_interval_months == 0 {
            return Err(EngineError::invalid("disposal_interval_months", "must be > 0"));
        }
        for (name, rate) in [
            ("inflation_rate", self.inflation_rate),
            ("default_salary_growth", self.default_salary_growth),
            ("cash_baseline_return", self.cash_baseline_return),
            ("goal_growth_rate", self.goal_growth_rate),
            ("state_pension_growth", self.state_pension_growth),
        ] {
            if !rate.is_finite() || rate <= -1.0 {
                return Err(EngineError::invalid(name, format!("must be > -1, got {rate}")));
            }
        }
        if !self.safe_withdrawal_rate.is_finite() || self.safe_withdrawal_rate <= 0.0 {
            return Err(EngineError::invalid("safe_withdrawal_rate", "must be > 0"));
        }
        Ok(())
    }
}

/// Everything one projection needs, assembled by the caller.
#[derive(Debug, Clone)]
pub struct ProjectionRequest {
    pub profile: UserProfile,
    pub allocation: AllocationWeights,
    pub returns: AssetReturnTable,
    pub config: ProjectionConfig,
}

impl ProjectionRequest {
    pub fn validate(&self) -> EngineResult<()> {
        self.profile.validate()?;
        self.allocation.validate()?;
        self.config.validate()
    }
}

/// One trial's balances, one value per period, already deflated to today's money.
#[derive(Debug, Clone)]
pub struct SimulationPath {
    pub balances: Vec<f64>,
    /// Terminal balance with the accumulated inflation deflation undone.
    pub nominal_terminal: f64,
}

impl SimulationPath {
    pub fn terminal(&self) -> f64 {
        self.balances.last().copied().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PercentileSeries {
    pub percentile: f64,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalSummary {
    pub p5: f64,
    pub p10: f64,
    pub median: f64,
    pub p90: f64,
    pub p95: f64,
    pub mean: f64,
}

/// Annual income drawable at the safe withdrawal rate.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetirementIncome {
    pub p10_annual: f64,
    pub median_annual: f64,
    pub p90_annual: f64,
    pub median_monthly: f64,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalGap {
    pub retirement_years: u32,
    pub target_fund: f64,
    pub median_terminal: f64,
    pub gap: f64,
    pub shortfall: Option<f64>,
    pub surplus: Option<f64>,
    /// Shortfall or surplus as a percentage of the target fund.
    pub gap_percentage: f64,
    /// Level monthly payment at the goal growth rate that closes the gap.
    /// Never negative: an already-sufficient balance needs zero.
    pub required_monthly_contribution: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionResult {
    pub months: usize,
    pub seed: u64,
    pub salary_growth_rate: f64,
    pub percentile_paths: Vec<PercentileSeries>,
    pub terminal: TerminalSummary,
    pub retirement_income: RetirementIncome,
    pub cash_baseline_path: Vec<f64>,
    pub cash_baseline_terminal: f64,
    pub total_nominal_contributions: f64,
    pub goal: GoalGap,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeemedDisposalResult {
    pub asset_class: AssetClass,
    pub tax_rate: f64,
    pub history: Vec<f64>,
    pub disposal_months: Vec<u32>,
    pub final_balance: f64,
    pub total_contributions: f64,
    pub total_fees: f64,
    pub total_taxes: f64,
    pub gains_before_tax: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisposalBundle {
    pub equities: DeemedDisposalResult,
    pub bonds: DeemedDisposalResult,
    pub cash: DeemedDisposalResult,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearlyProjectionResult {
    pub seed: u64,
    pub salary_growth_rate: f64,
    pub ages: Vec<u32>,
    pub mean_balances: Vec<f64>,
    pub mean_incomes: Vec<f64>,
    pub projected_state_pension: f64,
    pub success_rate: f64,
    pub expected_monthly_income: f64,
    pub required_total_fund: f64,
    pub required_monthly_saving: f64,
}
