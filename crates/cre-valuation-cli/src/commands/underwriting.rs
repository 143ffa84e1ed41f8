use clap::{Args, ValueEnum};
use rust_decimal::Decimal;
use serde_json::Value;

use cre_valuation_core::assumptions::PaymentFrequency;
use cre_valuation_core::config::EngineConfig;
use cre_valuation_core::underwriting::amortization::{self, LoanTerms};
use cre_valuation_core::underwriting::pipeline::{self, AnalysisInput};

use crate::input;

/// Arguments for a full deal analysis
#[derive(Args)]
pub struct AnalyzeArgs {
    /// Path to JSON input file with `assumptions` and `baseline`
    #[arg(long)]
    pub input: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Frequency {
    Annual,
    Monthly,
}

impl From<Frequency> for PaymentFrequency {
    fn from(f: Frequency) -> Self {
        match f {
            Frequency::Annual => PaymentFrequency::Annual,
            Frequency::Monthly => PaymentFrequency::Monthly,
        }
    }
}

/// Arguments for an amortization schedule
#[derive(Args)]
pub struct AmortizeArgs {
    /// Path to JSON loan terms; flags below are used when absent
    #[arg(long)]
    pub input: Option<String>,

    /// Loan principal
    #[arg(long)]
    pub loan_amount: Option<Decimal>,

    /// Annual interest rate as a decimal (0.05 = 5%)
    #[arg(long)]
    pub rate: Option<Decimal>,

    /// Amortization term in years
    #[arg(long)]
    pub term: Option<u32>,

    /// Payment frequency
    #[arg(long, default_value = "annual")]
    pub frequency: Frequency,
}

pub fn run_analyze(
    args: AnalyzeArgs,
    config: &EngineConfig,
) -> Result<Value, Box<dyn std::error::Error>> {
    let analysis_input: AnalysisInput = input::read_input(args.input.as_deref(), "analyze")?;
    let result = pipeline::analyze(&analysis_input, &config.solver)?;
    Ok(serde_json::to_value(result)?)
}

pub fn run_amortize(args: AmortizeArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let terms = match (args.loan_amount, args.rate, args.term) {
        (Some(loan_amount), Some(interest_rate), Some(amortization_term_years)) => LoanTerms {
            loan_amount,
            interest_rate,
            amortization_term_years,
            payment_frequency: args.frequency.into(),
        },
        (None, None, None) => input::read_input(args.input.as_deref(), "amortize")?,
        _ => {
            return Err(
                "--loan-amount, --rate and --term must be given together (or use --input)".into(),
            )
        }
    };
    let result = amortization::amortize(&terms)?;
    Ok(serde_json::to_value(result)?)
}
