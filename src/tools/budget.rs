//! Budget-discipline check for Section 20 (1) of the State Fiscal and
//! Financial Discipline Act B.E. 2561.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{number_arg, Tool, ToolError};

/// Minimum share of the annual budget that must go to investment, in percent.
const MIN_INVESTMENT_RATIO_PERCENT: f64 = 20.0;

/// Result of the two statutory checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetDisciplineReport {
    pub compliant: bool,
    pub investment_ratio_percent: f64,
    pub gap_investment_deficit: f64,
    pub message: String,
}

/// Run both checks.
///
/// Rejects a zero or negative total budget, non-finite inputs and amounts
/// whose ratio or gap overflows with [`ToolError::InvalidArgument`].
pub fn check_budget_discipline(
    total_budget: f64,
    investment_budget: f64,
    deficit_amount: f64,
) -> Result<BudgetDisciplineReport, ToolError> {
    for (name, value) in [
        ("total_budget", total_budget),
        ("investment_budget", investment_budget),
        ("deficit_amount", deficit_amount),
    ] {
        if !value.is_finite() {
            return Err(ToolError::InvalidArgument(format!(
                "{} must be a finite number",
                name
            )));
        }
    }
    if total_budget <= 0.0 {
        return Err(ToolError::InvalidArgument(
            "total_budget must be greater than zero".to_string(),
        ));
    }

    let investment_ratio = investment_budget / total_budget * 100.0;
    let gap = investment_budget - deficit_amount;
    if !investment_ratio.is_finite() || !gap.is_finite() {
        return Err(ToolError::InvalidArgument(
            "budget amounts are out of range".to_string(),
        ));
    }
    let ratio_pass = investment_ratio >= MIN_INVESTMENT_RATIO_PERCENT;
    let deficit_pass = investment_budget >= deficit_amount;

    let ratio_note = if ratio_pass {
        format!("ผ่านเกณฑ์ที่ 1: สัดส่วนงบลงทุนอยู่ที่ {:.2}%", investment_ratio)
    } else {
        format!(
            "ไม่ผ่านเกณฑ์ที่ 1: สัดส่วนงบลงทุนอยู่ที่ {:.2}% (กฎหมายกำหนดต้องไม่น้อยกว่า 20%)",
            investment_ratio
        )
    };
    let deficit_note = if deficit_pass {
        "ผ่านเกณฑ์ที่ 2: งบลงทุนมากกว่าหรือเท่ากับการขาดดุล".to_string()
    } else {
        format!(
            "ไม่ผ่านเกณฑ์ที่ 2: งบลงทุน ({}) น้อยกว่าการขาดดุล ({})",
            format_amount(investment_budget),
            format_amount(deficit_amount)
        )
    };

    Ok(BudgetDisciplineReport {
        compliant: ratio_pass && deficit_pass,
        investment_ratio_percent: investment_ratio,
        gap_investment_deficit: gap,
        message: format!("{} และ {}", ratio_note, deficit_note),
    })
}

/// Two decimals with thousands separators, e.g. `1,234,567.80`.
fn format_amount(value: f64) -> String {
    let fixed = format!("{:.2}", value.abs());
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if value < 0.0 && fixed.bytes().any(|b| b.is_ascii_digit() && b != b'0') {
        "-"
    } else {
        ""
    };
    format!("{}{}.{}", sign, grouped, frac_part)
}

/// Tool wrapper around [`check_budget_discipline`].
pub struct BudgetDisciplineCheck;

#[async_trait]
impl Tool for BudgetDisciplineCheck {
    fn name(&self) -> &str {
        "check_budget_discipline_s20"
    }

    fn description(&self) -> &str {
        "Calculates compliance with Section 20 (1) of the State Fiscal and Financial Discipline Act B.E. 2561: \
         the investment budget must be at least 20% of the total annual budget and not less than the budget deficit. \
         Returns pass/fail status, the investment ratio, the investment-minus-deficit gap and a Thai explanation."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "total_budget": {
                    "type": "number",
                    "description": "วงเงินงบประมาณรายจ่ายประจำปีทั้งหมด (Total Annual Budget)"
                },
                "investment_budget": {
                    "type": "number",
                    "description": "งบประมาณรายจ่ายลงทุน (Capital/Investment Expenditure)"
                },
                "deficit_amount": {
                    "type": "number",
                    "description": "วงเงินส่วนที่ขาดดุลงบประมาณ (Budget Deficit Amount). Default is 0 if balanced budget."
                }
            },
            "required": ["total_budget", "investment_budget"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let total = number_arg(&args, "total_budget")?
            .ok_or_else(|| ToolError::InvalidArgument("Missing 'total_budget' argument".into()))?;
        let investment = number_arg(&args, "investment_budget")?.ok_or_else(|| {
            ToolError::InvalidArgument("Missing 'investment_budget' argument".into())
        })?;
        let deficit = number_arg(&args, "deficit_amount")?.unwrap_or(0.0);

        let report = check_budget_discipline(total, investment, deficit)?;
        tracing::debug!(
            compliant = report.compliant,
            ratio = report.investment_ratio_percent,
            "Budget discipline computed"
        );
        serde_json::to_value(report).map_err(|e| ToolError::Execution(e.to_string()))
    }
}
