//! Result Formatter
//!
//! Turns validated, aggregated rows into the answer text. Money measures get
//! a total line followed by a per-row breakdown; counts are whole numbers
//! without a currency; averages and largest expenses are listed, never summed.

use crate::error::AgentError;
use crate::models::{QueryPayload, Row};
use crate::synthesizer::{Measure, QueryIntent};
use crate::Result;
use serde_json::Value;

const MAX_BREAKDOWN_ROWS: usize = 10;

#[derive(Debug, Clone, PartialEq)]
struct Line {
    label: String,
    amount: f64,
    currency: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResultFormatter;

impl ResultFormatter {
    pub fn new() -> Self {
        Self
    }

    /// Format rows produced by the query rendered from `intent`.
    pub fn format(&self, payload: &QueryPayload, intent: &QueryIntent) -> Result<String> {
        let rows = match payload {
            QueryPayload::Rows(rows) => rows,
            QueryPayload::Scalar(value) => {
                return Err(AgentError::FormattingError(format!(
                    "expected an array of rows, got {}",
                    value_kind(value)
                )))
            }
        };

        if rows.is_empty() {
            return Ok(format!(
                "No matching data was found for {}.",
                intent.period.phrase()
            ));
        }

        let lines = rows
            .iter()
            .enumerate()
            .map(|(i, row)| parse_line(i, row))
            .collect::<Result<Vec<_>>>()?;

        Ok(match intent.measure {
            Measure::TransactionCount => format_counts(&lines),
            Measure::AverageSpending => format_listing("Average per transaction", &lines, false),
            Measure::LargestExpenses => format_listing("Largest expenses", &lines, true),
            Measure::Spending | Measure::Income | Measure::AccountBalances => {
                format_totals(&lines)
            }
        })
    }
}

/// Sum per currency, then break down by row.
fn format_totals(lines: &[Line]) -> String {
    // Totals per currency, in order of first appearance.
    let mut totals: Vec<(Option<String>, f64)> = Vec::new();
    for line in lines {
        match totals.iter_mut().find(|(c, _)| *c == line.currency) {
            Some((_, sum)) => *sum += line.amount,
            None => totals.push((line.currency.clone(), line.amount)),
        }
    }

    let total_text: Vec<String> = totals
        .iter()
        .map(|(currency, sum)| format_amount(*sum, currency.as_deref()))
        .collect();
    let mut out = format!("Total: {}", total_text.join(", "));

    if lines.len() > 1 {
        push_breakdown(&mut out, lines, |line| {
            format_amount(line.amount, line.currency.as_deref())
        });
    }
    out
}

/// Counts are currency-free, so rows split only by currency merge back
/// under their label.
fn format_counts(lines: &[Line]) -> String {
    let mut merged: Vec<Line> = Vec::new();
    for line in lines {
        match merged.iter_mut().find(|m| m.label == line.label) {
            Some(m) => m.amount += line.amount,
            None => merged.push(Line {
                currency: None,
                ..line.clone()
            }),
        }
    }

    let total: f64 = merged.iter().map(|m| m.amount).sum();
    let mut out = format!("Transactions: {}", format_count(total));
    if merged.len() > 1 {
        push_breakdown(&mut out, &merged, |line| format_count(line.amount));
    }
    out
}

fn format_listing(heading: &str, lines: &[Line], always_list: bool) -> String {
    if let [line] = lines {
        if !always_list {
            return format!(
                "{}: {}",
                heading,
                format_amount(line.amount, line.currency.as_deref())
            );
        }
    }

    let mut out = format!("{}:", heading);
    push_breakdown(&mut out, lines, |line| {
        format_amount(line.amount, line.currency.as_deref())
    });
    out
}

fn push_breakdown<F>(out: &mut String, lines: &[Line], value: F)
where
    F: Fn(&Line) -> String,
{
    for line in lines.iter().take(MAX_BREAKDOWN_ROWS) {
        out.push_str(&format!("\n- {}: {}", line.label, value(line)));
    }
    if lines.len() > MAX_BREAKDOWN_ROWS {
        out.push_str(&format!(
            "\n... and {} more",
            lines.len() - MAX_BREAKDOWN_ROWS
        ));
    }
}

fn parse_line(index: usize, row: &Row) -> Result<Line> {
    let amount = row.get("total").and_then(numeric).ok_or_else(|| {
        AgentError::FormattingError(format!("row {} has no numeric 'total'", index))
    })?;

    let label = match row.get("label") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => format!("Row {}", index + 1),
    };

    let currency = match row.get("currency") {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
        _ => None,
    };

    Ok(Line {
        label,
        amount,
        currency,
    })
}

/// Postgres `numeric` comes back from `row_to_json` as a JSON number, but
/// drivers and casts sometimes hand it over as a string.
fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}

fn format_amount(amount: f64, currency: Option<&str>) -> String {
    match currency {
        Some(code) => format!("{:.2} {}", amount, code),
        None if amount.fract() == 0.0 => format!("{}", amount as i64),
        None => format!("{:.2}", amount),
    }
}

fn format_count(count: f64) -> String {
    format!("{}", count.round() as i64)
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array of non-objects",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthesizer::{Grouping, Period};
    use serde_json::json;

    fn rows(value: Value) -> QueryPayload {
        let rows = value
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_object().unwrap().clone())
            .collect();
        QueryPayload::Rows(rows)
    }

    fn intent(measure: Measure, period: Period) -> QueryIntent {
        QueryIntent {
            measure,
            group_by: Grouping::None,
            period,
            category: None,
            limit: None,
        }
    }

    fn spending() -> QueryIntent {
        intent(Measure::Spending, Period::ThisMonth)
    }

    #[test]
    fn test_total_then_breakdown() {
        let payload = rows(json!([
            {"label": "Groceries", "total": 320.5, "currency": "USD", "count": 12},
            {"label": "Rent", "total": "1200.00", "currency": "USD", "count": 1},
            {"label": "Travel", "total": 80, "currency": "EUR", "count": 2}
        ]));
        let text = ResultFormatter::new().format(&payload, &spending()).unwrap();
        assert_eq!(
            text,
            "Total: 1520.50 USD, 80.00 EUR\n- Groceries: 320.50 USD\n- Rent: 1200.00 USD\n- Travel: 80.00 EUR"
        );
    }

    #[test]
    fn test_single_row_has_no_breakdown() {
        let payload = rows(json!([{"label": "Total", "total": 7}]));
        let text = ResultFormatter::new().format(&payload, &spending()).unwrap();
        assert_eq!(text, "Total: 7");
    }

    #[test]
    fn test_counts_are_whole_numbers_without_currency() {
        let formatter = ResultFormatter::new();
        let count = intent(Measure::TransactionCount, Period::ThisMonth);

        let per_currency = rows(json!([
            {"label": "Total", "total": 12, "currency": "USD", "count": 12},
            {"label": "Total", "total": 3, "currency": "EUR", "count": 3}
        ]));
        assert_eq!(formatter.format(&per_currency, &count).unwrap(), "Transactions: 15");

        let by_category = rows(json!([
            {"label": "Food", "total": 4, "currency": "USD"},
            {"label": "Rent", "total": 1, "currency": "USD"},
            {"label": "Food", "total": "2", "currency": "EUR"}
        ]));
        assert_eq!(
            formatter.format(&by_category, &count).unwrap(),
            "Transactions: 7\n- Food: 6\n- Rent: 1"
        );
    }

    #[test]
    fn test_averages_are_not_summed() {
        let formatter = ResultFormatter::new();
        let average = intent(Measure::AverageSpending, Period::ThisMonth);

        let by_category = rows(json!([
            {"label": "Food", "total": 10, "currency": "USD", "count": 5},
            {"label": "Rent", "total": 900, "currency": "USD", "count": 1}
        ]));
        let text = formatter.format(&by_category, &average).unwrap();
        assert_eq!(
            text,
            "Average per transaction:\n- Food: 10.00 USD\n- Rent: 900.00 USD"
        );
        assert!(!text.contains("Total"));

        let single = rows(json!([{"label": "Total", "total": 42.5, "currency": "USD"}]));
        assert_eq!(
            formatter.format(&single, &average).unwrap(),
            "Average per transaction: 42.50 USD"
        );
    }

    #[test]
    fn test_largest_expenses_are_listed() {
        let payload = rows(json!([
            {"label": "Laptop", "total": 1500, "currency": "USD"}
        ]));
        let text = ResultFormatter::new()
            .format(&payload, &intent(Measure::LargestExpenses, Period::ThisYear))
            .unwrap();
        assert_eq!(text, "Largest expenses:\n- Laptop: 1500.00 USD");
    }

    #[test]
    fn test_breakdown_is_capped() {
        let many: Vec<Value> = (0..13)
            .map(|i| json!({"label": format!("C{}", i), "total": 1, "currency": "USD"}))
            .collect();
        let text = ResultFormatter::new()
            .format(&rows(Value::Array(many)), &spending())
            .unwrap();
        assert!(text.starts_with("Total: 13.00 USD"));
        assert!(text.ends_with("... and 3 more"));
        assert_eq!(text.lines().count(), 1 + MAX_BREAKDOWN_ROWS + 1);
    }

    #[test]
    fn test_empty_rows_name_the_executed_period() {
        let formatter = ResultFormatter::new();
        let text = formatter
            .format(&QueryPayload::Rows(vec![]), &intent(Measure::Spending, Period::LastMonth))
            .unwrap();
        assert_eq!(text, "No matching data was found for last month.");

        let text = formatter
            .format(&QueryPayload::Rows(vec![]), &intent(Measure::Income, Period::AllTime))
            .unwrap();
        assert_eq!(text, "No matching data was found for any period.");
    }

    #[test]
    fn test_shape_errors() {
        let formatter = ResultFormatter::new();
        let scalar = formatter.format(&QueryPayload::Scalar(json!(3)), &spending());
        assert!(matches!(scalar, Err(AgentError::FormattingError(_))));

        let missing = formatter.format(&rows(json!([{"label": "x", "amount": 3}])), &spending());
        assert!(matches!(missing, Err(AgentError::FormattingError(_))));

        let not_numeric = formatter.format(&rows(json!([{"total": "lots"}])), &spending());
        assert!(not_numeric.is_err());
    }
}
