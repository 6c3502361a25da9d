//! Numeric and bitwise operators.

use super::{format_double, parse_number, rows_table, ComputeContext, Operand};
use crate::core::connector::{Arithmetic, Bitwise};
use crate::core::table::SourceTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl ArithmeticOp {
    fn apply(self, left: f64, right: f64) -> Option<f64> {
        match self {
            ArithmeticOp::Add => Some(left + right),
            ArithmeticOp::Subtract => Some(left - right),
            ArithmeticOp::Multiply => Some(left * right),
            ArithmeticOp::Divide if right == 0.0 => None,
            ArithmeticOp::Divide => Some(left / right),
        }
    }
}

/// Validate the operand once: a `$n` column or a numeric literal.
fn operand(value: &str) -> Option<Operand> {
    match Operand::parse(value) {
        Operand::Literal(lit) if parse_number(&lit).is_none() => None,
        op => Some(op),
    }
}

pub(super) fn arithmetic(
    table: &SourceTable,
    params: &Arithmetic,
    op: ArithmeticOp,
    ctx: &ComputeContext<'_>,
) -> SourceTable {
    let operand = match (params.column, operand(&params.value)) {
        (column, Some(operand)) if column > 0 => operand,
        _ => {
            log::warn!(
                "Hostname {} - Invalid {:?} operation on column {} with operand {:?}, table unchanged",
                ctx.hostname,
                op,
                params.column,
                params.value
            );
            return table.clone();
        }
    };

    let index = params.column - 1;
    let rows = table
        .table
        .iter()
        .map(|row| {
            let mut row = row.clone();
            if let Some(result) = row
                .get(index)
                .and_then(|cell| parse_number(cell))
                .zip(operand.resolve(&row).and_then(parse_number))
                .and_then(|(left, right)| op.apply(left, right))
            {
                row[index] = format_double(result);
            } else if index < row.len() {
                ctx.malformed_row(&format!("{:?}", op), &row);
            }
            row
        })
        .collect();

    rows_table(rows)
}

fn parse_integer(value: &str) -> Option<i64> {
    let trimmed = value.trim();
    trimmed.parse::<i64>().ok().or_else(|| {
        parse_number(trimmed)
            .filter(|v| v.fract() == 0.0 && v.abs() < i64::MAX as f64)
            .map(|v| v as i64)
    })
}

pub(super) fn bitwise(table: &SourceTable, params: &Bitwise, and: bool, ctx: &ComputeContext<'_>) -> SourceTable {
    let operand = Operand::parse(&params.value);
    if params.column == 0 {
        log::warn!(
            "Hostname {} - Invalid bitwise operation on column 0, table unchanged",
            ctx.hostname
        );
        return table.clone();
    }

    let index = params.column - 1;
    let rows = table
        .table
        .iter()
        .map(|row| {
            let mut row = row.clone();
            let result = row
                .get(index)
                .and_then(|cell| parse_integer(cell))
                .zip(operand.resolve(&row).and_then(parse_integer))
                .map(|(left, right)| if and { left & right } else { left | right });
            match result {
                Some(result) => row[index] = result.to_string(),
                None if index < row.len() => {
                    ctx.malformed_row(if and { "and" } else { "or" }, &row);
                }
                None => {}
            }
            row
        })
        .collect();

    rows_table(rows)
}
