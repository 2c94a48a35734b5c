//! Table command implementation.

use serde::Serialize;
use txcoord_core::{Outcome, OutcomeResolver, Verdict, XaError, XaErrorCode};

/// The join table and, optionally, the code classification.
#[derive(Debug, Serialize)]
pub struct TableResult {
    /// Verdict labels, in row and column order.
    pub verdicts: Vec<&'static str>,
    /// `join[row][column]`.
    pub join: Vec<Vec<&'static str>>,
    /// Classification of every XA code, if requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codes: Option<Vec<CodeClass>>,
}

/// How one XA code is treated.
#[derive(Debug, Serialize)]
pub struct CodeClass {
    /// Symbolic name.
    pub name: &'static str,
    /// Numeric value.
    pub value: i32,
    /// Verdict when returned by commit or rollback.
    pub verdict: &'static str,
    /// Caller-visible result of a single commit failing with this code.
    pub single_commit: String,
}

fn label(verdict: Verdict) -> &'static str {
    match verdict {
        Verdict::Committed => "C",
        Verdict::RolledBack => "RB",
        Verdict::HeuristicRollback => "HR",
        Verdict::Mixed => "M",
        Verdict::Indeterminate => "I",
    }
}

/// Builds the table.
pub fn build(with_codes: bool) -> TableResult {
    let join = Verdict::ALL
        .iter()
        .map(|row| {
            Verdict::ALL
                .iter()
                .map(|column| label(row.join(*column)))
                .collect()
        })
        .collect();

    let codes = with_codes.then(|| {
        XaErrorCode::ALL
            .iter()
            .map(|code| {
                let mut resolver = OutcomeResolver::new();
                resolver.record(&Outcome::Failed(XaError::from(*code)));
                let resolution = resolver.resolve_commit();
                let single_commit = match resolution.clone().into_result() {
                    Ok(()) => format!("ok, {}", resolution.status),
                    Err(err) => format!("{err}, {}", resolution.status),
                };
                CodeClass {
                    name: code.name(),
                    value: code.code(),
                    verdict: label(Verdict::of_code(*code)),
                    single_commit,
                }
            })
            .collect()
    });

    TableResult {
        verdicts: Verdict::ALL.iter().map(|v| label(*v)).collect(),
        join,
        codes,
    }
}

/// Runs the table command.
pub fn run(with_codes: bool, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let table = build(with_codes);

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&table)?);
        }
        _ => {
            print_text_output(&table);
        }
    }

    Ok(())
}

fn print_text_output(table: &TableResult) {
    println!("Outcome join (C committed, RB rolled back, HR heuristic rollback,");
    println!("M mixed, I indeterminate):");
    println!();
    print!("{:>4}", "");
    for verdict in &table.verdicts {
        print!("{verdict:>4}");
    }
    println!();
    for (verdict, row) in table.verdicts.iter().zip(&table.join) {
        print!("{verdict:>4}");
        for cell in row {
            print!("{cell:>4}");
        }
        println!();
    }

    if let Some(codes) = &table.codes {
        println!();
        println!("{:<16} {:>5}  {:<3} Single commit", "Code", "Value", "V");
        for class in codes {
            println!(
                "{:<16} {:>5}  {:<3} {}",
                class.name, class.value, class.verdict, class.single_commit
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_symmetric() {
        let table = build(false);
        for (i, row) in table.join.iter().enumerate() {
            for (j, cell) in row.iter().enumerate() {
                assert_eq!(*cell, table.join[j][i]);
            }
        }
        assert!(table.codes.is_none());
    }

    #[test]
    fn classifies_every_code() {
        let table = build(true);
        let codes = table.codes.unwrap();
        assert_eq!(codes.len(), XaErrorCode::ALL.len());
        let heurcom = codes.iter().find(|c| c.name == "XA_HEURCOM").unwrap();
        assert_eq!(heurcom.verdict, "C");
        assert!(heurcom.single_commit.starts_with("ok"));
    }
}
