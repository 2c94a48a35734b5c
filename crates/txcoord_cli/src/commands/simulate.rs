//! Simulate command implementation.

use serde::Serialize;
use txcoord_core::{
    CoordinatorError, HeuristicOutcome, StatsSnapshot, Status, TransactionId, XaErrorCode,
};
use txcoord_testkit::{Script, TestCoordinator};

/// Options controlling how the simulated transaction completes.
#[derive(Debug, Default)]
pub struct SimulateOptions {
    /// Always run both phases.
    pub two_phase: bool,
    /// Mark rollback-only before completing.
    pub rollback_only: bool,
    /// Roll back instead of committing.
    pub rollback: bool,
    /// Message raised by a synchronization's beforeCompletion.
    pub raise_before_completion: Option<String>,
}

/// A parsed `name[:key=value,...]` resource argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSpec {
    /// Resource name, used in the event log.
    pub name: String,
    /// Resource manager identity; the name when absent.
    pub resource_manager: Option<String>,
    /// Failures to inject.
    pub script: Script,
}

impl ResourceSpec {
    /// Parses a resource argument.
    pub fn parse(arg: &str) -> Result<Self, String> {
        let (name, options) = arg.split_once(':').unwrap_or((arg, ""));
        if name.is_empty() {
            return Err(format!("resource name missing in {arg:?}"));
        }

        let mut spec = Self {
            name: name.to_string(),
            resource_manager: None,
            script: Script::default(),
        };
        for option in options.split(',').filter(|o| !o.is_empty()) {
            if option.eq_ignore_ascii_case("readonly") {
                spec.script.read_only = true;
                continue;
            }
            let (key, value) = option
                .split_once('=')
                .ok_or_else(|| format!("expected key=value, got {option:?}"))?;
            if key == "rm" {
                spec.resource_manager = Some(value.to_string());
                continue;
            }
            let code = value
                .parse::<XaErrorCode>()
                .map_err(|e| format!("{name}: {e}"))?;
            let slot = match key {
                "start" => &mut spec.script.start,
                "end" => &mut spec.script.end,
                "prepare" => &mut spec.script.prepare,
                "commit" => &mut spec.script.commit,
                "rollback" => &mut spec.script.rollback,
                "forget" => &mut spec.script.forget,
                other => return Err(format!("{name}: unknown operation {other:?}")),
            };
            *slot = Some(code);
        }
        Ok(spec)
    }
}

/// Result of one simulated transaction.
#[derive(Debug, Serialize)]
pub struct SimulationResult {
    /// Transaction identifier.
    pub transaction: TransactionId,
    /// Global transaction identifier.
    pub xid: String,
    /// Final status.
    pub status: Status,
    /// `ok`, or the error reported to the caller.
    pub outcome: String,
    /// Heuristic outcome, if one was reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heuristic: Option<HeuristicOutcome>,
    /// Resources whose enlistment failed.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub enlist_errors: Vec<String>,
    /// Every call and callback, in order.
    pub events: Vec<String>,
    /// Per-branch summary.
    pub branches: Vec<BranchReport>,
    /// Coordinator counters after the run.
    pub stats: StatsSnapshot,
}

/// Summary of one transaction branch.
#[derive(Debug, Serialize)]
pub struct BranchReport {
    /// Branch identifier.
    pub xid: String,
    /// Resource manager identity.
    pub resource_manager: String,
    /// Prepare vote, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vote: Option<String>,
    /// Last completion outcome, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    /// Whether the branch was forgotten.
    pub forgotten: bool,
}

/// Runs the simulate command.
pub fn run(
    resources: &[String],
    options: &SimulateOptions,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let specs = resources
        .iter()
        .map(|arg| ResourceSpec::parse(arg))
        .collect::<Result<Vec<_>, _>>()?;
    let result = simulate(&specs, options)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Runs one transaction against the given resources.
pub fn simulate(
    specs: &[ResourceSpec],
    options: &SimulateOptions,
) -> Result<SimulationResult, CoordinatorError> {
    let tc = if options.two_phase {
        TestCoordinator::two_phase()
    } else {
        TestCoordinator::new()
    };
    let tx = tc.begin()?;

    let mut enlist_errors = Vec::new();
    for spec in specs {
        let mut builder = tc.resource(&spec.name).script(spec.script.clone());
        if let Some(rm) = &spec.resource_manager {
            builder = builder.resource_manager(rm);
        }
        let resource = builder.into_handle();
        resource.watch(&tx);
        if let Err(err) = tx.enlist_resource(resource) {
            tracing::warn!(resource = %spec.name, error = %err, "enlistment failed");
            enlist_errors.push(format!("{}: {err}", spec.name));
        }
    }

    let mut sync = tc.synchronization("sync");
    if let Some(message) = &options.raise_before_completion {
        sync = sync.raising(message);
    }
    tx.register_synchronization(sync.into_handle())?;

    if options.rollback_only {
        tc.set_rollback_only()?;
    }
    let result = if options.rollback {
        tc.rollback()
    } else {
        tc.commit()
    };

    let heuristic = match &result {
        Err(CoordinatorError::Heuristic(kind)) => Some(*kind),
        _ => None,
    };
    let branches = tx
        .branches()
        .into_iter()
        .map(|branch| BranchReport {
            xid: branch.xid.to_string(),
            resource_manager: branch.resource_manager.to_string(),
            vote: branch.vote.map(|vote| format!("{vote:?}")),
            outcome: branch.outcome.map(|outcome| format!("{outcome:?}")),
            forgotten: branch.forgotten,
        })
        .collect();

    Ok(SimulationResult {
        transaction: tx.id(),
        xid: tx.xid().to_string(),
        status: tx.status(),
        outcome: match &result {
            Ok(()) => "ok".to_string(),
            Err(err) => err.to_string(),
        },
        heuristic,
        enlist_errors,
        events: tc.log.labels(),
        branches,
        stats: tc.stats().snapshot(),
    })
}

fn print_text_output(result: &SimulationResult) {
    println!("Transaction: {} ({})", result.transaction, result.xid);
    println!("Status: {}", result.status);
    println!("Outcome: {}", result.outcome);
    if let Some(kind) = result.heuristic {
        println!("Heuristic: {kind}");
    }
    for error in &result.enlist_errors {
        println!("Enlist failed: {error}");
    }

    println!();
    println!("Events:");
    for (i, event) in result.events.iter().enumerate() {
        println!("  {:>3}  {}", i + 1, event);
    }

    if !result.branches.is_empty() {
        println!();
        println!("Branches:");
        for branch in &result.branches {
            println!(
                "  {}  rm={}  vote={}  outcome={}{}",
                branch.xid,
                branch.resource_manager,
                branch.vote.as_deref().unwrap_or("-"),
                branch.outcome.as_deref().unwrap_or("-"),
                if branch.forgotten { "  forgotten" } else { "" },
            );
        }
    }
}
