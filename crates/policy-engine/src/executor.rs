//! Runs a compiled `PolicyChain` against a live context for one phase of one
//! exchange. Request phase walks entries forward and can short-circuit on
//! `ImmediateResponse`; response phase walks them in reverse and never
//! short-circuits, since response actions are modification-only.

use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use policy_core::strng::Strng;
use tracing::error;

use crate::action::{ImmediateResponse, RequestAction, ResponseAction};
use crate::cel::EvalContext;
use crate::chain::PolicyChain;
use crate::context::{RequestContext, ResponseContext};
use crate::error::ChainExecutionError;
use crate::http_mutations::{apply_request_modifications, apply_response_modifications};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
	Disabled,
	ConditionNotMet,
}

/// What happened when the executor reached one chain entry.
#[derive(Debug)]
pub enum EntryOutcome<Action> {
	Executed { action: Option<Action>, duration: Duration },
	Skipped(SkipReason),
	/// The implementation panicked. Recovered at this boundary and treated
	/// as a null action; does not abort the chain.
	Panicked,
}

pub struct EntryResult<Action> {
	pub name: Strng,
	pub version: Strng,
	pub outcome: EntryOutcome<Action>,
}

pub struct RequestExecutionResult {
	pub entries: Vec<EntryResult<RequestAction>>,
	pub short_circuited: bool,
	pub final_action: Option<ImmediateResponse>,
	pub duration: Duration,
}

pub struct ResponseExecutionResult {
	pub entries: Vec<EntryResult<ResponseAction>>,
	pub duration: Duration,
}

pub fn execute_request(chain: &PolicyChain, ctx: &mut RequestContext) -> Result<RequestExecutionResult, ChainExecutionError> {
	let started = Instant::now();
	let mut entries = Vec::with_capacity(chain.entries.len());
	let mut short_circuited = false;
	let mut final_action = None;

	for entry in &chain.entries {
		let name = entry.definition.name.clone();
		let version = entry.definition.version.clone();

		if !entry.enabled {
			entries.push(EntryResult {
				name,
				version,
				outcome: EntryOutcome::Skipped(SkipReason::Disabled),
			});
			continue;
		}

		if chain.has_execution_conditions
			&& let Some(program) = &entry.compiled_condition
		{
			let eval_ctx = EvalContext::for_request(&ctx.as_cel_snapshot());
			match crate::cel::evaluate_condition(program, &eval_ctx) {
				Ok(true) => {},
				Ok(false) => {
					entries.push(EntryResult {
						name,
						version,
						outcome: EntryOutcome::Skipped(SkipReason::ConditionNotMet),
					});
					continue;
				},
				Err(reason) => {
					return Err(ChainExecutionError::CelRuntimeError {
						policy: name.to_string(),
						version: version.to_string(),
						reason: reason.to_string(),
					});
				},
			}
		}

		let invoke_started = Instant::now();
		let outcome = match std::panic::catch_unwind(AssertUnwindSafe(|| {
			entry.implementation.on_request(ctx, &entry.typed_params)
		})) {
			Ok(action) => EntryOutcome::Executed {
				action,
				duration: invoke_started.elapsed(),
			},
			Err(panic) => {
				error!(policy = %name, version = %version, ?panic, "policy panicked during onRequest");
				EntryOutcome::Panicked
			},
		};

		if let EntryOutcome::Executed {
			action: Some(RequestAction::ImmediateResponse(immediate)),
			..
		} = &outcome
		{
			short_circuited = true;
			final_action = Some(immediate.clone());
			entries.push(EntryResult { name, version, outcome });
			break;
		}

		if let EntryOutcome::Executed {
			action: Some(RequestAction::UpstreamRequestModifications(modifications)),
			..
		} = &outcome
		{
			apply_request_modifications(ctx, modifications);
		}

		entries.push(EntryResult { name, version, outcome });
	}

	Ok(RequestExecutionResult {
		entries,
		short_circuited,
		final_action,
		duration: started.elapsed(),
	})
}

pub fn execute_response(
	chain: &PolicyChain,
	req_snapshot: Option<&crate::cel::RequestSnapshot>,
	ctx: &mut ResponseContext,
) -> Result<ResponseExecutionResult, ChainExecutionError> {
	let started = Instant::now();
	let mut entries = Vec::with_capacity(chain.entries.len());

	for entry in chain.entries.iter().rev() {
		let name = entry.definition.name.clone();
		let version = entry.definition.version.clone();

		if !entry.enabled {
			entries.push(EntryResult {
				name,
				version,
				outcome: EntryOutcome::Skipped(SkipReason::Disabled),
			});
			continue;
		}

		if chain.has_execution_conditions
			&& let Some(program) = &entry.compiled_condition
		{
			let response_snapshot = ctx.as_cel_snapshot();
			let eval_ctx = EvalContext::for_response(req_snapshot, &response_snapshot);
			match crate::cel::evaluate_condition(program, &eval_ctx) {
				Ok(true) => {},
				Ok(false) => {
					entries.push(EntryResult {
						name,
						version,
						outcome: EntryOutcome::Skipped(SkipReason::ConditionNotMet),
					});
					continue;
				},
				Err(reason) => {
					return Err(ChainExecutionError::CelRuntimeError {
						policy: name.to_string(),
						version: version.to_string(),
						reason: reason.to_string(),
					});
				},
			}
		}

		let invoke_started = Instant::now();
		let outcome = match std::panic::catch_unwind(AssertUnwindSafe(|| {
			entry.implementation.on_response(ctx, &entry.typed_params)
		})) {
			Ok(action) => EntryOutcome::Executed {
				action,
				duration: invoke_started.elapsed(),
			},
			Err(panic) => {
				error!(policy = %name, version = %version, ?panic, "policy panicked during onResponse");
				EntryOutcome::Panicked
			},
		};

		if let EntryOutcome::Executed {
			action: Some(ResponseAction::UpstreamResponseModifications(modifications)),
			..
		} = &outcome
		{
			apply_response_modifications(ctx, modifications);
		}

		entries.push(EntryResult { name, version, outcome });
	}

	Ok(ResponseExecutionResult {
		entries,
		duration: started.elapsed(),
	})
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
