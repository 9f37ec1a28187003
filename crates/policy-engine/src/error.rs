//! The error taxonomy. Each kind is a distinct type rather than
//! one flat enum, matching how far apart their propagation rules are: a
//! `SchemaError` aborts the process at startup, a `ValidationError` rejects a
//! single config snapshot, a `ChainExecutionError` only aborts the current
//! request phase.

use std::fmt;

/// A single field-level validation failure, carrying the parameter path so
/// the caller can pinpoint exactly which field failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
	pub path: String,
	pub reason: String,
}

impl fmt::Display for FieldError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}: {}", self.path, self.reason)
	}
}

/// Raised when a `ParameterSchema` is internally inconsistent (e.g. an
/// unparseable regex, or a `default` that violates its own constraints).
/// This is an authoring bug in a policy definition, not a config-time
/// mistake, so it is fatal at registry build.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("schema error at {path}: {reason}")]
pub struct SchemaError {
	pub path: String,
	pub reason: String,
}

impl SchemaError {
	pub fn new(path: impl Into<String>, reason: impl Into<String>) -> Self {
		Self {
			path: path.into(),
			reason: reason.into(),
		}
	}
}

/// Raised by the parameter validator against a config-supplied parameter
/// bag. Aggregates every failure in the bag rather than stopping at the
/// first.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationError {
	pub errors: Vec<FieldError>,
}

impl ValidationError {
	pub fn single(path: impl Into<String>, reason: impl Into<String>) -> Self {
		Self {
			errors: vec![FieldError {
				path: path.into(),
				reason: reason.into(),
			}],
		}
	}

	pub fn is_empty(&self) -> bool {
		self.errors.is_empty()
	}

	pub fn merge(&mut self, other: ValidationError) {
		self.errors.extend(other.errors);
	}
}

impl fmt::Display for ValidationError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		for (i, e) in self.errors.iter().enumerate() {
			if i > 0 {
				writeln!(f)?;
			}
			write!(f, "{e}")?;
		}
		Ok(())
	}
}

/// Raised by the chain compiler. A snapshot containing any `ChainBuildError`
/// is rejected wholesale.
#[derive(thiserror::Error, Debug, Clone)]
pub enum ChainBuildError {
	#[error("route {route_key}: unknown policy {name}@{version}")]
	UnknownPolicy {
		route_key: String,
		name: String,
		version: String,
	},
	#[error("route {route_key}: parameter validation failed:\n{errors}")]
	InvalidParameters {
		route_key: String,
		errors: ValidationError,
	},
	#[error("route {route_key}: failed to compile execution condition for {name}@{version}: {reason}")]
	CelCompileError {
		route_key: String,
		name: String,
		version: String,
		reason: String,
	},
}

/// Raised by the chain executor while running a single phase of a single
/// request. Scoped to that phase only; it never invalidates the chain
/// itself.
///
/// Note on the "typedParams absent" edge case spec §4.7.2 calls out: there is
/// no corresponding variant here because `ChainEntry::typed_params` is a
/// required, non-`Option` field populated exclusively by a successful
/// `PolicyChain::compile` (see `chain.rs`) — a chain that exists to be
/// executed already has validated params for every entry. The case is
/// prevented by construction rather than checked and recovered from at
/// runtime, the same treatment given the "`ImmediateResponse` from a
/// response-phase policy" edge case in spec §9.
#[derive(thiserror::Error, Debug, Clone)]
pub enum ChainExecutionError {
	#[error("condition evaluation failed for {policy}@{version}: {reason}")]
	CelRuntimeError {
		policy: String,
		version: String,
		reason: String,
	},
}

/// Raised by config ingestion when compiling a whole snapshot: one or
/// more of its chains failed to build. All-or-nothing — the caller must not
/// install any part of the snapshot when this is returned.
#[derive(Debug, Clone)]
pub struct SnapshotRejected {
	pub failures: Vec<ChainBuildError>,
	pub total: usize,
}

impl std::error::Error for SnapshotRejected {}

impl fmt::Display for SnapshotRejected {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		writeln!(f, "snapshot rejected: {} of {} chain(s) failed to build:", self.failures.len(), self.total)?;
		for (i, failure) in self.failures.iter().enumerate() {
			if i > 0 {
				writeln!(f)?;
			}
			write!(f, "{failure}")?;
		}
		Ok(())
	}
}

/// Raised by the external-processing server when the bidirectional stream
/// itself is malformed, including duplicate or out-of-sequence request ids.
#[derive(thiserror::Error, Debug, Clone)]
pub enum ProtocolError {
	#[error("duplicate request id {request_id}: second context wins")]
	DuplicateRequestId { request_id: String },
	#[error("stream message arrived out of the expected sequence: {detail}")]
	OutOfSequence { detail: String },
	#[error("resource exhausted: {detail}")]
	ResourceExhausted { detail: String },
}
