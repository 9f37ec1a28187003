//! Parameter validation as a pure function: a raw JSON parameter bag plus an
//! ordered list of `ParameterSchema` in, a typed parameter bag or an
//! aggregated `ValidationError` out.

use std::collections::BTreeMap;

use serde_json::Value as RawValue;

use crate::error::{FieldError, ValidationError};
use crate::schema::{ParameterSchema, ParameterType};

/// The validated, typed result of running a parameter bag through its
/// schema. Values keep their JSON shape (numbers, strings, bools, arrays,
/// objects) — typing is enforced by the validator, not by a distinct Rust
/// representation, since every policy implementation consumes these via the
/// same `serde_json::Value`-shaped API.
pub type TypedParams = BTreeMap<String, RawValue>;

/// Validates a whole parameter bag against an ordered schema list. Reports
/// every failure in one pass rather than stopping at the first, so a caller
/// building a chain can abort with the complete list of problems at once.
pub fn validate_bag(
	raw: &serde_json::Map<String, RawValue>,
	schemas: &[ParameterSchema],
	path_prefix: &str,
) -> Result<TypedParams, ValidationError> {
	let mut typed = TypedParams::new();
	let mut errors = ValidationError::default();

	for schema in schemas {
		let path = format!("{path_prefix}.{}", schema.name);
		match raw.get(&schema.name) {
			Some(value) => match validate_typed(value, schema) {
				Ok(v) => {
					typed.insert(schema.name.clone(), v);
				},
				Err(e) => errors.merge(prefix(e, &path)),
			},
			None => {
				// Absent: substitute the default if present; else error if
				// required; else leave it out of the typed bag entirely.
				if let Some(default) = &schema.default {
					typed.insert(schema.name.clone(), default.clone());
				} else if schema.required {
					errors
						.errors
						.push(FieldError {
							path,
							reason: "missing required parameter".to_string(),
						});
				}
				// else: absent and optional, nothing inserted.
			},
		}
	}

	if errors.is_empty() { Ok(typed) } else { Err(errors) }
}

fn prefix(mut e: ValidationError, path: &str) -> ValidationError {
	for f in &mut e.errors {
		f.path = path.to_string();
	}
	e
}

/// Validates and type-coerces a single raw value against its schema. Public
/// so the schema self-consistency check (`ParameterSchema::check_self_consistent`)
/// can reuse it against a `default` value.
pub fn validate_typed(value: &RawValue, schema: &ParameterSchema) -> Result<RawValue, ValidationError> {
	use ParameterType::*;
	let err = |reason: String| ValidationError::single("", reason);

	match schema.r#type {
		String => {
			let s = value
				.as_str()
				.ok_or_else(|| err("expected a string".to_string()))?;
			check_string_constraints(s, schema)?;
			Ok(RawValue::String(s.to_string()))
		},
		Bool => {
			let b = value
				.as_bool()
				.ok_or_else(|| err("expected a bool".to_string()))?;
			Ok(RawValue::Bool(b))
		},
		Int => {
			let i = as_exact_i64(value).ok_or_else(|| err("expected an integer".to_string()))?;
			check_numeric_constraints(i as f64, schema)?;
			Ok(RawValue::from(i))
		},
		Float => {
			let f = value
				.as_f64()
				.ok_or_else(|| err("expected a number".to_string()))?;
			check_numeric_constraints(f, schema)?;
			Ok(RawValue::from(f))
		},
		Duration => {
			let d = match value {
				RawValue::String(s) => policy_core::duration::parse_duration(s).map_err(err)?,
				RawValue::Number(n) => {
					let secs = n
						.as_i64()
						.ok_or_else(|| err("duration seconds must be a whole number".to_string()))?;
					if secs < 0 {
						return Err(err("duration must not be negative".to_string()));
					}
					std::time::Duration::from_secs(secs as u64)
				},
				_ => return Err(err("expected a duration string or integer seconds".to_string())),
			};
			check_duration_constraints(d, schema)?;
			Ok(RawValue::String(policy_core::duration::format_duration(d)))
		},
		StringArray => {
			let arr = value
				.as_array()
				.ok_or_else(|| err("expected an array".to_string()))?;
			let mut out = Vec::with_capacity(arr.len());
			for item in arr {
				let s = item
					.as_str()
					.ok_or_else(|| err("array elements must all be strings".to_string()))?;
				out.push(RawValue::String(s.to_string()));
			}
			check_array_constraints(&out, schema)?;
			Ok(RawValue::Array(out))
		},
		IntArray => {
			let arr = value
				.as_array()
				.ok_or_else(|| err("expected an array".to_string()))?;
			let mut out = Vec::with_capacity(arr.len());
			for item in arr {
				let i = as_exact_i64(item)
					.ok_or_else(|| err("array elements must all be integers".to_string()))?;
				out.push(RawValue::from(i));
			}
			check_array_constraints(&out, schema)?;
			Ok(RawValue::Array(out))
		},
		Map => {
			let obj = value
				.as_object()
				.ok_or_else(|| err("expected a map".to_string()))?;
			Ok(RawValue::Object(obj.clone()))
		},
		Uri => {
			let s = value
				.as_str()
				.ok_or_else(|| err("expected a string".to_string()))?;
			url::Url::parse(s).map_err(|e| err(format!("invalid URI: {e}")))?;
			check_string_constraints(s, schema)?;
			Ok(RawValue::String(s.to_string()))
		},
		Email => {
			let s = value
				.as_str()
				.ok_or_else(|| err("expected a string".to_string()))?;
			if !is_valid_email(s) {
				return Err(err(format!("{s:?} is not a valid email address")));
			}
			check_string_constraints(s, schema)?;
			Ok(RawValue::String(s.to_string()))
		},
		Hostname => {
			let s = value
				.as_str()
				.ok_or_else(|| err("expected a string".to_string()))?;
			if url::Host::parse(s).is_err() {
				return Err(err(format!("{s:?} is not a valid hostname")));
			}
			check_string_constraints(s, schema)?;
			Ok(RawValue::String(s.to_string()))
		},
		Ipv4 => {
			let s = value
				.as_str()
				.ok_or_else(|| err("expected a string".to_string()))?;
			s
				.parse::<std::net::Ipv4Addr>()
				.map_err(|e| err(format!("invalid IPv4 address: {e}")))?;
			check_string_constraints(s, schema)?;
			Ok(RawValue::String(s.to_string()))
		},
		Ipv6 => {
			let s = value
				.as_str()
				.ok_or_else(|| err("expected a string".to_string()))?;
			s
				.parse::<std::net::Ipv6Addr>()
				.map_err(|e| err(format!("invalid IPv6 address: {e}")))?;
			check_string_constraints(s, schema)?;
			Ok(RawValue::String(s.to_string()))
		},
		Uuid => {
			let s = value
				.as_str()
				.ok_or_else(|| err("expected a string".to_string()))?;
			uuid::Uuid::parse_str(s).map_err(|e| err(format!("invalid UUID: {e}")))?;
			check_string_constraints(s, schema)?;
			Ok(RawValue::String(s.to_string()))
		},
	}
}

fn as_exact_i64(value: &RawValue) -> Option<i64> {
	match value {
		RawValue::Number(n) => {
			if let Some(i) = n.as_i64() {
				Some(i)
			} else {
				// Reject floats with a fractional part, as well as overflowing values.
				let f = n.as_f64()?;
				if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
					Some(f as i64)
				} else {
					None
				}
			}
		},
		_ => None,
	}
}

fn check_string_constraints(s: &str, schema: &ParameterSchema) -> Result<(), ValidationError> {
	let v = &schema.validation;
	if let Some(min) = v.min_length
		&& s.chars().count() < min
	{
		return Err(ValidationError::single(
			"",
			format!("length {} is below minLength {min}", s.chars().count()),
		));
	}
	if let Some(max) = v.max_length
		&& s.chars().count() > max
	{
		return Err(ValidationError::single(
			"",
			format!("length {} exceeds maxLength {max}", s.chars().count()),
		));
	}
	if let Some(re) = &v.pattern
		&& !re.is_match(s)
	{
		return Err(ValidationError::single(
			"",
			format!("{s:?} does not match pattern {}", re.as_str()),
		));
	}
	if let Some(allowed) = &v.r#enum
		&& !allowed.iter().any(|a| a == s)
	{
		return Err(ValidationError::single(
			"",
			format!("{s:?} is not one of the allowed values {allowed:?}"),
		));
	}
	Ok(())
}

fn check_numeric_constraints(n: f64, schema: &ParameterSchema) -> Result<(), ValidationError> {
	let v = &schema.validation;
	if let Some(min) = v.min
		&& n < min
	{
		return Err(ValidationError::single("", format!("{n} is below min {min}")));
	}
	if let Some(max) = v.max
		&& n > max
	{
		return Err(ValidationError::single("", format!("{n} exceeds max {max}")));
	}
	if let Some(step) = v.multiple_of
		&& step != 0.0
		&& (n / step).fract().abs() > f64::EPSILON
	{
		return Err(ValidationError::single(
			"",
			format!("{n} is not a multiple of {step}"),
		));
	}
	Ok(())
}

fn check_array_constraints(arr: &[RawValue], schema: &ParameterSchema) -> Result<(), ValidationError> {
	let v = &schema.validation;
	if let Some(min) = v.min_items
		&& arr.len() < min
	{
		return Err(ValidationError::single(
			"",
			format!("array has {} items, below minItems {min}", arr.len()),
		));
	}
	if let Some(max) = v.max_items
		&& arr.len() > max
	{
		return Err(ValidationError::single(
			"",
			format!("array has {} items, exceeds maxItems {max}", arr.len()),
		));
	}
	if v.unique_items == Some(true) {
		let mut seen = std::collections::HashSet::new();
		for item in arr {
			if !seen.insert(item.to_string()) {
				return Err(ValidationError::single("", "array items must be unique".to_string()));
			}
		}
	}
	Ok(())
}

fn check_duration_constraints(
	d: std::time::Duration,
	schema: &ParameterSchema,
) -> Result<(), ValidationError> {
	let v = &schema.validation;
	if let Some(min) = v.min_duration
		&& d < min
	{
		return Err(ValidationError::single(
			"",
			format!(
				"{} is below minDuration {}",
				policy_core::duration::format_duration(d),
				policy_core::duration::format_duration(min)
			),
		));
	}
	if let Some(max) = v.max_duration
		&& d > max
	{
		return Err(ValidationError::single(
			"",
			format!(
				"{} exceeds maxDuration {}",
				policy_core::duration::format_duration(d),
				policy_core::duration::format_duration(max)
			),
		));
	}
	Ok(())
}

/// Deliberately conservative email check: one `@`, a non-empty local part, a
/// hostname-shaped domain. Good enough to reject obviously malformed input
/// without pulling in a dedicated mail-address-parsing dependency.
fn is_valid_email(s: &str) -> bool {
	let Some((local, domain)) = s.split_once('@') else {
		return false;
	};
	!local.is_empty() && !domain.is_empty() && url::Host::parse(domain).is_ok() && !s.contains(' ')
}
