//! The typed parameter schema. A `PolicyDefinition` carries an ordered list
//! of these; the validator in `validator.rs` checks a raw, untyped parameter
//! bag against them at chain-compile time.

use serde::{Deserialize, Serialize};
use serde_json::Value as RawValue;

use crate::error::SchemaError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParameterType {
	String,
	Int,
	Float,
	Bool,
	Duration,
	StringArray,
	IntArray,
	Map,
	Uri,
	Email,
	Hostname,
	Ipv4,
	Ipv6,
	Uuid,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationRules {
	pub min_length: Option<usize>,
	pub max_length: Option<usize>,
	#[serde(default, with = "serde_regex_opt")]
	pub pattern: Option<regex::Regex>,
	pub r#enum: Option<Vec<String>>,

	pub min: Option<f64>,
	pub max: Option<f64>,
	pub multiple_of: Option<f64>,

	pub min_items: Option<usize>,
	pub max_items: Option<usize>,
	pub unique_items: Option<bool>,

	#[serde(default, with = "serde_duration_opt")]
	pub min_duration: Option<std::time::Duration>,
	#[serde(default, with = "serde_duration_opt")]
	pub max_duration: Option<std::time::Duration>,
}

mod serde_regex_opt {
	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(v: &Option<regex::Regex>, s: S) -> Result<S::Ok, S::Error> {
		match v {
			Some(r) => s.serialize_str(r.as_str()),
			None => s.serialize_none(),
		}
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<regex::Regex>, D::Error> {
		let raw = Option::<String>::deserialize(d)?;
		raw
			.map(|s| regex::Regex::new(&s).map_err(serde::de::Error::custom))
			.transpose()
	}
}

mod serde_duration_opt {
	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(
		v: &Option<std::time::Duration>,
		s: S,
	) -> Result<S::Ok, S::Error> {
		match v {
			Some(d) => s.serialize_str(&policy_core::duration::format_duration(*d)),
			None => s.serialize_none(),
		}
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(
		d: D,
	) -> Result<Option<std::time::Duration>, D::Error> {
		let raw = Option::<String>::deserialize(d)?;
		raw
			.map(|s| policy_core::duration::parse_duration(&s).map_err(serde::de::Error::custom))
			.transpose()
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSchema {
	pub name: String,
	pub r#type: ParameterType,
	#[serde(default)]
	pub required: bool,
	#[serde(default)]
	pub default: Option<RawValue>,
	#[serde(default)]
	pub validation: ValidationRules,
}

impl ParameterSchema {
	/// Checks that `default`, if present, satisfies this schema's own
	/// validation rules. Called when a `PolicyDefinition` is registered, not
	/// at config time — a violation here is an authoring bug in the policy,
	/// surfaced as `SchemaError`.
	pub fn check_self_consistent(&self) -> Result<(), SchemaError> {
		if let Some(default) = &self.default {
			crate::validator::validate_typed(default, self)
				.map_err(|e| SchemaError::new(self.name.clone(), e.to_string()))?;
		}
		if let (Some(min), Some(max)) = (self.validation.min, self.validation.max)
			&& min > max
		{
			return Err(SchemaError::new(
				self.name.clone(),
				format!("min ({min}) is greater than max ({max})"),
			));
		}
		Ok(())
	}
}
