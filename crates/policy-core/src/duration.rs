use std::time::Duration;

/// Parses a Go-style duration string (`"30s"`, `"5m"`, `"1h30m"`) or a bare
/// integer, which is treated as whole seconds.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
	if let Ok(secs) = raw.parse::<i64>() {
		return duration_from_secs(secs);
	}
	let nanos =
		go_parse_duration::parse_duration(raw).map_err(|e| format!("invalid duration: {e:?}"))?;
	duration_from_nanos(nanos)
}

fn duration_from_secs(secs: i64) -> Result<Duration, String> {
	if secs < 0 {
		return Err("duration must not be negative".to_string());
	}
	Ok(Duration::from_secs(secs as u64))
}

fn duration_from_nanos(nanos: i64) -> Result<Duration, String> {
	if nanos < 0 {
		return Err("duration must not be negative".to_string());
	}
	Ok(Duration::from_nanos(nanos as u64))
}

/// Renders a duration back in Go-style form for error messages and logs.
pub fn format_duration(d: Duration) -> String {
	durationfmt::to_string(d)
}
