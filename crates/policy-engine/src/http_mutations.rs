//! How a modification action is applied to a live context: `setHeaders`
//! replaces, `appendHeaders` adds, `removeHeaders` deletes by exact key, and
//! the query-parameter helpers fall back gracefully when the path doesn't
//! parse as a URL.

use url::Url;

use crate::action::{UpstreamRequestModifications, UpstreamResponseModifications};
use crate::context::{Body, RequestContext, ResponseContext};

const PLACEHOLDER_BASE: &str = "http://placeholder.invalid";

pub fn apply_request_modifications(ctx: &mut RequestContext, modifications: &UpstreamRequestModifications) {
	for (k, v) in &modifications.set_headers {
		ctx.headers.set(k, v.clone());
	}
	for k in &modifications.remove_headers {
		ctx.headers.remove(k);
	}
	for (k, values) in &modifications.append_headers {
		ctx.headers.append(k, values.iter().cloned());
	}
	if let Some(body) = &modifications.body {
		ctx.body = Some(Body {
			content: body.clone(),
			end_of_stream: true,
			present: true,
		});
	}
	if let Some(path) = &modifications.path {
		ctx.path = path.clone();
	}
	if !modifications.add_query_parameters.is_empty() {
		ctx.path = add_query_parameters(&ctx.path, &modifications.add_query_parameters);
	}
	if !modifications.remove_query_parameters.is_empty() {
		ctx.path = remove_query_parameters(&ctx.path, &modifications.remove_query_parameters);
	}
	if let Some(method) = &modifications.method {
		ctx.method = method.clone();
	}
}

pub fn apply_response_modifications(ctx: &mut ResponseContext, modifications: &UpstreamResponseModifications) {
	for (k, v) in &modifications.set_headers {
		ctx.response_headers.set(k, v.clone());
	}
	for k in &modifications.remove_headers {
		ctx.response_headers.remove(k);
	}
	for (k, values) in &modifications.append_headers {
		ctx.response_headers.append(k, values.iter().cloned());
	}
	if let Some(body) = &modifications.body {
		ctx.response_body = Some(Body {
			content: body.clone(),
			end_of_stream: true,
			present: true,
		});
	}
	if let Some(status) = modifications.status_code {
		ctx.response_status = status;
	}
}

/// Re-parses `path` as a URL against a throwaway base so relative paths
/// parse too, adds each key/value pair (a key may repeat), and
/// re-serializes. On parse failure, falls back to string concatenation:
/// appends `?` or `&` as appropriate with percent-encoded keys and values.
fn add_query_parameters(path: &str, additions: &std::collections::BTreeMap<String, Vec<String>>) -> String {
	match Url::options().base_url(Some(&Url::parse(PLACEHOLDER_BASE).unwrap())).parse(path) {
		Ok(mut url) => {
			let mut pairs: Vec<(String, String)> = url
				.query_pairs()
				.map(|(k, v)| (k.into_owned(), v.into_owned()))
				.collect();
			for (k, values) in additions {
				for v in values {
					pairs.push((k.clone(), v.clone()));
				}
			}
			if pairs.is_empty() {
				url.set_query(None);
			} else {
				let mut serializer = url::form_urlencoded::Serializer::new(String::new());
				for (k, v) in &pairs {
					serializer.append_pair(k, v);
				}
				url.set_query(Some(&serializer.finish()));
			}
			strip_placeholder_base(&url)
		},
		Err(_) => {
			use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
			const FRAGMENT: &AsciiSet = &CONTROLS.add(b' ').add(b'"').add(b'<').add(b'>').add(b'`').add(b'&').add(b'=');
			let mut out = path.to_string();
			let mut first = !path.contains('?');
			for (k, values) in additions {
				for v in values {
					out.push(if first { '?' } else { '&' });
					first = false;
					out.push_str(&utf8_percent_encode(k, FRAGMENT).to_string());
					out.push('=');
					out.push_str(&utf8_percent_encode(v, FRAGMENT).to_string());
				}
			}
			out
		},
	}
}

/// Re-parses `path`, drops exact-match keys (case-sensitive), re-serializes.
/// On parse failure, returns the path unchanged — conservative, since we
/// cannot safely identify query boundaries in a string we can't parse.
fn remove_query_parameters(path: &str, removals: &[String]) -> String {
	match Url::options().base_url(Some(&Url::parse(PLACEHOLDER_BASE).unwrap())).parse(path) {
		Ok(mut url) => {
			let remaining: Vec<(String, String)> = url
				.query_pairs()
				.map(|(k, v)| (k.into_owned(), v.into_owned()))
				.filter(|(k, _)| !removals.iter().any(|r| r == k))
				.collect();
			if remaining.is_empty() {
				url.set_query(None);
			} else {
				let mut serializer = url::form_urlencoded::Serializer::new(String::new());
				for (k, v) in &remaining {
					serializer.append_pair(k, v);
				}
				url.set_query(Some(&serializer.finish()));
			}
			strip_placeholder_base(&url)
		},
		Err(_) => path.to_string(),
	}
}

fn strip_placeholder_base(url: &Url) -> String {
	let mut out = url.path().to_string();
	if let Some(query) = url.query() {
		out.push('?');
		out.push_str(query);
	}
	out
}
