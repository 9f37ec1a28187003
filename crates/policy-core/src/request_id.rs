use crate::strng::Strng;

/// Mints a request id when the proxy doesn't supply one. Callers must not
/// assume these are globally unique across proxies that are misconfigured to
/// share identifiers; this only guarantees process-local uniqueness.
pub fn mint() -> Strng {
	Strng::from(uuid::Uuid::new_v4().to_string())
}
