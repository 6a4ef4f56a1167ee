//! URI normalization and generation.

use uuid::Uuid;

/// Normalizes `uri` into an identity table key.
///
/// Keys are lowercase with any leading `/` removed. A leading application
/// name or domain GUID segment is stripped so `/app/obj.rem`, `obj.rem` and
/// `OBJ.REM` all address the same identity.
pub fn make_key(uri: &str, application_name: Option<&str>, domain_guid: &Uuid) -> String {
	let mut key = uri.trim_start_matches('/').to_ascii_lowercase();
	if let Some(app) = application_name.filter(|app| !app.is_empty()) {
		key = strip_segment(key, &app.to_ascii_lowercase());
	}
	strip_segment(key, &domain_guid.to_string())
}

fn strip_segment(key: String, segment: &str) -> String {
	match key.strip_prefix(segment).and_then(|rest| rest.strip_prefix('/')) {
		Some(rest) if !rest.is_empty() => rest.to_string(),
		_ => key,
	}
}

/// Generates a fresh object URI scoped to the given domain.
pub fn generate(domain_guid: &Uuid, seq: u64) -> String {
	let unique = Uuid::new_v4().to_string().replace('-', "_");
	format!("/{domain_guid}/{unique}_{seq}.rem")
}

/// Returns the object URI part of a full URL: the text after the last `/`.
pub fn object_uri_from_full_uri(full_uri: &str) -> &str {
	match full_uri.rfind('/') {
		Some(index) => &full_uri[index + 1..],
		None => full_uri,
	}
}
