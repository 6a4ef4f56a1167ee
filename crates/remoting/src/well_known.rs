//! Statically registered server objects, activated on first use.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::context::Context;
use crate::error::{RemotingError, Result};
use crate::identity::{IdOps, Identity, IdentityFlags, IdentityTable};
use crate::object::ObjectFactory;

/// How a well-known URI is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WellKnownMode {
	/// One instance serves every call.
	#[default]
	Singleton,
	/// Every call gets a fresh instance.
	SingleCall,
}

impl WellKnownMode {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Singleton => "singleton",
			Self::SingleCall => "single_call",
		}
	}
}

/// Produces server identities for URIs that are not yet in the table.
pub trait WellKnownActivator: Send + Sync {
	/// Returns `None` when `uri` is not a registered well-known URI.
	fn activate(&self, uri: &str) -> Result<Option<Arc<Identity>>>;
}

/// Public view of one registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WellKnownEntry {
	pub uri: String,
	pub type_name: String,
	pub mode: WellKnownMode,
}

struct Registration {
	entry: WellKnownEntry,
	factory: ObjectFactory,
	activation: Mutex<()>,
}

/// Per-domain registry of well-known URIs.
pub struct WellKnownRegistry {
	entries: RwLock<FxHashMap<String, Arc<Registration>>>,
	identities: Arc<IdentityTable>,
	context: Arc<Context>,
}

impl WellKnownRegistry {
	pub(crate) fn new(identities: Arc<IdentityTable>, context: Arc<Context>) -> Self {
		Self {
			entries: RwLock::new(FxHashMap::default()),
			identities,
			context,
		}
	}

	/// Registers `uri`. The object is created on the first call that targets it.
	pub fn register(&self, uri: &str, type_name: &str, mode: WellKnownMode, factory: ObjectFactory) -> Result<()> {
		if uri.is_empty() {
			return Err(RemotingError::NullArgument("uri".into()));
		}
		let key = self.identities.make_key(uri);
		let mut entries = self.entries.write();
		if entries.contains_key(&key) {
			return Err(RemotingError::UriClash(uri.to_string()));
		}
		entries.insert(
			key,
			Arc::new(Registration {
				entry: WellKnownEntry {
					uri: uri.to_string(),
					type_name: type_name.to_string(),
					mode,
				},
				factory,
				activation: Mutex::new(()),
			}),
		);
		info!(uri, type_name, mode = mode.as_str(), "remoting.well_known.registered");
		Ok(())
	}

	/// Removes the registration. An already activated object stays registered
	/// in the identity table until it is disconnected.
	pub fn unregister(&self, uri: &str) -> bool {
		let key = self.identities.make_key(uri);
		self.entries.write().remove(&key).is_some()
	}

	pub fn lookup(&self, uri: &str) -> Option<WellKnownEntry> {
		let key = self.identities.make_key(uri);
		self.entries.read().get(&key).map(|r| r.entry.clone())
	}

	pub fn entries(&self) -> Vec<WellKnownEntry> {
		let mut entries: Vec<_> = self.entries.read().values().map(|r| r.entry.clone()).collect();
		entries.sort_by(|a, b| a.uri.cmp(&b.uri));
		entries
	}

	/// Server type registered for `uri`.
	pub fn server_type_for_uri(&self, uri: &str) -> Option<String> {
		self.lookup(uri).map(|entry| entry.type_name)
	}
}

impl WellKnownActivator for WellKnownRegistry {
	fn activate(&self, uri: &str) -> Result<Option<Arc<Identity>>> {
		let key = self.identities.make_key(uri);
		let Some(registration) = self.entries.read().get(&key).cloned() else {
			return Ok(None);
		};

		let _activation = registration.activation.lock();
		if let Some(identity) = self.identities.resolve(uri)? {
			return Ok(Some(identity));
		}

		let object = (registration.factory)();
		let factory = match registration.entry.mode {
			WellKnownMode::Singleton => None,
			WellKnownMode::SingleCall => Some(registration.factory.clone()),
		};
		let identity = self.identities.find_or_create_server_identity_with(
			&object,
			&self.context,
			Some(&registration.entry.uri),
			IdOps::STRONG_IDENTITY,
			factory,
		)?;
		identity.set_flags(IdentityFlags::WELL_KNOWN);
		info!(
			uri = %registration.entry.uri,
			type_name = %registration.entry.type_name,
			mode = registration.entry.mode.as_str(),
			"remoting.well_known.activated"
		);
		Ok(Some(identity))
	}
}
