use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::{debug, trace};
use uuid::Uuid;

use super::{Identity, IdentityFlags, uri};
use crate::context::Context;
use crate::error::{RemotingError, Result};
use crate::object::{ObjectFactory, RemoteObject};
use crate::objref::ObjRef;

/// What to do when a different identity already occupies a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicatePolicy {
	/// Fail with [`RemotingError::UriClash`].
	Unique,
	/// Return the identity already registered.
	UseExisting,
}

bitflags::bitflags! {
	/// Options for [`IdentityTable::find_or_create_server_identity`].
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
	pub struct IdOps: u8 {
		/// Generate a URI when none was supplied.
		const GENERATE_URI = 1 << 0;
		/// Register the identity so the table keeps it alive.
		const STRONG_IDENTITY = 1 << 1;
		/// Leave the identity marked as initializing.
		const IS_INITIALIZING = 1 << 2;
	}
}

enum Slot {
	Strong(Arc<Identity>),
	Weak(Weak<Identity>),
}

impl Slot {
	fn upgrade(&self) -> Option<Arc<Identity>> {
		match self {
			Self::Strong(id) => Some(id.clone()),
			Self::Weak(id) => id.upgrade(),
		}
	}

	fn is_live(&self) -> bool {
		match self {
			Self::Strong(_) => true,
			Self::Weak(id) => id.strong_count() > 0,
		}
	}
}

#[derive(Default)]
struct TableInner {
	entries: FxHashMap<String, Slot>,
	insertions: usize,
}

/// Per-domain map from normalized URI to identity.
///
/// Server identities are held strongly. Client identities are held weakly
/// and swept once their proxies are gone. All mutation happens under the
/// write half of one lock; helpers that run while it is held take the
/// guarded state by `&mut` instead of locking again.
pub struct IdentityTable {
	inner: RwLock<TableInner>,
	application_name: Option<String>,
	domain_guid: Uuid,
	sweep_interval: usize,
	next_seq: AtomicU64,
}

impl IdentityTable {
	pub fn new(domain_guid: Uuid, application_name: Option<String>, sweep_interval: usize) -> Self {
		Self {
			inner: RwLock::new(TableInner::default()),
			application_name,
			domain_guid,
			sweep_interval: sweep_interval.max(1),
			next_seq: AtomicU64::new(1),
		}
	}

	/// Normalized table key for `uri`.
	pub fn make_key(&self, uri: &str) -> String {
		uri::make_key(uri, self.application_name.as_deref(), &self.domain_guid)
	}

	fn generate_uri(&self) -> String {
		uri::generate(&self.domain_guid, self.next_seq.fetch_add(1, Ordering::Relaxed))
	}

	/// Looks up the live identity registered for `uri`.
	pub fn resolve(&self, uri: &str) -> Result<Option<Arc<Identity>>> {
		if uri.is_empty() {
			return Err(RemotingError::NullArgument("uri".into()));
		}
		let key = self.make_key(uri);
		Ok(self.inner.read().entries.get(&key).and_then(Slot::upgrade))
	}

	/// Returns the object's server identity, creating and registering one if needed.
	pub fn find_or_create_server_identity(
		&self,
		object: &Arc<dyn RemoteObject>,
		context: &Arc<Context>,
		uri: Option<&str>,
		ops: IdOps,
	) -> Result<Arc<Identity>> {
		self.find_or_create_server_identity_with(object, context, uri, ops, None)
	}

	pub(crate) fn find_or_create_server_identity_with(
		&self,
		object: &Arc<dyn RemoteObject>,
		context: &Arc<Context>,
		uri: Option<&str>,
		ops: IdOps,
		factory: Option<ObjectFactory>,
	) -> Result<Arc<Identity>> {
		if uri.is_some_and(str::is_empty) {
			return Err(RemotingError::NullArgument("uri".into()));
		}
		let slot = object.identity_slot();

		loop {
			let (identity, fresh) = match slot.get() {
				Some(existing) => (existing, false),
				None => {
					let candidate = Arc::new(Identity::new_server(object.clone(), context.clone(), factory.clone()));
					if ops.contains(IdOps::IS_INITIALIZING) {
						candidate.set_flags(IdentityFlags::INITIALIZING);
					}
					let winner = slot.race_set(&candidate);
					let fresh = Arc::ptr_eq(&winner, &candidate);
					if !fresh {
						trace!("remoting.identity.lost_object_race");
					}
					(winner, fresh)
				}
			};

			// URI assignment and registration happen once per identity, under its publish lock.
			let _publishing = identity.publish_guard();
			if !slot.get().is_some_and(|current| Arc::ptr_eq(&current, &identity)) {
				// A failed publish released the slot; start over with a fresh identity.
				continue;
			}
			return self.publish(&identity, slot.requested_uri(), uri, ops, fresh).inspect_err(|_| {
				if fresh {
					slot.clear_if(&identity);
				}
			});
		}
	}

	/// Assigns a URI to `identity` and registers it. Caller holds the publish guard.
	fn publish(
		&self,
		identity: &Arc<Identity>,
		requested_for_marshal: Option<String>,
		uri: Option<&str>,
		ops: IdOps,
		fresh: bool,
	) -> Result<Arc<Identity>> {
		if let (Some(requested), Some(current)) = (uri, identity.uri())
			&& self.make_key(requested) != self.make_key(&current)
		{
			return Err(RemotingError::UriAlreadyAssigned {
				existing: current,
				requested: requested.to_string(),
			});
		}
		if !ops.contains(IdOps::STRONG_IDENTITY) || identity.is_in_table() {
			return Ok(identity.clone());
		}

		let assigned_here = identity.uri().is_none();
		if assigned_here {
			let assigned = match uri.map(str::to_string).or(requested_for_marshal) {
				Some(uri) => uri,
				None => self.generate_uri(),
			};
			identity.set_uri(assigned);
		}
		if let Err(err) = self.register(identity, DuplicatePolicy::Unique) {
			if assigned_here {
				identity.reset_uri();
			}
			return Err(err);
		}
		if !fresh {
			identity.clear_flags(IdentityFlags::DISCONNECTED);
			debug!(uri = ?identity.uri(), "remoting.identity.reconnected");
		}
		Ok(identity.clone())
	}

	/// Returns the client identity for `uri` (or `url`), creating it if absent.
	///
	/// Concurrent creators of the same key converge on one identity.
	pub fn find_or_create_identity(&self, uri: Option<&str>, url: Option<&str>, object_ref: Option<ObjRef>) -> Result<Arc<Identity>> {
		let object_uri = uri.or(url).filter(|u| !u.is_empty()).ok_or_else(|| RemotingError::NullArgument("uri".into()))?;
		let lookup = url.filter(|u| !u.is_empty()).unwrap_or(object_uri);

		if let Some(found) = self.resolve(lookup)? {
			if let Some(object_ref) = object_ref
				&& !found.is_server()
			{
				found.set_object_ref(object_ref);
			}
			return Ok(found);
		}

		let candidate = Arc::new(Identity::new_client(object_uri.to_string(), url.map(str::to_string), object_ref));
		candidate.set_flags(IdentityFlags::INITIALIZING);
		self.register(&candidate, DuplicatePolicy::UseExisting)
	}

	/// Registers `identity` under its URL or URI.
	pub fn register(&self, identity: &Arc<Identity>, policy: DuplicatePolicy) -> Result<Arc<Identity>> {
		let uri = identity.lookup_key().ok_or_else(|| RemotingError::NullArgument("uri".into()))?;
		let key = self.make_key(&uri);
		let mut inner = self.inner.write();
		self.set_identity(&mut inner, key, &uri, identity, policy)
	}

	fn set_identity(
		&self,
		inner: &mut TableInner,
		key: String,
		uri: &str,
		identity: &Arc<Identity>,
		policy: DuplicatePolicy,
	) -> Result<Arc<Identity>> {
		if let Some(existing) = inner.entries.get(&key).and_then(Slot::upgrade) {
			if Arc::ptr_eq(&existing, identity) {
				return Ok(existing);
			}
			return match policy {
				DuplicatePolicy::Unique => Err(RemotingError::UriClash(uri.to_string())),
				DuplicatePolicy::UseExisting => Ok(existing),
			};
		}

		let slot = if identity.is_server() {
			Slot::Strong(identity.clone())
		} else {
			Slot::Weak(Arc::downgrade(identity))
		};
		inner.entries.insert(key, slot);
		identity.set_flags(IdentityFlags::IN_TABLE);
		trace!(uri, "remoting.identity.registered");

		inner.insertions += 1;
		if inner.insertions % self.sweep_interval == 0 {
			Self::sweep(inner);
		}
		Ok(identity.clone())
	}

	/// Drops entries whose weak target is gone. Runs under the caller's write guard.
	fn sweep(inner: &mut TableInner) -> usize {
		let before = inner.entries.len();
		inner.entries.retain(|_, slot| slot.is_live());
		let removed = before - inner.entries.len();
		debug!(removed, remaining = inner.entries.len(), "remoting.identity.sweep");
		removed
	}

	/// Removes the entry for `uri`. Returns whether anything was removed.
	pub fn remove_identity(&self, uri: &str, reset_uri: bool) -> Result<bool> {
		if uri.is_empty() {
			return Err(RemotingError::NullArgument("uri".into()));
		}
		let key = self.make_key(uri);
		let removed = self.inner.write().entries.remove(&key);
		let Some(slot) = removed else {
			return Ok(false);
		};
		if let Some(identity) = slot.upgrade() {
			identity.clear_flags(IdentityFlags::IN_TABLE);
			if identity.is_server() {
				identity.set_flags(IdentityFlags::DISCONNECTED);
				if reset_uri {
					identity.reset_uri();
				}
			}
		}
		debug!(uri, "remoting.identity.removed");
		Ok(true)
	}

	/// Drops every client identity; server identities stay registered.
	pub fn flush_client_identities(&self) -> usize {
		let mut inner = self.inner.write();
		let before = inner.entries.len();
		inner.entries.retain(|_, slot| matches!(slot, Slot::Strong(_)));
		before - inner.entries.len()
	}

	/// Number of entries, including dead weak entries not yet swept.
	pub fn len(&self) -> usize {
		self.inner.read().entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Normalized keys currently present, sorted.
	pub fn keys(&self) -> Vec<String> {
		let mut keys: Vec<String> = self.inner.read().entries.keys().cloned().collect();
		keys.sort_unstable();
		keys
	}
}
