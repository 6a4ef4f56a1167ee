//! Object identities and the table that maps URIs to them.
//!
//! An [`Identity`] is the addressable record of one remotable object. Server
//! identities additionally carry a [`ServerIdentity`] with the hosted object,
//! its context and its lazily built object chain. Client identities describe
//! objects reached through a channel and are held weakly by the table.

mod table;
pub mod uri;


use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, MutexGuard, RwLock};

pub use self::table::{DuplicatePolicy, IdOps, IdentityTable};
use crate::context::{Context, LazyChain};
use crate::error::Result;
use crate::object::{ObjectFactory, RemoteObject};
use crate::objref::ObjRef;
use crate::sink::{DynamicSink, SinkRef};
use crate::terminator::EnvoyTerminatorSink;

bitflags::bitflags! {
	/// Lifecycle flags of an identity.
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
	pub struct IdentityFlags: u32 {
		/// Registered in the identity table.
		const IN_TABLE = 1 << 0;
		/// Registered for a well-known URI.
		const WELL_KNOWN = 1 << 1;
		/// Still being populated by the thread that created it.
		const INITIALIZING = 1 << 2;
		/// Explicitly disconnected; dispatch must fail.
		const DISCONNECTED = 1 << 3;
	}
}

/// Addressable record of one remotable object.
pub struct Identity {
	uri: RwLock<Option<String>>,
	url: Option<String>,
	flags: AtomicU32,
	object_ref: Mutex<Option<ObjRef>>,
	channel_sink: OnceLock<SinkRef>,
	envoy_chain: OnceLock<SinkRef>,
	publish: Mutex<()>,
	server: Option<ServerIdentity>,
}

impl Identity {
	pub(crate) fn new_server(object: Arc<dyn RemoteObject>, context: Arc<Context>, factory: Option<ObjectFactory>) -> Self {
		Self::new(
			None,
			None,
			None,
			Some(ServerIdentity {
				object,
				context,
				factory,
				object_chain: LazyChain::default(),
				dynamic_sinks: RwLock::new(Vec::new()),
			}),
		)
	}

	pub(crate) fn new_client(uri: String, url: Option<String>, object_ref: Option<ObjRef>) -> Self {
		Self::new(Some(uri), url, object_ref, None)
	}

	fn new(uri: Option<String>, url: Option<String>, object_ref: Option<ObjRef>, server: Option<ServerIdentity>) -> Self {
		Self {
			uri: RwLock::new(uri),
			url,
			flags: AtomicU32::new(0),
			object_ref: Mutex::new(object_ref),
			channel_sink: OnceLock::new(),
			envoy_chain: OnceLock::new(),
			publish: Mutex::new(()),
			server,
		}
	}

	/// The object URI, once assigned.
	pub fn uri(&self) -> Option<String> {
		self.uri.read().clone()
	}

	pub(crate) fn set_uri(&self, uri: String) {
		*self.uri.write() = Some(uri);
	}

	pub(crate) fn reset_uri(&self) {
		*self.uri.write() = None;
	}

	/// Serializes URI assignment and registration of this identity.
	pub(crate) fn publish_guard(&self) -> MutexGuard<'_, ()> {
		self.publish.lock()
	}

	/// Full URL for identities reached through a well-known address.
	pub fn url(&self) -> Option<&str> {
		self.url.as_deref()
	}

	/// Key under which the identity is registered.
	pub(crate) fn lookup_key(&self) -> Option<String> {
		self.url.clone().or_else(|| self.uri())
	}

	pub fn flags(&self) -> IdentityFlags {
		IdentityFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
	}

	pub(crate) fn set_flags(&self, flags: IdentityFlags) {
		self.flags.fetch_or(flags.bits(), Ordering::AcqRel);
	}

	pub(crate) fn clear_flags(&self, flags: IdentityFlags) {
		self.flags.fetch_and(!flags.bits(), Ordering::AcqRel);
	}

	pub fn is_in_table(&self) -> bool {
		self.flags().contains(IdentityFlags::IN_TABLE)
	}

	pub fn is_well_known(&self) -> bool {
		self.flags().contains(IdentityFlags::WELL_KNOWN)
	}

	pub fn is_initializing(&self) -> bool {
		self.flags().contains(IdentityFlags::INITIALIZING)
	}

	pub fn is_disconnected(&self) -> bool {
		self.flags().contains(IdentityFlags::DISCONNECTED)
	}

	pub fn object_ref(&self) -> Option<ObjRef> {
		self.object_ref.lock().clone()
	}

	pub(crate) fn set_object_ref(&self, object_ref: ObjRef) {
		*self.object_ref.lock() = Some(object_ref);
	}

	pub fn channel_sink(&self) -> Option<SinkRef> {
		self.channel_sink.get().cloned()
	}

	/// Installs `sink` unless another thread got there first; returns the winner.
	pub(crate) fn race_set_channel_sink(&self, sink: SinkRef) -> SinkRef {
		let winner = self.channel_sink.get_or_init(|| sink).clone();
		self.finish_initializing();
		winner
	}

	/// The envoy chain a proxy sends its calls into.
	///
	/// Server identities build it from their context's envoy contributors;
	/// client identities use the bare envoy terminator.
	pub fn envoy_chain(&self) -> Result<SinkRef> {
		if let Some(chain) = self.envoy_chain.get() {
			return Ok(chain.clone());
		}
		let built: SinkRef = match &self.server {
			Some(server) => server.context.create_envoy_chain(&server.object)?,
			None => Arc::new(EnvoyTerminatorSink),
		};
		let winner = self.envoy_chain.get_or_init(|| built).clone();
		self.finish_initializing();
		Ok(winner)
	}

	fn finish_initializing(&self) {
		if self.channel_sink.get().is_some() && self.envoy_chain.get().is_some() {
			self.clear_flags(IdentityFlags::INITIALIZING);
		}
	}

	pub fn server(&self) -> Option<&ServerIdentity> {
		self.server.as_ref()
	}

	pub fn is_server(&self) -> bool {
		self.server.is_some()
	}

	/// Type name of the object behind this identity.
	pub fn type_name(&self) -> Option<String> {
		match &self.server {
			Some(server) => Some(server.object.type_descriptor().name().to_string()),
			None => self.object_ref().map(|r| r.type_name),
		}
	}
}

impl fmt::Debug for Identity {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Identity")
			.field("uri", &self.uri())
			.field("url", &self.url)
			.field("flags", &self.flags())
			.field("server", &self.server.as_ref().map(|s| s.object.type_descriptor().name()))
			.finish()
	}
}

/// Server-side state of an identity.
pub struct ServerIdentity {
	object: Arc<dyn RemoteObject>,
	context: Arc<Context>,
	factory: Option<ObjectFactory>,
	object_chain: LazyChain,
	dynamic_sinks: RwLock<Vec<Arc<dyn DynamicSink>>>,
}

impl ServerIdentity {
	pub fn object(&self) -> &Arc<dyn RemoteObject> {
		&self.object
	}

	/// Context hosting the object.
	pub fn context(&self) -> &Arc<Context> {
		&self.context
	}

	/// Whether every call is served by a fresh instance.
	pub fn is_single_call(&self) -> bool {
		self.factory.is_some()
	}

	/// Instance that serves the next call.
	pub(crate) fn instance_for_call(&self) -> Arc<dyn RemoteObject> {
		match &self.factory {
			Some(factory) => factory(),
			None => self.object.clone(),
		}
	}

	/// Server object chain, built on first use.
	pub fn object_chain(&self) -> Result<SinkRef> {
		self.object_chain.get_or_build(|| self.context.create_object_chain(&self.object))
	}

	pub fn add_dynamic_sink(&self, sink: Arc<dyn DynamicSink>) {
		self.dynamic_sinks.write().push(sink);
	}

	/// Removes the dynamic sink registered under `name`.
	pub fn remove_dynamic_sink(&self, name: &str) -> bool {
		let mut sinks = self.dynamic_sinks.write();
		let before = sinks.len();
		sinks.retain(|s| s.name() != name);
		sinks.len() != before
	}

	pub(crate) fn dynamic_sinks(&self) -> Vec<Arc<dyn DynamicSink>> {
		self.dynamic_sinks.read().clone()
	}
}
