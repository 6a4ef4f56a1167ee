//! Contexts: policy-carrying isolation units inside a domain.
//!
//! A context owns an ordered list of [`ContextProperty`] values. Once the
//! context is frozen, its properties are asked to wrap four kinds of chain.
//! Server context and server object chains visit properties in reverse
//! registration order, so the first property registered ends up outermost
//! and sees an incoming call first. Client context and envoy chains visit
//! them in registration order, so the last property registered sees an
//! outgoing call first.

mod chain;
mod property;


use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;

pub(crate) use self::chain::LazyChain;
use self::chain::{Contribution, build_chain};
pub use self::property::{ContextProperty, ContributeClientContextSink, ContributeEnvoySink, ContributeObjectSink, ContributeServerContextSink};
use crate::domain::{Domain, DomainId};
use crate::error::{RemotingError, Result};
use crate::object::RemoteObject;
use crate::sink::SinkRef;
use crate::terminator::{ClientContextTerminatorSink, EnvoyTerminatorSink, ServerContextTerminatorSink, ServerObjectTerminatorSink};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique context identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(pub u64);

impl fmt::Display for ContextId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		self.0.fmt(f)
	}
}

pub struct Context {
	id: ContextId,
	domain_id: DomainId,
	properties: RwLock<Vec<Arc<dyn ContextProperty>>>,
	frozen: AtomicBool,
	server_chain: LazyChain,
	client_chain: LazyChain,
}

impl Context {
	/// Creates an empty, unfrozen context in `domain_id`.
	pub(crate) fn new(domain_id: DomainId) -> Arc<Self> {
		Arc::new(Self {
			id: ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed)),
			domain_id,
			properties: RwLock::new(Vec::new()),
			frozen: AtomicBool::new(false),
			server_chain: LazyChain::default(),
			client_chain: LazyChain::default(),
		})
	}

	pub fn id(&self) -> ContextId {
		self.id
	}

	pub fn domain_id(&self) -> DomainId {
		self.domain_id
	}

	pub fn is_frozen(&self) -> bool {
		self.frozen.load(Ordering::Acquire)
	}

	/// Appends a property. Fails once the context is frozen or if the name is taken.
	pub fn add_property(&self, property: Arc<dyn ContextProperty>) -> Result<()> {
		if property.name().is_empty() {
			return Err(RemotingError::NullArgument("property name".into()));
		}
		let mut properties = self.properties.write();
		if self.is_frozen() {
			return Err(RemotingError::ContextFrozen);
		}
		if properties.iter().any(|p| p.name() == property.name()) {
			return Err(RemotingError::DuplicateProperty(property.name().to_string()));
		}
		properties.push(property);
		Ok(())
	}

	/// Freezes the property list. Repeated calls are no-ops.
	pub fn freeze(&self) {
		let properties = {
			let properties = self.properties.write();
			if self.frozen.swap(true, Ordering::AcqRel) {
				return;
			}
			properties.clone()
		};
		for property in &properties {
			property.freeze(self);
		}
		tracing::trace!(context = %self.id, properties = properties.len(), "remoting.context.frozen");
	}

	pub fn property(&self, name: &str) -> Option<Arc<dyn ContextProperty>> {
		self.properties.read().iter().find(|p| p.name() == name).cloned()
	}

	/// Properties in registration order.
	pub fn properties(&self) -> Vec<Arc<dyn ContextProperty>> {
		self.properties.read().clone()
	}

	fn frozen_properties(&self) -> Result<Vec<Arc<dyn ContextProperty>>> {
		if !self.is_frozen() {
			return Err(RemotingError::ContextNotFrozen);
		}
		Ok(self.properties())
	}

	/// Chain every call entering this context passes through.
	pub fn server_context_chain(&self) -> Result<SinkRef> {
		self.server_chain.get_or_build(|| {
			let properties = self.frozen_properties()?;
			build_chain(properties.iter().rev(), Arc::new(ServerContextTerminatorSink), |p, next| match p.server_contributor() {
				Some(c) => c.server_context_sink(next.clone()).into(),
				None => Contribution::NotOffered,
			})
		})
	}

	/// Chain every call leaving this context passes through.
	pub fn client_context_chain(&self) -> Result<SinkRef> {
		self.client_chain.get_or_build(|| {
			let properties = self.frozen_properties()?;
			build_chain(properties.iter(), Arc::new(ClientContextTerminatorSink), |p, next| match p.client_contributor() {
				Some(c) => c.client_context_sink(next.clone()).into(),
				None => Contribution::NotOffered,
			})
		})
	}

	/// Builds the per-object chain for `object`. Callers cache the result.
	pub fn create_object_chain(&self, object: &Arc<dyn RemoteObject>) -> Result<SinkRef> {
		let properties = self.frozen_properties()?;
		build_chain(properties.iter().rev(), Arc::new(ServerObjectTerminatorSink), |p, next| match p.object_contributor() {
			Some(c) => c.object_sink(object, next.clone()).into(),
			None => Contribution::NotOffered,
		})
	}

	/// Builds the envoy chain for proxies to `object`. Callers cache the result.
	pub fn create_envoy_chain(&self, object: &Arc<dyn RemoteObject>) -> Result<SinkRef> {
		let properties = self.frozen_properties()?;
		build_chain(properties.iter(), Arc::new(EnvoyTerminatorSink), |p, next| match p.envoy_contributor() {
			Some(c) => c.envoy_sink(object, next.clone()).into(),
			None => Contribution::NotOffered,
		})
	}

	/// The context the calling thread is executing in.
	///
	/// Falls back to the default context of the current domain.
	pub fn current() -> Arc<Context> {
		CURRENT_CONTEXT
			.with(|current| current.borrow().clone())
			.unwrap_or_else(|| Domain::current().default_context().clone())
	}

	/// Runs `f` inside this context, transitioning domains if needed.
	pub fn do_callback<R>(self: &Arc<Self>, f: impl FnOnce() -> R) -> Result<R> {
		let run = || {
			let _scope = ContextScope::enter(self.clone());
			f()
		};
		if Domain::current().id() == self.domain_id {
			return Ok(run());
		}
		let domain = Domain::lookup(self.domain_id).ok_or(RemotingError::DomainUnavailable(self.domain_id.0))?;
		domain.execute_in(run)
	}
}

impl fmt::Debug for Context {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let names: Vec<String> = self.properties.read().iter().map(|p| p.name().to_string()).collect();
		f.debug_struct("Context")
			.field("id", &self.id)
			.field("domain_id", &self.domain_id)
			.field("frozen", &self.is_frozen())
			.field("properties", &names)
			.finish()
	}
}

thread_local! {
	static CURRENT_CONTEXT: RefCell<Option<Arc<Context>>> = const { RefCell::new(None) };
}

/// Makes a context current for the lifetime of the guard.
#[must_use = "the previous context is restored when the scope is dropped"]
pub struct ContextScope {
	previous: Option<Arc<Context>>,
}

impl ContextScope {
	pub fn enter(context: Arc<Context>) -> Self {
		let previous = CURRENT_CONTEXT.with(|current| current.replace(Some(context)));
		Self { previous }
	}
}

impl Drop for ContextScope {
	fn drop(&mut self) {
		let previous = self.previous.take();
		CURRENT_CONTEXT.with(|current| {
			current.replace(previous);
		});
	}
}
