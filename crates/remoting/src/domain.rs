//! Isolated execution domains within one process.
//!
//! Every domain owns its identity table, channel registry, well-known
//! registry and dispatch router. A thread is always "in" exactly one domain:
//! the one entered through [`Domain::execute_in`], or the default domain.

use std::cell::RefCell;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, LazyLock, OnceLock};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::channel::{ChannelServices, CrossDomainChannel, cross_domain};
use crate::config::{ConfigError, RemotingConfig, TypeCatalog};
use crate::context::{Context, ContextScope};
use crate::dispatch::DispatchRouter;
use crate::error::{RemotingError, Result, panic_message};
use crate::identity::IdentityTable;
use crate::well_known::WellKnownRegistry;

/// Process-unique domain identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DomainId(pub u32);

impl fmt::Display for DomainId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		self.0.fmt(f)
	}
}

static NEXT_DOMAIN_ID: AtomicU32 = AtomicU32::new(1);
static DOMAINS: LazyLock<RwLock<FxHashMap<DomainId, Arc<Domain>>>> = LazyLock::new(|| RwLock::new(FxHashMap::default()));
static DEFAULT_DOMAIN: OnceLock<Arc<Domain>> = OnceLock::new();

thread_local! {
	static CURRENT_DOMAIN: RefCell<Option<Arc<Domain>>> = const { RefCell::new(None) };
}

pub struct Domain {
	id: DomainId,
	guid: Uuid,
	name: String,
	config: RemotingConfig,
	default_context: Arc<Context>,
	identities: Arc<IdentityTable>,
	channels: ChannelServices,
	well_known: Arc<WellKnownRegistry>,
	router: DispatchRouter,
	unloaded: AtomicBool,
}

impl Domain {
	/// Creates a domain with default configuration.
	pub fn create(name: impl Into<String>) -> Arc<Domain> {
		Self::with_config(name, RemotingConfig::default())
	}

	/// Creates a domain and registers it with the process.
	///
	/// The cross-domain channel is registered automatically.
	pub fn with_config(name: impl Into<String>, config: RemotingConfig) -> Arc<Domain> {
		let id = DomainId(NEXT_DOMAIN_ID.fetch_add(1, Ordering::Relaxed));
		let guid = Uuid::new_v4();
		let name = name.into();

		let default_context = Context::new(id);
		default_context.freeze();
		let identities = Arc::new(IdentityTable::new(guid, config.application_name.clone(), config.sweep_interval));
		let well_known = Arc::new(WellKnownRegistry::new(identities.clone(), default_context.clone()));
		let router = DispatchRouter::new(id, identities.clone(), well_known.clone(), config.custom_errors);

		let domain = Arc::new(Domain {
			id,
			guid,
			name,
			config,
			default_context,
			identities,
			channels: ChannelServices::new(vec![Arc::new(CrossDomainChannel)]),
			well_known,
			router,
			unloaded: AtomicBool::new(false),
		});
		DOMAINS.write().insert(id, domain.clone());
		info!(domain = %id, name = %domain.name, "remoting.domain.created");
		domain
	}

	/// The domain threads belong to until they enter another.
	pub fn default_domain() -> Arc<Domain> {
		DEFAULT_DOMAIN.get_or_init(|| Self::create("default")).clone()
	}

	/// The domain the calling thread is executing in.
	pub fn current() -> Arc<Domain> {
		CURRENT_DOMAIN
			.with(|current| current.borrow().clone())
			.unwrap_or_else(Self::default_domain)
	}

	pub fn lookup(id: DomainId) -> Option<Arc<Domain>> {
		DOMAINS.read().get(&id).cloned()
	}

	pub fn id(&self) -> DomainId {
		self.id
	}

	pub fn guid(&self) -> Uuid {
		self.guid
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn config(&self) -> &RemotingConfig {
		&self.config
	}

	pub fn default_context(&self) -> &Arc<Context> {
		&self.default_context
	}

	pub fn identities(&self) -> &Arc<IdentityTable> {
		&self.identities
	}

	pub fn channels(&self) -> &ChannelServices {
		&self.channels
	}

	pub fn well_known(&self) -> &WellKnownRegistry {
		&self.well_known
	}

	pub fn router(&self) -> &DispatchRouter {
		&self.router
	}

	pub fn is_unloaded(&self) -> bool {
		self.unloaded.load(Ordering::Acquire)
	}

	/// Creates a new, unfrozen context in this domain.
	pub fn new_context(&self) -> Arc<Context> {
		Context::new(self.id)
	}

	/// Runs `f` with this domain (and its default context) current on the
	/// calling thread.
	pub fn execute_in<R>(self: &Arc<Self>, f: impl FnOnce() -> R) -> Result<R> {
		if self.is_unloaded() {
			return Err(RemotingError::DomainUnavailable(self.id.0));
		}
		let _scope = DomainScope::enter(self.clone());
		Ok(f())
	}

	/// Runs `f(args)` in `target`, passing arguments and result by value
	/// through the serializer when the target is another domain.
	pub fn do_callback<A, R>(target: DomainId, args: A, f: fn(A) -> R) -> Result<R>
	where
		A: Serialize + DeserializeOwned,
		R: Serialize + DeserializeOwned,
	{
		if Self::current().id == target {
			return Ok(f(args));
		}
		let domain = Self::lookup(target).ok_or(RemotingError::DomainUnavailable(target.0))?;
		let request = postcard::to_allocvec(&args)?;
		let response = domain.execute_in(move || -> Result<Vec<u8>> {
			let args: A = postcard::from_bytes(&request)?;
			let result = catch_unwind(AssertUnwindSafe(|| f(args))).map_err(|payload| RemotingError::Panicked(panic_message(payload)))?;
			Ok(postcard::to_allocvec(&result)?)
		})??;
		Ok(postcard::from_bytes(&response)?)
	}

	/// Applies the configured well-known entries using factories from `catalog`.
	pub fn apply_config(&self, catalog: &TypeCatalog) -> std::result::Result<(), ConfigError> {
		for entry in &self.config.well_known {
			let factory = catalog.get(&entry.type_name).ok_or_else(|| ConfigError::UnknownType(entry.type_name.clone()))?;
			self.well_known.register(&entry.uri, &entry.type_name, entry.mode, factory)?;
		}
		Ok(())
	}

	/// Removes the domain from the process.
	///
	/// Cached sinks into it are dropped and every domain forgets its client
	/// identities, since any of them may point here.
	pub fn unload(&self) {
		if self.unloaded.swap(true, Ordering::AcqRel) {
			return;
		}
		DOMAINS.write().remove(&self.id);
		cross_domain::domain_unloaded(self.id);
		let survivors: Vec<Arc<Domain>> = DOMAINS.read().values().cloned().collect();
		for domain in survivors {
			domain.identities.flush_client_identities();
		}
		info!(domain = %self.id, name = %self.name, "remoting.domain.unloaded");
	}
}

impl fmt::Debug for Domain {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Domain")
			.field("id", &self.id)
			.field("name", &self.name)
			.field("unloaded", &self.is_unloaded())
			.finish()
	}
}

/// Makes a domain and its default context current for the guard's lifetime.
#[must_use = "the previous domain is restored when the scope is dropped"]
pub struct DomainScope {
	previous: Option<Arc<Domain>>,
	_context: ContextScope,
}

impl DomainScope {
	pub fn enter(domain: Arc<Domain>) -> Self {
		let context = ContextScope::enter(domain.default_context.clone());
		let previous = CURRENT_DOMAIN.with(|current| current.replace(Some(domain)));
		Self {
			previous,
			_context: context,
		}
	}
}

impl Drop for DomainScope {
	fn drop(&mut self) {
		let previous = self.previous.take();
		CURRENT_DOMAIN.with(|current| {
			current.replace(previous);
		});
	}
}
