//! Remotable objects and the metadata the dispatch router checks.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::error::{RemotingError, Result};
use crate::identity::Identity;
use crate::message::MethodCall;
use crate::sink::MessageSink;
use crate::value::Value;

/// An object whose methods can be invoked through proxies.
pub trait RemoteObject: Send + Sync + 'static {
	fn type_descriptor(&self) -> &TypeDescriptor;

	/// Invokes the method named by `call`.
	fn invoke(&self, call: &MethodCall) -> Result<MethodReturn>;

	/// Per-object slot binding the object to its identity.
	fn identity_slot(&self) -> &IdentitySlot;

	/// Exposes the object as a sink for raw message dispatch.
	fn as_message_sink(&self) -> Option<&dyn MessageSink> {
		None
	}
}

/// Shared constructor for server objects.
pub type ObjectFactory = Arc<dyn Fn() -> Arc<dyn RemoteObject> + Send + Sync>;

/// Whether a type is an ordinary server type or a domain object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TypeKind {
	#[default]
	Ordinary,
	/// An isolation-boundary object that the dispatch router refuses to service.
	DomainObject,
}

/// Remotely visible shape of a server type.
#[derive(Debug, Clone)]
pub struct TypeDescriptor {
	name: String,
	kind: TypeKind,
	methods: Vec<MethodDescriptor>,
}

impl TypeDescriptor {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			kind: TypeKind::Ordinary,
			methods: Vec::new(),
		}
	}

	pub fn domain_object(name: impl Into<String>) -> Self {
		Self {
			kind: TypeKind::DomainObject,
			..Self::new(name)
		}
	}

	pub fn with_method(mut self, method: MethodDescriptor) -> Self {
		self.methods.push(method);
		self
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn kind(&self) -> TypeKind {
		self.kind
	}

	pub fn method(&self, name: &str) -> Option<&MethodDescriptor> {
		self.methods.iter().find(|m| m.name == name)
	}

	pub fn methods(&self) -> &[MethodDescriptor] {
		&self.methods
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
	Public,
	NonPublic,
}

/// A generic type argument and whether it is visible outside its defining crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericArg {
	pub name: String,
	pub visible: bool,
}

/// Remotely visible shape of one method.
#[derive(Debug, Clone)]
pub struct MethodDescriptor {
	name: String,
	visibility: Visibility,
	is_static: bool,
	one_way: bool,
	generic_args: Vec<GenericArg>,
	allow_remote: bool,
}

impl MethodDescriptor {
	/// A public instance method.
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			visibility: Visibility::Public,
			is_static: false,
			one_way: false,
			generic_args: Vec::new(),
			allow_remote: false,
		}
	}

	pub fn non_public(mut self) -> Self {
		self.visibility = Visibility::NonPublic;
		self
	}

	pub fn static_method(mut self) -> Self {
		self.is_static = true;
		self
	}

	/// Marks the method as fire-and-forget.
	pub fn one_way(mut self) -> Self {
		self.one_way = true;
		self
	}

	pub fn generic_arg(mut self, name: impl Into<String>, visible: bool) -> Self {
		self.generic_args.push(GenericArg { name: name.into(), visible });
		self
	}

	/// Allow-lists the method regardless of its visibility.
	pub fn allow_remote(mut self) -> Self {
		self.allow_remote = true;
		self
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn is_one_way(&self) -> bool {
		self.one_way
	}

	/// Public, non-static, with every generic argument visible, or allow-listed.
	pub fn is_remotely_callable(&self) -> bool {
		if self.allow_remote {
			return true;
		}
		self.visibility == Visibility::Public && !self.is_static && self.generic_args.iter().all(|arg| arg.visible)
	}
}

/// Result of a successful method invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MethodReturn {
	pub value: Value,
	pub out_args: Vec<Value>,
}

impl MethodReturn {
	pub fn value(value: impl Into<Value>) -> Self {
		Self {
			value: value.into(),
			out_args: Vec::new(),
		}
	}

	pub fn void() -> Self {
		Self::default()
	}

	pub fn with_out_args(mut self, out_args: Vec<Value>) -> Self {
		self.out_args = out_args;
		self
	}
}

/// Weak association from an object to its server identity.
///
/// The identity owns the object, so the object only observes it.
#[derive(Default)]
pub struct IdentitySlot {
	state: Mutex<SlotState>,
}

#[derive(Default)]
struct SlotState {
	identity: Weak<Identity>,
	requested_uri: Option<String>,
}

impl IdentitySlot {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn get(&self) -> Option<Arc<Identity>> {
		self.state.lock().identity.upgrade()
	}

	/// Installs `candidate` unless a live identity is already present.
	/// Returns the identity that won.
	pub(crate) fn race_set(&self, candidate: &Arc<Identity>) -> Arc<Identity> {
		let mut state = self.state.lock();
		if let Some(existing) = state.identity.upgrade() {
			return existing;
		}
		state.identity = Arc::downgrade(candidate);
		candidate.clone()
	}

	/// Forgets `identity` if it is the one currently installed.
	pub(crate) fn clear_if(&self, identity: &Arc<Identity>) {
		let mut state = self.state.lock();
		if std::ptr::eq(state.identity.as_ptr(), Arc::as_ptr(identity)) {
			state.identity = Weak::new();
		}
	}

	pub(crate) fn requested_uri(&self) -> Option<String> {
		self.state.lock().requested_uri.clone()
	}

	/// Records the URI to use the next time the object is marshaled.
	pub(crate) fn set_requested_uri(&self, uri: &str) -> Result<()> {
		let mut state = self.state.lock();
		if let Some(existing) = state.identity.upgrade().and_then(|id| id.uri()) {
			return Err(RemotingError::UriAlreadyAssigned {
				existing,
				requested: uri.to_string(),
			});
		}
		state.requested_uri = Some(uri.to_string());
		Ok(())
	}
}

type Handler = Box<dyn Fn(&MethodCall) -> Result<MethodReturn> + Send + Sync>;

/// A [`RemoteObject`] assembled from closures.
pub struct DelegateObject {
	descriptor: TypeDescriptor,
	handlers: FxHashMap<String, Handler>,
	raw_sink: Option<Box<dyn MessageSink>>,
	slot: IdentitySlot,
}

impl DelegateObject {
	pub fn builder(type_name: impl Into<String>) -> DelegateObjectBuilder {
		DelegateObjectBuilder {
			descriptor: TypeDescriptor::new(type_name),
			handlers: FxHashMap::default(),
			raw_sink: None,
		}
	}
}

impl RemoteObject for DelegateObject {
	fn type_descriptor(&self) -> &TypeDescriptor {
		&self.descriptor
	}

	fn invoke(&self, call: &MethodCall) -> Result<MethodReturn> {
		let handler = self.handlers.get(&call.method_name).ok_or_else(|| RemotingError::MethodNotFound {
			type_name: self.descriptor.name.clone(),
			method: call.method_name.clone(),
		})?;
		handler(call)
	}

	fn identity_slot(&self) -> &IdentitySlot {
		&self.slot
	}

	fn as_message_sink(&self) -> Option<&dyn MessageSink> {
		self.raw_sink.as_deref()
	}
}

/// Builder for [`DelegateObject`].
pub struct DelegateObjectBuilder {
	descriptor: TypeDescriptor,
	handlers: FxHashMap<String, Handler>,
	raw_sink: Option<Box<dyn MessageSink>>,
}

impl DelegateObjectBuilder {
	/// Adds a method and its implementation.
	pub fn method<F>(mut self, method: MethodDescriptor, handler: F) -> Self
	where
		F: Fn(&MethodCall) -> Result<MethodReturn> + Send + Sync + 'static,
	{
		self.handlers.insert(method.name.clone(), Box::new(handler));
		self.descriptor.methods.push(method);
		self
	}

	pub fn domain_object(mut self) -> Self {
		self.descriptor.kind = TypeKind::DomainObject;
		self
	}

	/// Lets the object accept raw messages.
	pub fn raw_sink(mut self, sink: impl MessageSink + 'static) -> Self {
		self.raw_sink = Some(Box::new(sink));
		self
	}

	pub fn build(self) -> Arc<DelegateObject> {
		Arc::new(DelegateObject {
			descriptor: self.descriptor,
			handlers: self.handlers,
			raw_sink: self.raw_sink,
			slot: IdentitySlot::new(),
		})
	}
}
