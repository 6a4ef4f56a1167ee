//! Logical call context: ambient per-call data that flows with a call.
//!
//! Every thread has a current [`LogicalCallContext`]. A proxy copies it into
//! each outgoing message and the server object terminator installs the
//! message's copy on the executing thread for the duration of the call.
//! The security principal is carried in-process only and is never
//! serialized.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::value::Value;

/// Identifier tying together all hops of one logical call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogicalCallId(Uuid);

impl LogicalCallId {
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}
}

impl Default for LogicalCallId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for LogicalCallId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		self.0.fmt(f)
	}
}

/// Security principal attached to the calling thread.
pub trait Principal: Send + Sync + fmt::Debug {
	fn name(&self) -> &str;
}

/// Ambient data that accompanies a call across chains and domains.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogicalCallContext {
	data: BTreeMap<String, Value>,
	call_id: Option<LogicalCallId>,
	#[serde(skip)]
	principal: Option<Arc<dyn Principal>>,
}

impl LogicalCallContext {
	pub fn get_data(&self, key: &str) -> Option<&Value> {
		self.data.get(key)
	}

	pub fn set_data(&mut self, key: impl Into<String>, value: impl Into<Value>) {
		self.data.insert(key.into(), value.into());
	}

	pub fn remove_data(&mut self, key: &str) -> Option<Value> {
		self.data.remove(key)
	}

	pub fn data(&self) -> &BTreeMap<String, Value> {
		&self.data
	}

	pub fn call_id(&self) -> Option<LogicalCallId> {
		self.call_id
	}

	pub fn set_call_id(&mut self, id: Option<LogicalCallId>) {
		self.call_id = id;
	}

	pub fn principal(&self) -> Option<&Arc<dyn Principal>> {
		self.principal.as_ref()
	}

	pub fn set_principal(&mut self, principal: Option<Arc<dyn Principal>>) {
		self.principal = principal;
	}

	/// Removes and returns the principal.
	pub fn take_principal(&mut self) -> Option<Arc<dyn Principal>> {
		self.principal.take()
	}

	pub(crate) fn is_smuggleable(&self) -> bool {
		self.data.values().all(Value::is_smuggleable)
	}
}

thread_local! {
	static CURRENT: RefCell<LogicalCallContext> = RefCell::new(LogicalCallContext::default());
}

/// Returns a copy of the calling thread's context.
pub fn current() -> LogicalCallContext {
	CURRENT.with(|ctx| ctx.borrow().clone())
}

/// Installs `ctx` on the calling thread and returns the previous context.
pub fn replace(ctx: LogicalCallContext) -> LogicalCallContext {
	CURRENT.with(|cell| cell.replace(ctx))
}

/// Runs `f` against the calling thread's context.
///
/// `f` must not read or replace the thread context itself.
pub fn with_current<R>(f: impl FnOnce(&mut LogicalCallContext) -> R) -> R {
	CURRENT.with(|ctx| f(&mut ctx.borrow_mut()))
}

/// Installs a context for the lifetime of the guard, restoring the previous
/// one on drop.
#[must_use = "the previous context is restored when the scope is dropped"]
pub struct CallContextScope {
	previous: Option<LogicalCallContext>,
}

impl CallContextScope {
	pub fn enter(ctx: LogicalCallContext) -> Self {
		Self {
			previous: Some(replace(ctx)),
		}
	}
}

impl Drop for CallContextScope {
	fn drop(&mut self) {
		if let Some(previous) = self.previous.take() {
			replace(previous);
		}
	}
}
