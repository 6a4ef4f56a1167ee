//! Synchronization domains: mutual exclusion for every object in a context.
//!
//! A [`SynchronizationProperty`] added to a context serializes all calls
//! entering it. At most one call executes inside the context at a time and
//! waiting calls are admitted in arrival order.
//!
//! In non-reentrant mode the domain stays held while its current call is
//! out calling elsewhere, but calls that belong to the same logical call
//! chain (a callback into the context) run without queueing. In reentrant
//! mode a call-out releases the domain and re-acquiring it on return queues
//! like any other arrival.

mod sinks;
mod work_item;


use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use remora_worker::TaskClass;
use rustc_hash::FxHashSet;
use tracing::{trace, warn};

use self::sinks::{SynchronizedClientContextSink, SynchronizedServerContextSink};
use self::work_item::{WorkItem, WorkItemFlags};
use crate::call_context::LogicalCallId;
use crate::context::{ContextProperty, ContributeClientContextSink, ContributeServerContextSink};
use crate::sink::SinkRef;

/// Name under which the property is registered on a context.
pub const SYNCHRONIZATION_PROPERTY: &str = "Synchronization";

/// Context property that turns its context into a synchronization domain.
pub struct SynchronizationProperty {
	domain: Arc<SyncDomain>,
}

impl SynchronizationProperty {
	pub fn new(reentrant: bool) -> Arc<Self> {
		Arc::new(Self {
			domain: Arc::new(SyncDomain::new(reentrant)),
		})
	}

	pub fn is_reentrant(&self) -> bool {
		self.domain.reentrant
	}

	/// Whether some call currently holds the domain.
	pub fn is_locked(&self) -> bool {
		self.domain.state.lock().locked
	}

	/// Number of calls waiting to be admitted.
	pub fn queue_len(&self) -> usize {
		self.domain.state.lock().queue.len()
	}
}

impl ContextProperty for SynchronizationProperty {
	fn name(&self) -> &str {
		SYNCHRONIZATION_PROPERTY
	}

	fn server_contributor(&self) -> Option<&dyn ContributeServerContextSink> {
		Some(self)
	}

	fn client_contributor(&self) -> Option<&dyn ContributeClientContextSink> {
		Some(self)
	}
}

impl ContributeServerContextSink for SynchronizationProperty {
	fn server_context_sink(&self, next: SinkRef) -> Option<SinkRef> {
		Some(Arc::new(SynchronizedServerContextSink::new(self.domain.clone(), next)))
	}
}

impl ContributeClientContextSink for SynchronizationProperty {
	fn client_context_sink(&self, next: SinkRef) -> Option<SinkRef> {
		Some(Arc::new(SynchronizedClientContextSink::new(self.domain.clone(), next)))
	}
}

#[derive(Default)]
struct SyncState {
	locked: bool,
	/// Waiting items. A non-empty queue implies `locked`.
	queue: VecDeque<Arc<WorkItem>>,
	/// Logical call id of the synchronous call-out in progress.
	sync_call_out: Option<LogicalCallId>,
	/// Logical call ids of asynchronous call-outs whose replies are pending.
	async_call_outs: FxHashSet<LogicalCallId>,
}

/// The scheduler shared by a property's server and client sinks.
pub(crate) struct SyncDomain {
	reentrant: bool,
	state: Mutex<SyncState>,
}

impl SyncDomain {
	fn new(reentrant: bool) -> Self {
		Self {
			reentrant,
			state: Mutex::new(SyncState::default()),
		}
	}

	pub(crate) fn is_reentrant(&self) -> bool {
		self.reentrant
	}

	/// Admits `item`, executing it now or once the domain is granted to it.
	///
	/// Synchronous items return only after they have executed. Asynchronous
	/// items return immediately and execute on a worker thread.
	pub(crate) fn handle_work_request(self: &Arc<Self>, item: &Arc<WorkItem>) {
		if self.is_nested_call(item) {
			trace!(call_id = ?item.call_id(), "remoting.sync.nested");
			item.set_flags(WorkItemFlags::SIGNALED);
			item.execute();
			return;
		}

		if item.is_async() {
			let wake = {
				let mut state = self.state.lock();
				item.set_flags(WorkItemFlags::WAITING);
				state.queue.push_back(item.clone());
				if !state.locked && state.queue.len() == 1 {
					item.signal();
					state.locked = true;
					true
				} else {
					false
				}
			};
			if wake {
				self.wake_async();
			}
			return;
		}

		let queued = {
			let mut state = self.state.lock();
			if !state.locked && state.queue.is_empty() {
				state.locked = true;
				false
			} else {
				item.set_flags(WorkItemFlags::WAITING);
				state.queue.push_back(item.clone());
				true
			}
		};

		if !queued {
			if !item.is_dummy() {
				item.signal();
				item.execute();
				self.handle_work_completion();
			}
			return;
		}

		trace!(queue_len = self.state.lock().queue.len(), "remoting.sync.waiting");
		item.wait_signaled();
		if item.is_dummy() {
			// Granted; drop the placeholder and keep holding the domain.
			self.state.lock().queue.pop_front();
		} else {
			self.dispatch_head();
		}
	}

	/// Releases the domain from the item that just finished.
	///
	/// The next waiter, if any, is granted the domain without it ever being
	/// unlocked, so a newcomer cannot overtake the queue.
	pub(crate) fn handle_work_completion(self: &Arc<Self>) {
		let next = {
			let mut state = self.state.lock();
			match state.queue.front() {
				Some(head) => {
					head.signal();
					Some(head.clone())
				}
				None => {
					state.locked = false;
					None
				}
			}
		};
		if let Some(head) = next
			&& head.is_async()
		{
			self.wake_async();
		}
	}

	/// Called before a reentrant domain's current call leaves the context.
	pub(crate) fn handle_thread_exit(self: &Arc<Self>) {
		self.handle_work_completion();
	}

	/// Called when a reentrant domain's call-out returns.
	pub(crate) fn handle_thread_re_entry(self: &Arc<Self>) {
		self.handle_work_request(&WorkItem::dummy());
	}

	/// Pops the granted head item and runs it.
	fn dispatch_head(self: &Arc<Self>) {
		let head = self.state.lock().queue.pop_front();
		if let Some(item) = head {
			item.execute();
			self.handle_work_completion();
		}
	}

	/// Runs the granted asynchronous head on a dedicated thread, never a pool thread.
	fn wake_async(self: &Arc<Self>) {
		let domain = self.clone();
		if let Err(error) = remora_worker::spawn_thread(TaskClass::DomainWake, move || domain.dispatch_head()) {
			warn!(%error, "remoting.sync.wake_inline");
			self.dispatch_head();
		}
	}

	fn is_nested_call(&self, item: &WorkItem) -> bool {
		if self.reentrant {
			return false;
		}
		let Some(id) = item.call_id() else {
			return false;
		};
		let state = self.state.lock();
		state.sync_call_out == Some(id) || state.async_call_outs.contains(&id)
	}

	/// Records `id` as the synchronous call-out unless one is already recorded.
	///
	/// Returns whether this call installed it and so must clear it.
	pub(crate) fn begin_sync_call_out(&self, id: LogicalCallId) -> bool {
		let mut state = self.state.lock();
		if state.sync_call_out.is_some() {
			return false;
		}
		state.sync_call_out = Some(id);
		true
	}

	pub(crate) fn end_sync_call_out(&self) {
		self.state.lock().sync_call_out = None;
	}

	pub(crate) fn add_async_call_out(&self, id: LogicalCallId) {
		self.state.lock().async_call_outs.insert(id);
	}

	pub(crate) fn remove_async_call_out(&self, id: LogicalCallId) {
		self.state.lock().async_call_outs.remove(&id);
	}
}
