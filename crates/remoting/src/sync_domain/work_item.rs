use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::call_context::{self, CallContextScope, LogicalCallContext, LogicalCallId};
use crate::error::{RemotingError, panic_message};
use crate::message::{Message, ReturnMessage};
use crate::sink::SinkRef;

bitflags::bitflags! {
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
	pub(crate) struct WorkItemFlags: u8 {
		/// Queued behind the current holder.
		const WAITING = 1 << 0;
		/// Granted the domain.
		const SIGNALED = 1 << 1;
		/// Reply goes to a reply sink; nobody blocks on this item.
		const ASYNC = 1 << 2;
		/// Placeholder used by a thread re-entering after a call-out.
		const DUMMY = 1 << 3;
	}
}

struct ItemState {
	flags: WorkItemFlags,
	request: Option<Message>,
	reply: Option<Message>,
}

/// One call waiting for or holding a synchronization domain.
///
/// Its monitor is separate from the domain's queue lock so a blocked caller
/// never sleeps while holding the queue.
pub(crate) struct WorkItem {
	monitor: Mutex<ItemState>,
	signal: Condvar,
	next: Option<SinkRef>,
	reply_sink: Option<SinkRef>,
	call_id: Option<LogicalCallId>,
	call_context: LogicalCallContext,
}

impl WorkItem {
	pub(crate) fn sync(request: Message, next: SinkRef) -> Arc<Self> {
		Self::new(Some(request), Some(next), None, WorkItemFlags::empty())
	}

	pub(crate) fn asynchronous(request: Message, next: SinkRef, reply_sink: Option<SinkRef>) -> Arc<Self> {
		Self::new(Some(request), Some(next), reply_sink, WorkItemFlags::ASYNC)
	}

	pub(crate) fn dummy() -> Arc<Self> {
		Self::new(None, None, None, WorkItemFlags::DUMMY)
	}

	fn new(request: Option<Message>, next: Option<SinkRef>, reply_sink: Option<SinkRef>, flags: WorkItemFlags) -> Arc<Self> {
		let call_id = request.as_ref().and_then(|msg| msg.call_context().call_id());
		Arc::new(Self {
			monitor: Mutex::new(ItemState {
				flags,
				request,
				reply: None,
			}),
			signal: Condvar::new(),
			next,
			reply_sink,
			call_id,
			call_context: call_context::current(),
		})
	}

	pub(crate) fn call_id(&self) -> Option<LogicalCallId> {
		self.call_id
	}

	pub(crate) fn flags(&self) -> WorkItemFlags {
		self.monitor.lock().flags
	}

	pub(crate) fn set_flags(&self, flags: WorkItemFlags) {
		self.monitor.lock().flags |= flags;
	}

	pub(crate) fn is_async(&self) -> bool {
		self.flags().contains(WorkItemFlags::ASYNC)
	}

	pub(crate) fn is_dummy(&self) -> bool {
		self.flags().contains(WorkItemFlags::DUMMY)
	}

	/// Grants the domain to this item and wakes its waiter, if any.
	pub(crate) fn signal(&self) {
		let mut state = self.monitor.lock();
		state.flags |= WorkItemFlags::SIGNALED;
		self.signal.notify_all();
	}

	/// Blocks until [`signal`](Self::signal) has been called.
	pub(crate) fn wait_signaled(&self) {
		let mut state = self.monitor.lock();
		while !state.flags.contains(WorkItemFlags::SIGNALED) {
			self.signal.wait(&mut state);
		}
	}

	/// Runs the request through the next sink.
	pub(crate) fn execute(&self) {
		let request = self.monitor.lock().request.take();
		let (Some(request), Some(next)) = (request, self.next.as_ref()) else {
			return;
		};
		let uri = request.uri().to_string();
		let method = request.method_name().to_string();

		if self.is_async() {
			let _scope = CallContextScope::enter(self.call_context.clone());
			let reply_sink = self.reply_sink.clone();
			if let Err(payload) = catch_unwind(AssertUnwindSafe(|| next.async_process_message(request, reply_sink))) {
				tracing::error!(uri, reason = %panic_message(payload), "remoting.sync.async_item_panicked");
			}
			return;
		}

		let reply = catch_unwind(AssertUnwindSafe(|| next.sync_process_message(request)))
			.unwrap_or_else(|payload| Message::Return(ReturnMessage::fault(uri, method, RemotingError::Panicked(panic_message(payload)))));
		self.monitor.lock().reply = Some(reply);
	}

	pub(crate) fn take_reply(&self) -> Option<Message> {
		self.monitor.lock().reply.take()
	}
}
