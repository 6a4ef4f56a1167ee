//! In-process channel between isolated domains.
//!
//! A call crossing into another domain is either smuggled, meaning the
//! message value itself is handed over because every payload is plain data,
//! or encoded with the [`Serializer`] and decoded on the far side. Either
//! way the security principal stays behind and is put back on the reply,
//! and every failure on the way comes back as a fault reply.

use std::cell::Cell;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;
use remora_worker::TaskClass;
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use super::Channel;
use crate::call_context::{self, CallContextScope, LogicalCallContext};
use crate::context::Context;
use crate::domain::{Domain, DomainId};
use crate::error::{RemotingError, Result, panic_message};
use crate::message::{Message, ReturnMessage};
use crate::objref::{ChannelData, CrossDomainData};
use crate::serializer::{PostcardSerializer, Serializer};
use crate::sink::{MessageSink, SinkRef, deliver};

/// Registered name of the cross-domain channel.
pub const CHANNEL_NAME: &str = "xdomain";

const URL_PREFIX: &str = "xdomain://";

/// Builds the URL addressing `object_uri` in `domain`.
pub fn url_for(domain: DomainId, object_uri: &str) -> String {
	format!("{URL_PREFIX}{}/{}", domain.0, object_uri.trim_start_matches('/'))
}

fn parse_url(url: &str) -> Option<(DomainId, &str)> {
	let rest = url.strip_prefix(URL_PREFIX)?;
	let (domain, object_uri) = rest.split_once('/')?;
	let domain = domain.parse().ok()?;
	(!object_uri.is_empty()).then_some((DomainId(domain), object_uri))
}

thread_local! {
	static CROSS_DOMAIN_DISPATCH: Cell<bool> = const { Cell::new(false) };
}

/// Whether the calling thread is servicing a call that arrived from another domain.
pub fn in_cross_domain_dispatch() -> bool {
	CROSS_DOMAIN_DISPATCH.with(Cell::get)
}

struct DispatchFlag {
	previous: bool,
}

impl DispatchFlag {
	fn set() -> Self {
		Self {
			previous: CROSS_DOMAIN_DISPATCH.with(|flag| flag.replace(true)),
		}
	}
}

impl Drop for DispatchFlag {
	fn drop(&mut self) {
		CROSS_DOMAIN_DISPATCH.with(|flag| flag.set(self.previous));
	}
}

/// The channel every domain registers at creation.
#[derive(Debug, Default)]
pub struct CrossDomainChannel;

impl Channel for CrossDomainChannel {
	fn name(&self) -> &str {
		CHANNEL_NAME
	}

	fn priority(&self) -> i32 {
		100
	}

	fn parse(&self, url: &str) -> Option<(String, String)> {
		let (domain, object_uri) = parse_url(url)?;
		Some((format!("{URL_PREFIX}{}", domain.0), object_uri.to_string()))
	}

	fn create_message_sink(&self, url: Option<&str>, data: Option<&ChannelData>) -> Option<(SinkRef, String)> {
		if let Some(ChannelData::CrossDomain(target)) = data {
			if !target.is_local_process() {
				debug!(process = target.process_id, "remoting.xdomain.foreign_process");
				return None;
			}
			return Some((sink_for(target.domain_id), String::new()));
		}
		let (domain, object_uri) = parse_url(url?)?;
		Some((sink_for(domain), object_uri.to_string()))
	}

	fn channel_data(&self, context: &Context) -> Option<ChannelData> {
		Some(ChannelData::CrossDomain(CrossDomainData {
			context_id: context.id().0,
			domain_id: context.domain_id(),
			process_id: std::process::id(),
		}))
	}
}

static SINK_CACHE: LazyLock<Mutex<FxHashMap<DomainId, Arc<CrossDomainSink>>>> = LazyLock::new(Default::default);

/// Returns the shared sink for `domain`, creating it on first use.
pub fn sink_for(domain: DomainId) -> Arc<CrossDomainSink> {
	SINK_CACHE
		.lock()
		.entry(domain)
		.or_insert_with(|| Arc::new(CrossDomainSink::new(domain)))
		.clone()
}

/// Drops the cached sink for an unloaded domain.
pub(crate) fn domain_unloaded(domain: DomainId) {
	SINK_CACHE.lock().remove(&domain);
}

enum Envelope {
	Smuggled(Message),
	Serialized(Vec<u8>),
}

/// Sink that carries calls into one target domain.
pub struct CrossDomainSink {
	state: Arc<SinkState>,
}

struct SinkState {
	target: DomainId,
	serializer: PostcardSerializer,
	smuggled: AtomicU64,
	serialized: AtomicU64,
}

impl CrossDomainSink {
	fn new(target: DomainId) -> Self {
		Self {
			state: Arc::new(SinkState {
				target,
				serializer: PostcardSerializer,
				smuggled: AtomicU64::new(0),
				serialized: AtomicU64::new(0),
			}),
		}
	}

	pub fn target(&self) -> DomainId {
		self.state.target
	}

	/// Messages handed across without serialization, both directions.
	pub fn smuggled_count(&self) -> u64 {
		self.state.smuggled.load(Ordering::Relaxed)
	}

	/// Messages encoded with the serializer, both directions.
	pub fn serialized_count(&self) -> u64 {
		self.state.serialized.load(Ordering::Relaxed)
	}
}

impl SinkState {
	fn process(&self, mut msg: Message) -> Message {
		let principal = msg.call_context_mut().take_principal();
		let uri = msg.uri().to_string();
		let method = msg.method_name().to_string();

		let outcome = catch_unwind(AssertUnwindSafe(|| self.transit(msg)));
		let mut reply = match outcome {
			Ok(Ok(reply)) => reply,
			Ok(Err(err)) => Message::Return(ReturnMessage::fault(uri, method, err)),
			Err(payload) => Message::Return(ReturnMessage::fault(uri, method, RemotingError::Panicked(panic_message(payload)))),
		};
		reply.call_context_mut().set_principal(principal);
		reply
	}

	fn transit(&self, mut msg: Message) -> Result<Message> {
		msg.set_target(None);
		let request = self.seal(msg)?;
		let domain = Domain::lookup(self.target).ok_or(RemotingError::DomainUnavailable(self.target.0))?;

		let reply = {
			let _cleared = CallContextScope::enter(LogicalCallContext::default());
			domain.execute_in(|| self.dispatch_remote(&domain, request))??
		};
		self.open(reply)
	}

	fn dispatch_remote(&self, domain: &Domain, request: Envelope) -> Result<Envelope> {
		let msg = self.open(request)?;
		trace!(domain = %domain.id(), uri = msg.uri(), "remoting.xdomain.dispatch");
		let reply = {
			let _flag = DispatchFlag::set();
			domain.router().sync_dispatch_message(msg)
		};
		self.seal(reply)
	}

	fn seal(&self, msg: Message) -> Result<Envelope> {
		if msg.is_smuggleable() {
			self.smuggled.fetch_add(1, Ordering::Relaxed);
			return Ok(Envelope::Smuggled(msg));
		}
		self.serialized.fetch_add(1, Ordering::Relaxed);
		Ok(Envelope::Serialized(self.serializer.serialize(&msg)?))
	}

	fn open(&self, envelope: Envelope) -> Result<Message> {
		match envelope {
			Envelope::Smuggled(msg) => Ok(msg),
			Envelope::Serialized(bytes) => self.serializer.deserialize(&bytes),
		}
	}
}

impl MessageSink for CrossDomainSink {
	fn sync_process_message(&self, msg: Message) -> Message {
		self.state.process(msg)
	}

	fn async_process_message(&self, msg: Message, reply_sink: Option<SinkRef>) {
		let state = self.state.clone();
		let captured = call_context::current();
		remora_worker::spawn_blocking(TaskClass::CrossDomain, move || {
			let _scope = CallContextScope::enter(captured);
			let reply = state.process(msg);
			deliver(reply_sink.as_ref(), reply);
		});
	}
}
