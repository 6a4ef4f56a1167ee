//! Channels and the per-domain channel registry.
//!
//! A channel turns a target description (a URL or channel data from an
//! [`ObjRef`](crate::objref::ObjRef)) into a message sink. Transports live
//! outside this crate; the only built-in channel is the in-process
//! [`CrossDomainChannel`].

mod cross_context;
pub mod cross_domain;

use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::info;

pub use self::cross_context::CrossContextSink;
pub use self::cross_domain::{CrossDomainChannel, CrossDomainSink};
use crate::context::Context;
use crate::error::{RemotingError, Result};
use crate::objref::ChannelData;
use crate::sink::SinkRef;

/// A transport that can reach objects described by URLs or channel data.
pub trait Channel: Send + Sync {
	fn name(&self) -> &str;

	/// Higher priorities are asked first.
	fn priority(&self) -> i32 {
		0
	}

	/// Splits `url` into channel URI and object URI if this channel owns it.
	fn parse(&self, url: &str) -> Option<(String, String)>;

	/// Creates a sink for the target, returning it with the object URI.
	///
	/// Exactly one of `url` and `data` is set. Channels return `None` for
	/// targets they cannot reach.
	fn create_message_sink(&self, url: Option<&str>, data: Option<&ChannelData>) -> Option<(SinkRef, String)>;

	/// Data describing how to reach objects hosted in `context` through this channel.
	fn channel_data(&self, _context: &Context) -> Option<ChannelData> {
		None
	}
}

/// Registered channels of one domain, ordered by priority.
///
/// Readers take a lock-free snapshot; writers serialize on a mutex and
/// publish a new list.
pub struct ChannelServices {
	channels: ArcSwap<Vec<Arc<dyn Channel>>>,
	write: Mutex<()>,
}

impl ChannelServices {
	pub(crate) fn new(initial: Vec<Arc<dyn Channel>>) -> Self {
		let mut initial = initial;
		initial.sort_by_key(|c| std::cmp::Reverse(c.priority()));
		Self {
			channels: ArcSwap::from_pointee(initial),
			write: Mutex::new(()),
		}
	}

	pub fn register_channel(&self, channel: Arc<dyn Channel>) -> Result<()> {
		if channel.name().is_empty() {
			return Err(RemotingError::NullArgument("channel name".into()));
		}
		let _write = self.write.lock();
		let current = self.channels.load_full();
		if current.iter().any(|c| c.name().eq_ignore_ascii_case(channel.name())) {
			return Err(RemotingError::DuplicateChannel(channel.name().to_string()));
		}
		info!(channel = channel.name(), priority = channel.priority(), "remoting.channel.registered");
		let mut next = current.as_ref().clone();
		next.push(channel);
		next.sort_by_key(|c| std::cmp::Reverse(c.priority()));
		self.channels.store(Arc::new(next));
		Ok(())
	}

	pub fn unregister_channel(&self, name: &str) -> Result<Arc<dyn Channel>> {
		if name.is_empty() {
			return Err(RemotingError::NullArgument("channel name".into()));
		}
		let _write = self.write.lock();
		let current = self.channels.load_full();
		let index = current
			.iter()
			.position(|c| c.name().eq_ignore_ascii_case(name))
			.ok_or_else(|| RemotingError::ChannelNotFound(name.to_string()))?;
		let mut next = current.as_ref().clone();
		let removed = next.remove(index);
		self.channels.store(Arc::new(next));
		info!(channel = name, "remoting.channel.unregistered");
		Ok(removed)
	}

	pub fn get_channel(&self, name: &str) -> Option<Arc<dyn Channel>> {
		self.channels.load().iter().find(|c| c.name().eq_ignore_ascii_case(name)).cloned()
	}

	/// Snapshot of registered channels in priority order.
	pub fn registered_channels(&self) -> Arc<Vec<Arc<dyn Channel>>> {
		self.channels.load_full()
	}

	/// Channel data every registered channel publishes for `context`.
	pub fn channel_data(&self, context: &Context) -> Vec<ChannelData> {
		self.channels.load().iter().filter_map(|c| c.channel_data(context)).collect()
	}

	/// Channel data for the calling thread's current context.
	pub fn current_channel_data(&self) -> Vec<ChannelData> {
		self.channel_data(&Context::current())
	}

	/// Asks channels in priority order for a sink to the target; the first
	/// that accepts wins.
	pub fn create_message_sink(&self, url: Option<&str>, data: &[ChannelData]) -> Option<(SinkRef, String)> {
		let channels = self.channels.load();
		for channel in channels.iter() {
			if let Some(url) = url
				&& let Some(found) = channel.create_message_sink(Some(url), None)
			{
				return Some(found);
			}
			for item in data {
				if let Some(found) = channel.create_message_sink(None, Some(item)) {
					return Some(found);
				}
			}
		}
		None
	}
}
