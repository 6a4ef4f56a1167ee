use std::sync::Arc;

use parking_lot::Mutex;

use super::ContextProperty;
use crate::error::{RemotingError, Result};
use crate::sink::SinkRef;

/// What one property did when asked to wrap the chain built so far.
pub(super) enum Contribution {
	/// The property does not offer this capability.
	NotOffered,
	Sink(SinkRef),
	/// The property offers the capability but produced nothing.
	Missing,
}

impl From<Option<SinkRef>> for Contribution {
	fn from(sink: Option<SinkRef>) -> Self {
		sink.map_or(Self::Missing, Self::Sink)
	}
}

/// Folds `properties` around `terminator`, innermost first.
pub(super) fn build_chain<'a, I, F>(properties: I, terminator: SinkRef, mut contribute: F) -> Result<SinkRef>
where
	I: Iterator<Item = &'a Arc<dyn ContextProperty>>,
	F: FnMut(&dyn ContextProperty, &SinkRef) -> Contribution,
{
	properties.into_iter().try_fold(terminator, |next, property| match contribute(property.as_ref(), &next) {
		Contribution::NotOffered => Ok(next),
		Contribution::Sink(sink) => Ok(sink),
		Contribution::Missing => Err(RemotingError::BadContextProperty(property.name().to_string())),
	})
}

/// A chain built on first use and then shared.
///
/// Builders run outside the lock. When two threads race, the chain installed
/// first wins and the other is dropped without ever being handed out.
#[derive(Default)]
pub(crate) struct LazyChain {
	slot: Mutex<Option<SinkRef>>,
}

impl LazyChain {
	pub(crate) fn get(&self) -> Option<SinkRef> {
		self.slot.lock().clone()
	}

	pub(crate) fn get_or_build(&self, build: impl FnOnce() -> Result<SinkRef>) -> Result<SinkRef> {
		if let Some(chain) = self.get() {
			return Ok(chain);
		}
		let built = build()?;
		let mut slot = self.slot.lock();
		Ok(slot.get_or_insert(built).clone())
	}
}
