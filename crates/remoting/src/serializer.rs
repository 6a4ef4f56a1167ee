//! Message encoding used at domain boundaries.

use crate::error::Result;
use crate::message::Message;

/// Encodes messages that cannot be handed across a boundary as values.
pub trait Serializer: Send + Sync {
	fn serialize(&self, msg: &Message) -> Result<Vec<u8>>;
	fn deserialize(&self, bytes: &[u8]) -> Result<Message>;
}

/// Compact binary encoding via `postcard`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PostcardSerializer;

impl Serializer for PostcardSerializer {
	fn serialize(&self, msg: &Message) -> Result<Vec<u8>> {
		Ok(postcard::to_allocvec(msg)?)
	}

	fn deserialize(&self, bytes: &[u8]) -> Result<Message> {
		Ok(postcard::from_bytes(bytes)?)
	}
}
