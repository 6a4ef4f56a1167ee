//! Marshaled object references.

use serde::{Deserialize, Serialize};

use crate::domain::DomainId;

/// Location of a cross-domain endpoint inside one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CrossDomainData {
	pub context_id: u64,
	pub domain_id: DomainId,
	pub process_id: u32,
}

impl CrossDomainData {
	/// Returns whether the endpoint lives in the current process.
	pub fn is_local_process(&self) -> bool {
		self.process_id == std::process::id()
	}
}

/// Per-channel addressing data attached to an [`ObjRef`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelData {
	CrossDomain(CrossDomainData),
	/// Data owned by an external transport, passed through untouched.
	Opaque { channel: String, data: Vec<u8> },
}

/// Serializable descriptor that lets another domain build a proxy to an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjRef {
	pub uri: String,
	pub type_name: String,
	pub channel_data: Vec<ChannelData>,
	pub well_known: bool,
}

impl ObjRef {
	/// Returns the first cross-domain endpoint, if any.
	pub fn cross_domain_data(&self) -> Option<&CrossDomainData> {
		self.channel_data.iter().find_map(|data| match data {
			ChannelData::CrossDomain(d) => Some(d),
			ChannelData::Opaque { .. } => None,
		})
	}

	pub(crate) fn is_smuggleable(&self) -> bool {
		self.channel_data.iter().all(|data| matches!(data, ChannelData::CrossDomain(_)))
	}
}
