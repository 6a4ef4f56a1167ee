/// Execution classes used for worker scheduling and observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskClass {
	/// Asynchronous dispatch of a call into a context of the same domain.
	AsyncDispatch,
	/// Asynchronous call crossing an isolated domain boundary.
	CrossDomain,
	/// Hand-off of a synchronization domain to a queued asynchronous work item.
	///
	/// Always runs on a dedicated thread, never on the blocking pool.
	DomainWake,
}

impl TaskClass {
	/// Stable label used in trace fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::AsyncDispatch => "async_dispatch",
			Self::CrossDomain => "cross_domain",
			Self::DomainWake => "domain_wake",
		}
	}
}
