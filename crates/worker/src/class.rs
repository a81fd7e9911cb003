/// Execution classes used for task scheduling and observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskClass {
	/// Connection reader and writer loops.
	Network,
	/// Async loops that fan queued values out to listeners.
	Dispatch,
	/// User-supplied callbacks, run on the blocking pool.
	Callback,
}

impl TaskClass {
	/// Stable label used in log fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Network => "network",
			Self::Dispatch => "dispatch",
			Self::Callback => "callback",
		}
	}
}
