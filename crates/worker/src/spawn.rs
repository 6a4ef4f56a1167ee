use std::sync::OnceLock;

use crate::TaskClass;

const BLOCKING_THREADS: usize = 64;

fn runtime_handle() -> Option<tokio::runtime::Handle> {
	if let Ok(handle) = tokio::runtime::Handle::try_current() {
		return Some(handle);
	}

	static GLOBAL_RT: OnceLock<Option<tokio::runtime::Runtime>> = OnceLock::new();
	let runtime = GLOBAL_RT.get_or_init(|| {
		tokio::runtime::Builder::new_multi_thread()
			.worker_threads(2)
			.max_blocking_threads(BLOCKING_THREADS)
			.thread_name("remora-worker-global")
			.build()
			.inspect_err(|error| tracing::error!(%error, "worker.runtime_build_failed"))
			.ok()
	});
	runtime.as_ref().map(|rt| rt.handle().clone())
}

/// Returns whether the shared pool could be built.
///
/// When it could not, [`spawn_blocking`] degrades to one OS thread per task.
pub fn pool_available() -> bool {
	runtime_handle().is_some()
}

/// Runs blocking work on the shared pool, detached from the caller.
pub fn spawn_blocking<F>(class: TaskClass, f: F)
where
	F: FnOnce() + Send + 'static,
{
	tracing::trace!(worker_class = class.as_str(), "worker.spawn_blocking");
	if let Some(handle) = runtime_handle() {
		drop(handle.spawn_blocking(f));
		return;
	}

	if let Err(error) = spawn_thread(class, f) {
		tracing::error!(worker_class = class.as_str(), %error, "worker.spawn_thread_failed");
	}
}

/// Runs `f` on a dedicated named OS thread, outside the blocking pool.
///
/// Work spawned here makes progress even while every pool thread is parked.
/// On error `f` was never run.
pub fn spawn_thread<F>(class: TaskClass, f: F) -> std::io::Result<()>
where
	F: FnOnce() + Send + 'static,
{
	tracing::trace!(worker_class = class.as_str(), "worker.spawn_thread");
	std::thread::Builder::new()
		.name(format!("remora-{}", class.as_str()))
		.spawn(f)
		.map(drop)
}
