use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use remora_remoting::{Context, DelegateObject, Domain, MethodDescriptor, MethodReturn, Proxy, RemoteObject, SynchronizationProperty, Value};

use crate::common::{init_tracing, invoke_in, proxy_in, wait_for};

fn synchronized_context(domain: &Domain, reentrant: bool) -> (Arc<Context>, Arc<SynchronizationProperty>) {
	let property = SynchronizationProperty::new(reentrant);
	let ctx = domain.new_context();
	ctx.add_property(property.clone()).expect("add property");
	ctx.freeze();
	(ctx, property)
}

#[derive(Default)]
struct Occupancy {
	active: AtomicUsize,
	peak: AtomicUsize,
	order: Mutex<Vec<i64>>,
	hold_first: AtomicUsize,
}

fn guarded(occupancy: Arc<Occupancy>) -> Arc<dyn RemoteObject> {
	DelegateObject::builder("Guarded")
		.method(MethodDescriptor::new("work"), move |call| {
			let tag = call.arg(0).and_then(Value::as_int).unwrap_or_default();
			let now = occupancy.active.fetch_add(1, Ordering::SeqCst) + 1;
			occupancy.peak.fetch_max(now, Ordering::SeqCst);
			occupancy.order.lock().push(tag);
			if tag == 1 {
				wait_for("first call release", || occupancy.hold_first.load(Ordering::SeqCst) == 1);
			} else {
				thread::sleep(Duration::from_millis(5));
			}
			occupancy.active.fetch_sub(1, Ordering::SeqCst);
			Ok(MethodReturn::value(tag))
		})
		.build()
}

#[test]
fn calls_into_a_synchronized_context_never_overlap_and_keep_arrival_order() {
	init_tracing();
	let domain = Domain::create("sync-fifo");
	let (ctx, property) = synchronized_context(&domain, false);
	let occupancy = Arc::new(Occupancy::default());
	let objref = domain
		.marshal_in(&guarded(occupancy.clone()), Some("guarded.rem"), &ctx)
		.expect("marshal");
	let proxy = proxy_in(&domain, &objref);

	let spawn = |tag: i64| {
		let (domain, proxy) = (domain.clone(), proxy.clone());
		thread::spawn(move || invoke_in(&domain, &proxy, "work", vec![tag.into()]))
	};

	let first = spawn(1);
	wait_for("first call to start", || !occupancy.order.lock().is_empty());
	let second = spawn(2);
	wait_for("second call to queue", || property.queue_len() == 1);
	let third = spawn(3);
	wait_for("third call to queue", || property.queue_len() == 2);
	occupancy.hold_first.store(1, Ordering::SeqCst);

	for (handle, tag) in [(first, 1), (second, 2), (third, 3)] {
		assert_eq!(handle.join().expect("caller"), Ok(Value::Int(tag)));
	}
	assert_eq!(*occupancy.order.lock(), vec![1, 2, 3]);
	assert_eq!(occupancy.peak.load(Ordering::SeqCst), 1);
	assert!(!property.is_locked());
}

#[test]
fn many_concurrent_callers_are_serialized() {
	const CALLERS: i64 = 6;
	init_tracing();
	let domain = Domain::create("sync-many");
	let (ctx, property) = synchronized_context(&domain, false);
	let occupancy = Arc::new(Occupancy::default());
	occupancy.hold_first.store(1, Ordering::SeqCst);
	let objref = domain
		.marshal_in(&guarded(occupancy.clone()), Some("guarded.rem"), &ctx)
		.expect("marshal");
	let proxy = proxy_in(&domain, &objref);

	let handles: Vec<_> = (10..10 + CALLERS)
		.map(|tag| {
			let (domain, proxy) = (domain.clone(), proxy.clone());
			thread::spawn(move || invoke_in(&domain, &proxy, "work", vec![tag.into()]))
		})
		.collect();
	for handle in handles {
		assert!(handle.join().expect("caller").is_ok());
	}
	assert_eq!(occupancy.peak.load(Ordering::SeqCst), 1);
	assert_eq!(occupancy.order.lock().len(), CALLERS as usize);
	assert!(!property.is_locked());
}

#[test]
fn queued_async_head_runs_while_the_worker_pool_is_full() {
	const WAITERS: i64 = 64;
	init_tracing();
	let domain = Domain::create("sync-saturated");
	let (ctx, property) = synchronized_context(&domain, false);
	let occupancy = Arc::new(Occupancy::default());
	let pinged = Arc::new(AtomicUsize::new(0));
	let object: Arc<dyn RemoteObject> = {
		let (occupancy, pinged) = (occupancy.clone(), pinged.clone());
		DelegateObject::builder("Saturated")
			.method(MethodDescriptor::new("work"), move |call| {
				let tag = call.arg(0).and_then(Value::as_int).unwrap_or_default();
				let now = occupancy.active.fetch_add(1, Ordering::SeqCst) + 1;
				occupancy.peak.fetch_max(now, Ordering::SeqCst);
				occupancy.order.lock().push(tag);
				while tag == 1 && occupancy.hold_first.load(Ordering::SeqCst) == 0 {
					thread::sleep(Duration::from_millis(2));
				}
				occupancy.active.fetch_sub(1, Ordering::SeqCst);
				Ok(MethodReturn::value(tag))
			})
			.method(MethodDescriptor::new("ping").one_way(), move |_| {
				pinged.fetch_add(1, Ordering::SeqCst);
				Ok(MethodReturn::void())
			})
			.build()
	};
	let objref = domain.marshal_in(&object, Some("saturated.rem"), &ctx).expect("marshal");
	let proxy = proxy_in(&domain, &objref);

	let holder = {
		let (domain, proxy) = (domain.clone(), proxy.clone());
		thread::spawn(move || invoke_in(&domain, &proxy, "work", vec![1.into()]))
	};
	wait_for("holder to start", || !occupancy.order.lock().is_empty());
	domain
		.execute_in(|| proxy.invoke_one_way("ping", vec![]))
		.expect("enter")
		.expect("ping");
	wait_for("ping to queue", || property.queue_len() == 1);

	let pending: Vec<_> = (0..WAITERS)
		.map(|i| {
			domain
				.execute_in(|| proxy.begin_invoke("work", vec![(100 + i).into()]))
				.expect("enter")
				.expect("begin")
		})
		.collect();
	wait_for("waiters to queue", || property.queue_len() == 1 + WAITERS as usize);
	occupancy.hold_first.store(1, Ordering::SeqCst);

	assert_eq!(holder.join().expect("holder"), Ok(Value::Int(1)));
	for (i, call) in pending.iter().enumerate() {
		assert_eq!(call.end_invoke(Some(Duration::from_secs(10))), Ok(Value::Int(100 + i as i64)));
	}
	assert_eq!(pinged.load(Ordering::SeqCst), 1);
	assert_eq!(occupancy.peak.load(Ordering::SeqCst), 1);
	wait_for("domain to drain", || !property.is_locked());
}

/// A in the synchronized context calls B outside it, and B calls back into A.
fn callback_pair(domain: &Arc<Domain>, ctx: &Arc<Context>) -> Proxy {
	let to_a: Arc<OnceLock<Proxy>> = Arc::new(OnceLock::new());
	let to_b: Arc<OnceLock<Proxy>> = Arc::new(OnceLock::new());

	let a: Arc<dyn RemoteObject> = {
		let to_b = to_b.clone();
		DelegateObject::builder("A")
			.method(MethodDescriptor::new("relay"), move |_| {
				let b = to_b.get().expect("wired");
				Ok(MethodReturn::value(b.invoke("callback", vec![])?))
			})
			.method(MethodDescriptor::new("leaf"), |_| Ok(MethodReturn::value("leaf")))
			.build()
	};
	let b: Arc<dyn RemoteObject> = {
		let to_a = to_a.clone();
		DelegateObject::builder("B")
			.method(MethodDescriptor::new("callback"), move |_| {
				let a = to_a.get().expect("wired");
				Ok(MethodReturn::value(a.invoke("leaf", vec![])?))
			})
			.build()
	};

	let ref_a = domain.marshal_in(&a, Some("a.rem"), ctx).expect("marshal a");
	let ref_b = domain.marshal_in(&b, Some("b.rem"), domain.default_context()).expect("marshal b");
	let proxy_a = proxy_in(domain, &ref_a);
	let _ = to_a.set(proxy_a.clone());
	let _ = to_b.set(proxy_in(domain, &ref_b));
	proxy_a
}

#[test]
fn callback_into_a_held_context_does_not_deadlock() {
	init_tracing();
	let domain = Domain::create("sync-nested");
	let (ctx, property) = synchronized_context(&domain, false);
	let proxy_a = callback_pair(&domain, &ctx);

	let (tx, rx) = mpsc::channel();
	{
		let domain = domain.clone();
		thread::spawn(move || {
			let _ = tx.send(invoke_in(&domain, &proxy_a, "relay", vec![]));
		});
	}
	let outcome = rx.recv_timeout(Duration::from_secs(5)).expect("nested callback deadlocked");
	assert_eq!(outcome, Ok(Value::from("leaf")));
	assert!(!property.is_locked());
}

#[test]
fn reentrant_context_also_completes_callbacks() {
	init_tracing();
	let domain = Domain::create("sync-reentrant");
	let (ctx, property) = synchronized_context(&domain, true);
	let proxy_a = callback_pair(&domain, &ctx);

	let (tx, rx) = mpsc::channel();
	{
		let domain = domain.clone();
		thread::spawn(move || {
			let _ = tx.send(invoke_in(&domain, &proxy_a, "relay", vec![]));
		});
	}
	let outcome = rx.recv_timeout(Duration::from_secs(5)).expect("reentrant callback blocked");
	assert_eq!(outcome, Ok(Value::from("leaf")));
	assert!(property.is_reentrant());
	wait_for("domain to unlock", || !property.is_locked());
}
