//! Single-flight coordinator guarding every network refresh.
//!
//! In [`CoordinatorMode::Global`] one permit serializes all refreshes in the process. In
//! [`CoordinatorMode::Keyed`] each [`CacheKey`] gets its own permit, created on demand and
//! dropped from the map once nobody holds or waits for it. Permits are RAII guards: a failing or
//! cancelled holder releases its permit when it is dropped.

// crates.io
use async_lock::MutexGuardArc;
// self
use crate::{_prelude::*, cache::CacheKey, config::CoordinatorMode};

type Permits = Arc<Mutex<HashMap<CacheKey, Arc<AsyncMutex<()>>>>>;

/// Mutual-exclusion coordinator with capacity one per partition.
#[derive(Debug)]
pub struct SingleFlight {
	mode: CoordinatorMode,
	global: Arc<AsyncMutex<()>>,
	keyed: Permits,
}
impl SingleFlight {
	/// Creates a coordinator using the provided partitioning.
	pub fn new(mode: CoordinatorMode) -> Self {
		Self { mode, global: Default::default(), keyed: Default::default() }
	}

	/// Partitioning in use.
	pub fn mode(&self) -> CoordinatorMode {
		self.mode
	}

	/// Runs `operation` while holding the permit for `key`.
	///
	/// The operation's output, success or failure, is returned untouched.
	pub async fn run<F, T>(&self, key: &CacheKey, operation: F) -> T
	where
		F: Future<Output = T>,
	{
		let _permit = self.acquire(key).await;

		operation.await
	}

	/// Waits for the permit guarding `key`.
	pub async fn acquire(&self, key: &CacheKey) -> FlightPermit {
		match self.mode {
			CoordinatorMode::Global =>
				FlightPermit { _guard: self.global.lock_arc().await, slot: None },
			CoordinatorMode::Keyed => {
				let slot = KeyedSlot::checkout(&self.keyed, key);
				let guard = slot.lock.lock_arc().await;

				FlightPermit { _guard: guard, slot: Some(slot) }
			},
		}
	}

	/// Number of keyed permits currently tracked (always zero in global mode).
	pub fn tracked_keys(&self) -> usize {
		self.keyed.lock().len()
	}
}
impl Default for SingleFlight {
	fn default() -> Self {
		Self::new(CoordinatorMode::default())
	}
}

/// Permit held while a protected operation runs.
pub struct FlightPermit {
	// Dropped before `slot` so the eviction check sees the lock as idle.
	_guard: MutexGuardArc<()>,
	slot: Option<KeyedSlot>,
}
impl Debug for FlightPermit {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("FlightPermit").field("key", &self.slot.as_ref().map(|s| &s.key)).finish()
	}
}

struct KeyedSlot {
	key: CacheKey,
	lock: Arc<AsyncMutex<()>>,
	permits: Permits,
}
impl KeyedSlot {
	fn checkout(permits: &Permits, key: &CacheKey) -> Self {
		let lock = permits
			.lock()
			.entry(key.clone())
			.or_insert_with(|| Arc::new(AsyncMutex::new(())))
			.clone();

		Self { key: key.clone(), lock, permits: permits.clone() }
	}
}
impl Drop for KeyedSlot {
	fn drop(&mut self) {
		let mut permits = self.permits.lock();

		// Map entry plus this handle: nobody else holds or waits for the permit.
		if Arc::strong_count(&self.lock) == 2
			&& permits.get(&self.key).is_some_and(|lock| Arc::ptr_eq(lock, &self.lock))
		{
			permits.remove(&self.key);
		}
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::{
		future,
		sync::atomic::{AtomicUsize, Ordering},
	};
	// self
	use super::*;
	use crate::auth::{ScopeKey, UserKey};

	fn key(user: &str) -> CacheKey {
		CacheKey::new(&UserKey::new(user).expect("User fixture should be valid."), &ScopeKey::default())
	}

	#[tokio::test]
	async fn failed_operation_releases_the_permit() {
		for mode in [CoordinatorMode::Global, CoordinatorMode::Keyed] {
			let flight = SingleFlight::new(mode);
			let failed: Result<(), &str> = flight.run(&key("u"), async { Err("boom") }).await;

			assert!(failed.is_err());
			assert_eq!(flight.run(&key("u"), async { 7 }).await, 7);
			assert_eq!(flight.tracked_keys(), 0);
		}
	}

	#[tokio::test]
	async fn cancelled_holder_releases_the_permit() {
		for mode in [CoordinatorMode::Global, CoordinatorMode::Keyed] {
			let flight = SingleFlight::new(mode);
			let stalled = tokio::time::timeout(
				std::time::Duration::from_millis(20),
				flight.run(&key("u"), future::pending::<()>()),
			)
			.await;

			assert!(stalled.is_err());

			let resumed = tokio::time::timeout(
				std::time::Duration::from_secs(1),
				flight.run(&key("u"), async { "ran" }),
			)
			.await
			.expect("Permit should be free after cancellation.");

			assert_eq!(resumed, "ran");
			assert_eq!(flight.tracked_keys(), 0);
		}
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
	async fn operations_never_overlap() {
		let flight = Arc::new(SingleFlight::default());
		let running = Arc::new(AtomicUsize::new(0));
		let peak = Arc::new(AtomicUsize::new(0));
		let mut tasks = Vec::new();

		for idx in 0..16 {
			let flight = flight.clone();
			let running = running.clone();
			let peak = peak.clone();

			tasks.push(tokio::spawn(async move {
				let user = format!("user-{}", idx % 4);

				flight
					.run(&key(&user), async {
						let now = running.fetch_add(1, Ordering::SeqCst) + 1;

						peak.fetch_max(now, Ordering::SeqCst);
						tokio::time::sleep(std::time::Duration::from_millis(2)).await;
						running.fetch_sub(1, Ordering::SeqCst);
					})
					.await;
			}));
		}
		for task in tasks {
			task.await.expect("Task should not panic.");
		}

		assert_eq!(peak.load(Ordering::SeqCst), 1);
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
	async fn keyed_mode_lets_distinct_keys_overlap() {
		let flight = Arc::new(SingleFlight::new(CoordinatorMode::Keyed));
		let first = flight.acquire(&key("alice")).await;
		let second = tokio::time::timeout(
			std::time::Duration::from_secs(1),
			flight.acquire(&key("bob")),
		)
		.await
		.expect("Distinct keys should not block each other.");

		assert_eq!(flight.tracked_keys(), 2);

		drop(first);
		drop(second);

		assert_eq!(flight.tracked_keys(), 0);
	}
}
