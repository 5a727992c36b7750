pub use std::sync::atomic;
pub use std::sync::Arc;

pub type MutexGuard<'a, T> = parking_lot::MutexGuard<'a, T>;

/// A mutex
#[repr(transparent)]
#[derive(Debug, Default)]
pub struct Mutex<T: ?Sized>(pub parking_lot::Mutex<T>);

impl<T> Mutex<T> {
    #[must_use]
    pub fn new(value: T) -> Self {
        Self(parking_lot::Mutex::new(value))
    }

    #[must_use]
    pub fn into_inner(self) -> T {
        self.0.into_inner()
    }
}

impl<T: ?Sized> Mutex<T> {
    pub fn lock(&self) -> MutexGuard<T> {
        self.0.lock()
    }

    pub fn try_lock(&self) -> MutexGuard<T> {
        self.0.try_lock().unwrap()
    }
}

/// A condition variable paired with [`Mutex`]
#[repr(transparent)]
#[derive(Debug, Default)]
pub struct Condvar(pub parking_lot::Condvar);

impl Condvar {
    #[must_use]
    pub fn new() -> Self {
        Self(parking_lot::Condvar::new())
    }

    pub fn wait<T: ?Sized>(&self, guard: &mut MutexGuard<'_, T>) {
        self.0.wait(guard);
    }

    pub fn notify_one(&self) {
        self.0.notify_one();
    }

    pub fn notify_all(&self) {
        self.0.notify_all();
    }
}
