//! Indirection over `core::sync::atomic` vs. `loom::sync::atomic` so the
//! ring buffer's CAS loops can be model-checked under `cfg(loom)` without
//! changing a line of the algorithm.

cfg_if::cfg_if! {
    if #[cfg(loom)] {
        pub(crate) use loom::sync::atomic;
        pub(crate) use loom::cell::UnsafeCell;
    } else {
        pub(crate) use core::sync::atomic;

        pub(crate) struct UnsafeCell<T>(core::cell::UnsafeCell<T>);

        impl<T> UnsafeCell<T> {
            pub(crate) const fn new(data: T) -> Self {
                Self(core::cell::UnsafeCell::new(data))
            }

            pub(crate) fn with_mut<R>(&self, f: impl FnOnce(*mut T) -> R) -> R {
                f(self.0.get())
            }

            pub(crate) fn with<R>(&self, f: impl FnOnce(*const T) -> R) -> R {
                f(self.0.get().cast_const())
            }
        }
    }
}
