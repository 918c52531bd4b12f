//! Panic containment for exported functions.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        return (*msg).to_string();
    }
    if let Some(msg) = payload.downcast_ref::<String>() {
        return msg.clone();
    }
    "non-string panic payload".to_string()
}

/// Run `f`, returning `default` if it panics.
pub(crate) fn guard_with_default<T>(op: &'static str, default: T, f: impl FnOnce() -> T) -> T {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(payload) => {
            tracing::error!(op, panic = %panic_message(payload), "panic in ffi call");
            default
        }
    }
}

pub(crate) fn guard_void(op: &'static str, f: impl FnOnce()) {
    guard_with_default(op, (), f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panics_become_defaults() {
        let v = guard_with_default("test", 7, || -> i32 { panic!("boom") });
        assert_eq!(v, 7);
        guard_void("test", || panic!("{}", String::from("owned")));
    }

    #[test]
    fn values_pass_through() {
        assert_eq!(guard_with_default("test", 0, || 3), 3);
    }
}
