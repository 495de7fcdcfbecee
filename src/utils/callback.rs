use std::any::Any;

use tracing::error;

/// Extracts a printable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Invokes a user callback with a panic boundary. A panicking callback is
/// logged and contained so the invoking loop keeps running.
pub(crate) fn run_callback(name: &str, callback: impl FnOnce()) {
    if let Err(payload) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(callback)) {
        error!("{} callback panicked: {}", name, panic_message(&*payload));
    }
}
