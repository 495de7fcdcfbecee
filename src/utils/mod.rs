pub(crate) use callback::{panic_message, run_callback};

mod callback;
