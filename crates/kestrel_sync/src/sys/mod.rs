pub mod thread_id;
pub use thread_id::*;
