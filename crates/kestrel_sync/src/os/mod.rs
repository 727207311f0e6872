//! Module containing OS abstractions.
//!
//! Direct OS implementations aren't available to the user, usable functionality/abstractions
//! are exposed through the `sys` module and the `thread_parker` module.

use cfg_if::cfg_if;

cfg_if! {
    if #[cfg(windows)] {
        pub mod windows;
        pub use self::windows::*;
    } else if #[cfg(unix)] {
        pub mod unix;
        pub use self::unix::*;
    }
}
