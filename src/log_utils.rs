pub use log::debug;

/// Print a debug message when either the global debug log level is active, or a local debug flag
/// is set
///
/// With the local flag, given as the first argument, the message goes straight to stderr so it is
/// visible without --debug.
///
/// # Examples
///
/// ```ignore
/// debug_msg!(false, "Split {} into {} parts", name, count); // debug log only with --debug
/// debug_msg!(true, "Split {} into {} parts", name, count); // always printed to stderr
/// ```
macro_rules! debug_msg {
    ($flag:expr, $($arg:tt)+) => {
        if $flag {
            eprintln!($($arg)+);
        } else {
            $crate::log_utils::debug!($($arg)+);
        }
    }
}

pub(crate) use debug_msg;
