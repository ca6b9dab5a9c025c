//! `format!`-style wrappers around the command issuer.
//!
//! ```rust,ignore
//! let rsp = at_send!(instance, timeout, "AT#GPIO={},{},{}", pin, 1, 1)?;
//! ```

/// Format a command and send it with [`Instance::send_command`](crate::Instance::send_command).
#[macro_export]
macro_rules! at_send {
    ($instance:expr, $timeout:expr, $($arg:tt)+) => {
        $instance.send_command($timeout, &::std::format!($($arg)+))
    };
}

/// Format a command and send it with
/// [`Instance::send_command_expect_ok`](crate::Instance::send_command_expect_ok).
#[macro_export]
macro_rules! at_expect_ok {
    ($instance:expr, $timeout:expr, $($arg:tt)+) => {
        $instance.send_command_expect_ok($timeout, &::std::format!($($arg)+))
    };
}

/// Format a command and send it with
/// [`Instance::send_command_binary`](crate::Instance::send_command_binary).
#[macro_export]
macro_rules! at_send_binary {
    ($instance:expr, $timeout:expr, $($arg:tt)+) => {
        $instance.send_command_binary($timeout, &::std::format!($($arg)+))
    };
}

/// Format a command and send it with
/// [`Instance::send_command_and_log`](crate::Instance::send_command_and_log).
#[macro_export]
macro_rules! at_send_and_log {
    ($instance:expr, $timeout:expr, $($arg:tt)+) => {
        $instance.send_command_and_log($timeout, &::std::format!($($arg)+))
    };
}
