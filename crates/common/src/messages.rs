//! Control messages for a running stream connection.

/// Commands that can be sent to a [`StreamConnection`](crate::StreamConnection).
///
/// There is no incremental subscribe: the upstream takes a complete keyword
/// list per connection, so changing it means shutting the connection down and
/// starting a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    /// Close the connection and stop reconnecting.
    Shutdown,
}
