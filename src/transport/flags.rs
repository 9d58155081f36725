//! Flag bits understood by the transport.
//!
//! Values match the middleware's native bit assignments so that flags can be
//! handed to a native transport unchanged.

/// Flag word passed to every transport operation.
pub type Flags = u32;

/// No flags.
pub const NONE: Flags = 0;
/// Do not block: fail with `Block` instead of waiting.
pub const NOBLOCK: Flags = 0x0000_0001;
/// Do not run the call inside the caller's transaction.
pub const NOTRAN: Flags = 0x0000_0002;
/// Fire-and-forget: no reply is expected.
pub const NOREPLY: Flags = 0x0000_0004;
/// Restart the operation when interrupted by a signal.
pub const SIGRSTRT: Flags = 0x0000_0008;
/// Ignore block timeouts and wait forever.
pub const NOTIME: Flags = 0x0000_0040;
/// Harvest the next available reply regardless of its descriptor.
pub const GETANY: Flags = 0x0000_0080;
/// Do not re-type the output buffer to match the reply.
pub const NOCHANGE: Flags = 0x0000_0100;
/// The invocation belongs to a conversation.
pub const CONV: Flags = 0x0000_0400;
/// The local side holds the send token after this operation.
pub const SENDONLY: Flags = 0x0000_0800;
/// The local side yields the send token after this operation.
pub const RECVONLY: Flags = 0x0000_1000;

/// Check if a specific flag is set.
#[inline]
pub fn has_flag(flags: Flags, flag: Flags) -> bool {
    flags & flag != 0
}
