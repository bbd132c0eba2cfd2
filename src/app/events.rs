use tokio::sync::oneshot;

use crate::error::CommandError;
use crate::notify::ChannelMessage;
use crate::relay::control::{ControlRequest, ControlResponse};

/// Input of the relay dispatch loop
///
/// Reader tasks, the reconnect timer and control connections only ever
/// produce these; the loop is the single consumer.
#[derive(Debug)]
pub enum RelayEvent {
    /// Decoded message from the external process
    Inbound { session: u64, message: ChannelMessage },
    /// Reader of `session` hit EOF or an I/O error
    Disconnected { session: u64, reason: String },
    /// The pending reconnect timer fired
    ReconnectDue,
    /// Command or query from a UI collaborator
    Command {
        request: ControlRequest,
        reply: oneshot::Sender<Result<ControlResponse, CommandError>>,
    },
}
