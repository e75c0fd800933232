//! Signaling relay: forwards offer/answer/ICE/signal frames to their target.
//!
//! Payloads are never inspected. The only rewrite is `from`, which is always
//! replaced with the sender's registered id.

use parley_common::{ClientId, SignalError, SignalingMessage};
use tracing::debug;

use crate::session::SessionRegistry;

/// Deliver `message` from `sender` to `message.target`.
///
/// Fails with [`SignalError::TargetNotFound`] when the target has no live
/// session. Frames to one target are queued on its transport in call order.
pub fn relay(
    sessions: &SessionRegistry,
    sender: &ClientId,
    message: SignalingMessage,
) -> Result<(), SignalError> {
    let target = message.target.clone();
    let kind = message.kind;
    let session = sessions
        .lookup(&target)
        .ok_or_else(|| SignalError::TargetNotFound(target.clone()))?;

    if !session.send(message.into_frame(sender.clone())) {
        return Err(SignalError::TargetNotFound(target));
    }
    debug!(from = %sender, target = %target, ?kind, "Relayed signal");
    Ok(())
}
