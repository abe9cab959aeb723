use obsremote::{Client, Error, status};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Stop,
}

impl Action {
    pub fn request_type(self) -> &'static str {
        match self {
            Action::Start => "StartReplayBuffer",
            Action::Stop => "StopReplayBuffer",
        }
    }

    /// The status OBS answers with when the buffer is already in the
    /// requested state.
    fn already_done(self) -> i32 {
        match self {
            Action::Start => status::OUTPUT_RUNNING,
            Action::Stop => status::OUTPUT_NOT_RUNNING,
        }
    }

    pub fn is_benign(self, error: &Error) -> bool {
        error.is_request_code(self.already_done())
    }
}

/// Toggles the replay buffer, then disconnects if still identified.
///
/// Starting an active buffer or stopping an inactive one is not an error.
pub async fn run(client: &Client, action: Action, timeout: Duration) -> obsremote::Result<()> {
    let outcome = match client
        .call_with_timeout(action.request_type(), None, timeout)
        .await
    {
        Err(e) if action.is_benign(&e) => {
            debug!(request_type = action.request_type(), error = %e, "Replay buffer already in that state");
            Ok(())
        }
        other => other.map(drop),
    };
    if client.identified() {
        client.disconnect().await;
    }
    outcome
}
