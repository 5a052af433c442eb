use actors::{BoxFuture, Notifier, NotifyError};
use submission_core::{SubmissionEvent, UserId};
use tracing::{info, warn};

/// Writes user notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify<'a>(
        &'a self,
        user_id: UserId,
        event: &'a SubmissionEvent,
    ) -> BoxFuture<'a, Result<(), NotifyError>> {
        Box::pin(async move {
            match event {
                SubmissionEvent::ApplicationFailed { .. } => {
                    warn!(%user_id, event = %event.description(), "Notifying user");
                }
                _ => info!(%user_id, event = %event.description(), "Notifying user"),
            }
            Ok(())
        })
    }
}
