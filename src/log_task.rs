use crate::{client::DriftBalloonClient, log_entry::LogEntry, Result};

/// A pending log operation returned by [`DriftBalloonClient::log`].
///
/// Nothing is sent until one of the two delivery modes is chosen: [`LogTask::submit`] enqueues
/// the entry for background delivery and returns immediately, while [`LogTask::invoke`] delivers
/// synchronously and reports the terminal outcome. Both consume the task, so an entry can only
/// ever be handed over for delivery once.
#[must_use = "nothing is sent until .submit() or .invoke() is called"]
pub struct LogTask<'a> {
    client: &'a DriftBalloonClient,
    entry: LogEntry,
}

impl<'a> LogTask<'a> {
    pub(crate) fn new(client: &'a DriftBalloonClient, entry: LogEntry) -> LogTask<'a> {
        LogTask { client, entry }
    }

    /// Attach the input prompt for reference.
    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.entry.prompt = Some(prompt.into());
        self
    }

    /// Attach the model that produced the response.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.entry.model = Some(model.into());
        self
    }

    /// The entry that will be delivered.
    pub fn entry(&self) -> &LogEntry {
        &self.entry
    }

    /// Queue the entry for background submission (fire-and-forget).
    ///
    /// Returns immediately and never fails: delivery problems are retried, counted, and logged
    /// in the background, never raised into the caller.
    pub fn submit(self) {
        self.client.enqueue(self.entry);
    }

    /// Deliver the entry synchronously, blocking until the server accepts it or the retry
    /// budget is exhausted.
    pub fn invoke(self) -> Result<()> {
        self.client.deliver_sync(self.entry)
    }
}
