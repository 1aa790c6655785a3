//! Reply line sequence.

use futures::Stream;

use crate::client::CqpClient;
use crate::process::EngineChannel;
use crate::Result;

/// The remaining reply lines of one framed command.
///
/// Borrowing the client mutably keeps any other command from being sent
/// while the reply is being read.
pub struct ResponseLines<'a, C: EngineChannel> {
    client: &'a mut CqpClient<C>,
    done: bool,
}

impl<'a, C: EngineChannel> ResponseLines<'a, C> {
    pub(crate) fn new(client: &'a mut CqpClient<C>) -> Self {
        Self {
            client,
            done: false,
        }
    }

    /// Get the next reply line.
    ///
    /// Returns `None` once the end-of-reply marker has been read. An engine
    /// error reported after the last line is returned as a final `Err` and
    /// recorded in the client's error record.
    pub async fn next(&mut self) -> Option<Result<String>> {
        if self.done {
            return None;
        }

        match self.client.next_reply_line().await {
            Ok(Some(bytes)) => Some(Ok(self.client.filter_output(&bytes))),
            Ok(None) => {
                self.done = true;
                match self.client.check_trailing_errors().await {
                    Ok(()) => None,
                    Err(e) => Some(self.client.track(Err(e))),
                }
            }
            Err(e) => {
                self.done = true;
                Some(self.client.track(Err(e)))
            }
        }
    }

    /// Check whether the end-of-reply marker has been consumed.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Read every remaining line.
    pub async fn collect(mut self) -> Result<Vec<String>> {
        let mut lines = Vec::new();
        while let Some(line) = self.next().await {
            lines.push(line?);
        }
        Ok(lines)
    }

    /// Hand every remaining line to `handler`.
    pub async fn for_each_line<F>(mut self, mut handler: F) -> Result<()>
    where
        F: FnMut(String),
    {
        while let Some(line) = self.next().await {
            handler(line?);
        }
        Ok(())
    }

    /// Convert into a [`futures::Stream`].
    pub fn into_stream(self) -> impl Stream<Item = Result<String>> + Send + 'a {
        futures::stream::unfold(self, |mut lines| async move {
            lines.next().await.map(|item| (item, lines))
        })
    }
}
