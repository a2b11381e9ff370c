use anyhow::Result;
use iflow_providers::Message;
use std::time::Instant;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::directive;
use crate::dispatch::{format_result_message, DirectiveFlow};
use crate::task_result::{TurnOutcome, TurnResult};
use crate::ui_writer::UiWriter;

impl<W: UiWriter> crate::Agent<W> {
    /// Run one operator turn: send `input`, then keep answering the directive
    /// each reply ends with until a reply carries none.
    ///
    /// Transport failures abort the turn with an error. The user message stays
    /// in the history; the partial reply does not.
    pub async fn send(&mut self, input: &str) -> Result<TurnResult> {
        let input = input.trim();
        if input.is_empty() {
            anyhow::bail!("Cannot send an empty message");
        }

        let cancel = self.conversation.cancel_signal().clone();
        cancel.clear();
        self.conversation.push(Message::user(input));

        let mut executed = 0;
        loop {
            if cancel.is_requested() {
                cancel.clear();
                info!("Turn stopped before the next request");
                return Ok(TurnResult::new(String::new(), TurnOutcome::Cancelled, executed));
            }

            let Some(reply) = self.stream_reply(cancel.token()).await? else {
                cancel.clear();
                self.ui_writer.print_warning("Reply stopped");
                return Ok(TurnResult::new(String::new(), TurnOutcome::Cancelled, executed));
            };

            if reply.trim().is_empty() {
                warn!("Model returned an empty reply");
                self.ui_writer.print_warning("The model returned an empty reply");
                return Ok(TurnResult::new(reply, TurnOutcome::EmptyReply, executed));
            }

            self.conversation.push(Message::assistant(reply.clone()));
            self.auto_save().await;

            let Some(directive) = directive::extract(&reply) else {
                return Ok(TurnResult::new(reply, TurnOutcome::Completed, executed));
            };

            debug!("Reply ends with directive {}", directive);
            executed += 1;
            match self.execute_directive(&directive).await {
                DirectiveFlow::Exit => {
                    return Ok(TurnResult::new(reply, TurnOutcome::ExitRequested, executed));
                }
                DirectiveFlow::Continue(body) => {
                    self.conversation.push(Message::user(format_result_message(&body)));
                    self.auto_save().await;
                }
            }
        }
    }

    /// Stream one reply for the current history. `None` when `token` fired
    /// before the stream ended.
    async fn stream_reply(&mut self, token: CancellationToken) -> Result<Option<String>> {
        let endpoint = self.session.endpoint();
        let request = self.session.request(self.conversation.messages().to_vec());
        let started = Instant::now();
        debug!(
            "Requesting completion from {} with {} messages",
            endpoint.url,
            request.messages.len()
        );

        let mut stream = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(None),
            stream = self.provider.stream(&endpoint, request, token.clone()) => stream?,
        };

        self.ui_writer.print_assistant_start();
        let mut reply = String::new();
        let mut chunks = 0usize;
        loop {
            let item = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    self.ui_writer.print_assistant_end();
                    debug!("Stream cancelled after {} chunks", chunks);
                    return Ok(None);
                }
                item = stream.next() => item,
            };

            match item {
                Some(Ok(chunk)) => {
                    if !chunk.content.is_empty() {
                        chunks += 1;
                        reply.push_str(&chunk.content);
                        self.ui_writer.print_delta(&chunk.content);
                    }
                    if chunk.finished {
                        break;
                    }
                }
                Some(Err(e)) => {
                    self.ui_writer.print_assistant_end();
                    return Err(e);
                }
                None => break,
            }
        }
        self.ui_writer.print_assistant_end();
        self.ui_writer.flush();

        if token.is_cancelled() {
            return Ok(None);
        }

        let elapsed = started.elapsed();
        debug!(
            "Stream finished: {} chunks, {} chars in {:?}",
            chunks,
            reply.len(),
            elapsed
        );
        if self.session.debug() {
            self.ui_writer.print_debug(&format!(
                "{} chunks, {} chars in {:.2}s",
                chunks,
                reply.chars().count(),
                elapsed.as_secs_f64()
            ));
        }
        Ok(Some(reply))
    }
}
