// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A single request/response exchange.
//!
//! A [`Transaction`] is created by the controller, waits in its queue,
//! and is handed over to the transport for sending. The transport reports
//! the outcome by calling [`Transaction::handle_response()`] or
//! [`Transaction::handle_error()`], which stop the timeout timer and pass
//! the transaction on to its [`TransactionClient`]. The client then decides
//! whether the transaction is retried or resolved.

use std::{fmt, sync::Arc, time::Duration};

use bytes::Bytes;
use tokio::{runtime::Handle, sync::oneshot, task::JoinHandle};

use crate::{
    config::TransactionOptions,
    frame::{is_exception, ExceptionCode, TransactionId},
    unit::UnitId,
    Error, Result,
};

/// Delivers the final outcome to the caller of `execute()`.
pub(crate) type Reply = oneshot::Sender<Result<Bytes>>;

/// Invoked with the id under which a transaction was sent when its timer
/// fires.
pub(crate) type TimeoutNotify = Arc<dyn Fn(TransactionId) + Send + Sync>;

/// Receives the outcome of transactions.
///
/// Implemented by the controller that owns the transaction queue.
pub(crate) trait TransactionClient {
    /// A complete response has been received, which might be an exception
    /// response.
    fn transaction_complete(&mut self, transaction: Transaction, response: Bytes);

    /// The transaction failed without a valid response.
    ///
    /// `transaction` is `None` if a response arrived for an id that is
    /// not pending.
    fn transaction_error(&mut self, transaction: Option<Transaction>, error: Error);

    /// The timer of the transaction fired. Called right before
    /// [`Self::transaction_error()`] reports [`Error::TimedOut`].
    fn transaction_timeout(&mut self, transaction: &Transaction);
}

/// Lifecycle of a live transaction.
///
/// Resolved, failed and cancelled transactions are consumed and do not
/// have a state anymore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum State {
    /// Queued, never sent.
    Pending,
    /// Sent and waiting for a response.
    Sent,
    /// Queued again after a failure or an overload.
    Retrying,
}

pub(crate) struct Transaction {
    unit_id: UnitId,
    pdu: Bytes,
    options: TransactionOptions,
    failures: u32,
    overloads: u32,
    cancelled: bool,
    state: State,
    timer: Option<JoinHandle<()>>,
    reply: Option<Reply>,
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("unit_id", &self.unit_id)
            .field("pdu", &self.pdu)
            .field("failures", &self.failures)
            .field("overloads", &self.overloads)
            .field("cancelled", &self.cancelled)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Transaction {
    pub(crate) fn new(
        unit_id: UnitId,
        pdu: Bytes,
        options: TransactionOptions,
        reply: Reply,
    ) -> Self {
        Self {
            unit_id,
            pdu,
            options,
            failures: 0,
            overloads: 0,
            cancelled: false,
            state: State::Pending,
            timer: None,
            reply: Some(reply),
        }
    }

    pub(crate) fn unit_id(&self) -> UnitId {
        self.unit_id
    }

    pub(crate) fn pdu(&self) -> &Bytes {
        &self.pdu
    }

    pub(crate) fn timeout(&self) -> Duration {
        self.options.timeout
    }

    pub(crate) fn failures(&self) -> u32 {
        self.failures
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> State {
        self.state
    }

    /// Start the timeout timer on `runtime`. Called by the transport after
    /// the request has been written.
    ///
    /// The request may be sent from any thread, e.g. from a notification
    /// of the link, so the timer is never spawned on the current runtime.
    /// Without a runtime no timer can be started and the transaction waits
    /// for its response forever.
    pub(crate) fn start(
        &mut self,
        transaction_id: TransactionId,
        runtime: Option<&Handle>,
        on_timeout: TimeoutNotify,
    ) {
        self.stop_timeout();
        self.state = State::Sent;
        let Some(runtime) = runtime else {
            log::error!("No timeout for transaction {transaction_id}: no runtime");
            return;
        };
        let timeout = self.options.timeout;
        self.timer = Some(runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            on_timeout(transaction_id);
        }));
    }

    pub(crate) fn handle_response(mut self, response: Bytes, client: &mut dyn TransactionClient) {
        self.stop_timeout();
        if is_exception(&response) {
            self.failures += 1;
        } else {
            self.failures = 0;
        }
        client.transaction_complete(self, response);
    }

    pub(crate) fn handle_error(mut self, error: Error, client: &mut dyn TransactionClient) {
        log::debug!("Transaction failed {} time(s): {error}", self.failures + 1);
        self.stop_timeout();
        self.failures += 1;
        client.transaction_error(Some(self), error);
    }

    /// The timer fired and the transport has already forgotten about this
    /// transaction.
    pub(crate) fn handle_timeout(mut self, client: &mut dyn TransactionClient) {
        // The timer task is the caller, nothing to abort
        self.timer = None;
        if !self.is_cancelled() {
            client.transaction_timeout(&self);
        }
        self.handle_error(Error::TimedOut, client);
    }

    /// `true` as long as the number of failures has not exceeded the
    /// number of retries.
    pub(crate) fn should_retry(&self) -> bool {
        self.failures <= self.options.max_retries
    }

    pub(crate) fn retry_exception(&self, exception: ExceptionCode) -> bool {
        self.options.retry_on_exception.contains(&exception)
    }

    /// Mark the transaction as no longer wanted.
    ///
    /// A request that has already been written cannot be recalled. The flag
    /// only prevents further retries.
    #[cfg(test)]
    pub(crate) fn cancel(&mut self) {
        self.cancelled = true;
    }

    /// Cancelled explicitly or nobody is waiting for the outcome anymore.
    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled || self.reply.as_ref().map_or(true, oneshot::Sender::is_closed)
    }

    /// Count another overload of the gateway and return the total.
    ///
    /// An overload does not use up a retry.
    pub(crate) fn record_overload(&mut self) -> u32 {
        self.failures = self.failures.saturating_sub(1);
        self.overloads += 1;
        self.overloads
    }

    /// The transaction goes back into the queue.
    pub(crate) fn retry(&mut self) {
        self.stop_timeout();
        self.state = State::Retrying;
    }

    pub(crate) fn resolve(mut self, response: Bytes) {
        self.finish(Ok(response));
    }

    pub(crate) fn reject(mut self, error: Error) {
        self.finish(Err(error));
    }

    fn finish(&mut self, result: Result<Bytes>) {
        self.stop_timeout();
        if let Some(reply) = self.reply.take() {
            if reply.send(result).is_err() {
                log::debug!("Outcome of transaction discarded, nobody is waiting");
            }
        }
    }

    fn stop_timeout(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        self.stop_timeout();
    }
}
