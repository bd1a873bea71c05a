// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::VecDeque;

use bytes::Bytes;

use crate::{
    config::Config,
    frame::ExceptionResponse,
    transaction::{Transaction, TransactionClient},
    Error,
};

/// Transactions waiting to be sent and the admission control for the
/// ones in flight.
///
/// New transactions are appended, retried ones are put in front so that
/// callers that already waited are served first.
#[derive(Debug)]
pub(crate) struct Queue {
    transactions: VecDeque<Transaction>,
    executing: usize,
    max_concurrent_requests: usize,
    max_overload_retries: Option<u32>,
}

impl Queue {
    pub(crate) fn new(config: &Config) -> Self {
        Self {
            transactions: VecDeque::new(),
            executing: 0,
            max_concurrent_requests: config.max_concurrent_requests,
            max_overload_retries: config.max_overload_retries,
        }
    }

    pub(crate) fn push_back(&mut self, transaction: Transaction) {
        log::debug!(
            "Enqueue request for unit {}: {:02X?}",
            transaction.unit_id(),
            transaction.pdu().first()
        );
        self.transactions.push_back(transaction);
    }

    fn requeue(&mut self, mut transaction: Transaction) {
        transaction.retry();
        self.transactions.push_front(transaction);
    }

    /// Take the next transaction to send, if the concurrency limit admits
    /// another one.
    ///
    /// Transactions whose caller has gone away are dropped on the way.
    pub(crate) fn next_ready(&mut self) -> Option<Transaction> {
        while self.executing < self.max_concurrent_requests {
            let transaction = self.transactions.pop_front()?;
            if transaction.is_cancelled() {
                log::debug!("Skipping cancelled transaction");
                continue;
            }
            self.executing += 1;
            return Some(transaction);
        }
        None
    }

    /// Number of transactions waiting to be sent.
    pub(crate) fn len(&self) -> usize {
        self.transactions.len()
    }

    /// Number of transactions the device is considered busy with.
    pub(crate) fn executing(&self) -> usize {
        self.executing
    }

    /// The given number of in-flight transactions have been abandoned.
    pub(crate) fn release(&mut self, count: usize) {
        self.executing = self.executing.saturating_sub(count);
    }

    /// Drop all waiting transactions and forget about the ones in flight.
    pub(crate) fn clear(&mut self) {
        self.transactions.clear();
        self.executing = 0;
    }

    fn finish_one(&mut self) {
        self.executing = self.executing.saturating_sub(1);
    }
}

impl TransactionClient for Queue {
    fn transaction_complete(&mut self, mut transaction: Transaction, response: Bytes) {
        self.finish_one();

        let Some(rsp) = ExceptionResponse::from_pdu(&response) else {
            transaction.resolve(response);
            return;
        };
        log::warn!("Exception response: {rsp}");

        if rsp.exception.is_overload() {
            let overloads = transaction.record_overload();
            if self
                .max_overload_retries
                .map_or(true, |max_overload_retries| overloads <= max_overload_retries)
            {
                // The device is still busy with a request we gave up on
                log::warn!("Gateway overload, requeueing transaction");
                self.executing += 1;
                self.requeue(transaction);
            } else {
                log::warn!("Gateway overloaded {overloads} time(s), giving up");
                transaction.reject(rsp.into());
            }
            return;
        }

        if transaction.should_retry() && transaction.retry_exception(rsp.exception) {
            log::debug!("Retry transaction after {} failure(s)", transaction.failures());
            self.requeue(transaction);
        } else {
            transaction.reject(rsp.into());
        }
    }

    fn transaction_error(&mut self, transaction: Option<Transaction>, error: Error) {
        self.finish_one();

        let Some(transaction) = transaction else {
            log::warn!("Transport error: {error}");
            return;
        };
        if transaction.should_retry() && !transaction.is_cancelled() {
            log::debug!(
                "Retry transaction after {} failure(s): {error}",
                transaction.failures()
            );
            self.requeue(transaction);
        } else {
            log::warn!("Transaction failed: {error}");
            transaction.reject(error);
        }
    }

    fn transaction_timeout(&mut self, transaction: &Transaction) {
        log::warn!(
            "Transaction for unit {} timed out after {:?}",
            transaction.unit_id(),
            transaction.timeout()
        );
    }
}
