// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Controller defaults and per-request overrides.

use std::time::Duration;

use crate::frame::ExceptionCode;

/// Settings of a [`Dongle`](crate::Dongle).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// The number of transactions that may be in flight at the same time.
    ///
    /// Must match the capabilities of the device at the other end.
    pub max_concurrent_requests: usize,

    /// How often a failed transaction is retried, unless overridden by
    /// [`RequestOptions::max_retries`].
    pub default_max_retries: u32,

    /// How long to wait for a response, unless overridden by
    /// [`RequestOptions::timeout`].
    pub default_timeout: Duration,

    /// Exception responses that are considered temporary and retried.
    pub retry_on_exception: Vec<ExceptionCode>,

    /// How often a transaction may be put back into the queue because the
    /// gateway reported an overload.
    ///
    /// `None` re-queues without limit.
    pub max_overload_retries: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 2,
            default_max_retries: 2,
            default_timeout: Duration::from_millis(6500),
            retry_on_exception: vec![
                ExceptionCode::SlaveDeviceFailure,
                ExceptionCode::SlaveDeviceBusy,
                ExceptionCode::GatewayPathUnavailable,
                ExceptionCode::GatewayTargetNoResponse,
            ],
            max_overload_retries: None,
        }
    }
}

/// Overrides of the [`Config`] defaults for a single request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
    pub max_retries: Option<u32>,
    pub timeout: Option<Duration>,
    pub retry_on_exception: Option<Vec<ExceptionCode>>,
}

impl RequestOptions {
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_retry_on_exception(mut self, codes: Vec<ExceptionCode>) -> Self {
        self.retry_on_exception = Some(codes);
        self
    }
}

/// The effective settings of one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TransactionOptions {
    pub(crate) max_retries: u32,
    pub(crate) timeout: Duration,
    pub(crate) retry_on_exception: Vec<ExceptionCode>,
}

impl Config {
    pub(crate) fn transaction_options(&self, options: RequestOptions) -> TransactionOptions {
        let RequestOptions {
            max_retries,
            timeout,
            retry_on_exception,
        } = options;
        TransactionOptions {
            max_retries: max_retries.unwrap_or(self.default_max_retries),
            timeout: timeout.unwrap_or(self.default_timeout),
            retry_on_exception: retry_on_exception
                .unwrap_or_else(|| self.retry_on_exception.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        let options = config.transaction_options(RequestOptions::default());
        assert_eq!(options.max_retries, 2);
        assert_eq!(options.timeout, Duration::from_millis(6500));
        assert_eq!(
            options
                .retry_on_exception
                .into_iter()
                .map(u8::from)
                .collect::<Vec<_>>(),
            vec![0x04, 0x06, 0x0A, 0x0B]
        );
    }

    #[test]
    fn explicit_zero_overrides_default() {
        let options = Config::default().transaction_options(
            RequestOptions::default()
                .with_max_retries(0)
                .with_timeout(Duration::from_millis(10))
                .with_retry_on_exception(vec![]),
        );
        assert_eq!(options.max_retries, 0);
        assert_eq!(options.timeout, Duration::from_millis(10));
        assert!(options.retry_on_exception.is_empty());
    }
}
