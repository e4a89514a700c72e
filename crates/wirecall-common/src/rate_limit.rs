// Copyright 2025 Wirecall Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Byte-rate limiting for Wirecall transports
//!
//! Each transport may cap the bytes it reads and writes per fixed interval.
//! The caps are enforced with two allowances that a periodic timer refills:
//!
//! - **Read allowance**: bytes the transport may read before read readiness
//!   is suspended until the next reset
//! - **Write allowance**: same for writes
//!
//! Partial reads and writes are still reported when an allowance runs out in
//! the middle of a buffer.
//!
//! # Example
//!
//! ```
//! use wirecall_common::rate_limit::{RateLimitConfig, Throttle};
//!
//! // 1 KiB/s reads, unlimited writes
//! let config = RateLimitConfig::per_second(Some(1024), None);
//! let mut throttle = Throttle::new(&config);
//!
//! assert_eq!(throttle.grant_read(4096), 1024);
//! throttle.record_read(1024);
//! assert_eq!(throttle.grant_read(1), 0);
//! assert!(throttle.read_suspended());
//!
//! let resumed = throttle.reset();
//! assert!(resumed.read);
//! assert_eq!(throttle.grant_read(10), 10);
//! ```

use std::time::Duration;

/// Configuration for transport rate limiting.
///
/// # Fields
///
/// * `read_bytes_per_interval` - Read cap per interval (`None` = unlimited)
/// * `write_bytes_per_interval` - Write cap per interval (`None` = unlimited)
/// * `interval` - Length of one accounting interval
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Bytes that may be read per interval
    pub read_bytes_per_interval: Option<u64>,
    /// Bytes that may be written per interval
    pub write_bytes_per_interval: Option<u64>,
    /// Interval after which allowances reset
    pub interval: Duration,
}

impl RateLimitConfig {
    /// Creates a configuration with rate limiting disabled.
    pub fn unlimited() -> Self {
        Self {
            read_bytes_per_interval: None,
            write_bytes_per_interval: None,
            interval: Duration::from_secs(1),
        }
    }

    /// Creates a configuration with per-second byte caps.
    ///
    /// # Arguments
    ///
    /// * `read` - Maximum bytes read per second, or `None`
    /// * `write` - Maximum bytes written per second, or `None`
    ///
    /// # Example
    ///
    /// ```
    /// use wirecall_common::rate_limit::RateLimitConfig;
    ///
    /// let config = RateLimitConfig::per_second(None, Some(64 * 1024));
    /// assert!(config.is_limited());
    /// ```
    pub fn per_second(read: Option<u64>, write: Option<u64>) -> Self {
        Self {
            read_bytes_per_interval: read,
            write_bytes_per_interval: write,
            interval: Duration::from_secs(1),
        }
    }

    /// Sets the accounting interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Returns `true` if either direction is capped.
    pub fn is_limited(&self) -> bool {
        self.read_bytes_per_interval.is_some() || self.write_bytes_per_interval.is_some()
    }
}

impl Default for RateLimitConfig {
    /// Creates a default configuration with rate limiting disabled.
    fn default() -> Self {
        Self::unlimited()
    }
}

/// Bytes still available in one direction for the current interval.
#[derive(Debug, Clone)]
struct Allowance {
    limit: Option<u64>,
    remaining: u64,
    suspended: bool,
}

impl Allowance {
    fn new(limit: Option<u64>) -> Self {
        Self {
            limit,
            remaining: limit.unwrap_or(u64::MAX),
            suspended: false,
        }
    }

    fn grant(&mut self, wanted: usize) -> usize {
        if self.limit.is_none() {
            return wanted;
        }
        let granted = (wanted as u64).min(self.remaining) as usize;
        if granted == 0 && wanted > 0 {
            self.suspended = true;
        }
        granted
    }

    fn record(&mut self, used: usize) {
        if self.limit.is_some() {
            self.remaining = self.remaining.saturating_sub(used as u64);
        }
    }

    /// Refills the allowance, returning whether it was suspended.
    fn reset(&mut self) -> bool {
        if let Some(limit) = self.limit {
            self.remaining = limit;
        }
        std::mem::replace(&mut self.suspended, false)
    }
}

/// Directions resumed by a [`Throttle::reset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Resumed {
    pub read: bool,
    pub write: bool,
}

/// Read and write allowances of a single transport.
///
/// The transport asks for a grant before every socket call and records what
/// the call actually moved. A zero grant marks the direction suspended; the
/// reset timer clears the mark and reports which directions to wake.
#[derive(Debug, Clone)]
pub struct Throttle {
    read: Allowance,
    write: Allowance,
}

impl Throttle {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            read: Allowance::new(config.read_bytes_per_interval),
            write: Allowance::new(config.write_bytes_per_interval),
        }
    }

    /// Bytes that may be read now, at most `wanted`.
    pub fn grant_read(&mut self, wanted: usize) -> usize {
        self.read.grant(wanted)
    }

    pub fn record_read(&mut self, used: usize) {
        self.read.record(used);
    }

    /// Bytes that may be written now, at most `wanted`.
    pub fn grant_write(&mut self, wanted: usize) -> usize {
        self.write.grant(wanted)
    }

    pub fn record_write(&mut self, used: usize) {
        self.write.record(used);
    }

    pub fn read_suspended(&self) -> bool {
        self.read.suspended
    }

    pub fn write_suspended(&self) -> bool {
        self.write.suspended
    }

    /// Starts a new interval.
    pub fn reset(&mut self) -> Resumed {
        Resumed {
            read: self.read.reset(),
            write: self.write.reset(),
        }
    }
}
