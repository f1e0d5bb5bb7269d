//! Resend request lifetime: issue, re-issue with backoff, give up.

use std::collections::HashSet;
use std::time::Instant;

use crate::config::ResendPolicy;
use crate::types::{ResendRequest, SequenceRange};

/// What happened to a request whose deadline passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Expiry {
    /// Issued again with a narrowed range and a longer deadline
    Reissued,
    /// Every requested unit arrived in the meantime
    Resolved,
    /// Retry cap reached, the missing units are given up
    Exhausted,
}

/// First issue of a request for `range`.
pub(crate) fn open(frame_id: u64, range: SequenceRange, now: Instant, policy: &ResendPolicy) -> ResendRequest {
    ResendRequest { frame_id, range, deadline: now + policy.timeout_for_attempt(1), attempts: 1 }
}

/// Smallest range covering the sequences of `range` that have not arrived.
pub(crate) fn still_missing(range: SequenceRange, received: &HashSet<u32>) -> Option<SequenceRange> {
    let first = (range.first..=range.last).find(|s| !received.contains(s))?;
    let last = (first..=range.last).rev().find(|s| !received.contains(s))?;
    Some(SequenceRange::new(first, last))
}

pub(crate) fn refresh(
    request: &mut ResendRequest,
    received: &HashSet<u32>,
    now: Instant,
    policy: &ResendPolicy,
) -> Expiry {
    let Some(range) = still_missing(request.range, received) else {
        return Expiry::Resolved;
    };
    if request.attempts >= policy.max_attempts {
        return Expiry::Exhausted;
    }
    request.attempts += 1;
    request.range = range;
    request.deadline = now + policy.timeout_for_attempt(request.attempts);
    Expiry::Reissued
}
