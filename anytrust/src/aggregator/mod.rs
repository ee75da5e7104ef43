//! Produce certificates from a quorum of committee members.
//!
//! The [Aggregator] asks each of `N` committee members to store a message and, once
//! `N + 1 - H` of them (where `H` is [Config::assumed_honest]) have returned a valid signature,
//! combines their signatures into a single [crate::Certificate]. Even if all `N - H` members not
//! assumed honest are corrupt, at least one honest member signed any certificate it returns.
//!
//! # Architecture
//!
//! Every store spawns one task per member. Each task calls the member's [crate::Writer] under
//! [Config::request_timeout] and checks the response before posting it to a shared queue:
//!
//! - The signature must verify against the member's [ServiceDetails::public_key].
//! - The data hash must match the [tree](crate::tree) hash of the message.
//! - The timeout must match the requested timeout.
//!
//! A response that fails any check counts the same as an error returned by the member.
//!
//! A collector task drains the queue in arrival order and emits a decision as soon as enough
//! members have succeeded or so many have failed that success is no longer possible. The
//! caller only waits for that decision. The collector keeps draining afterwards so that late
//! failures are still logged (and warns loudly if one more failure would have broken quorum).
//!
//! The resulting [crate::Certificate] lists whichever members responded first in its
//! signers mask: any `N + 1 - H` members verify against the committee [crate::Keyset].
//!
//! # Cancellation
//!
//! Dropping the future returned by [crate::Writer::store] stops waiting for a decision but does
//! not abort the member tasks or the collector. Each member task is still bounded by
//! [Config::request_timeout].

mod config;
pub use config::{Config, ServiceDetails};
mod engine;
pub use engine::{Aggregator, VERSION};

#[cfg(test)]
pub mod mocks;
