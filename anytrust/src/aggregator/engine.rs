use super::{Config, ServiceDetails};
use crate::{
    bls::{self, PublicKey, Signature},
    keyset::MAX_KEYS,
    tree, Certificate, Digest, Error, Keyset, Writer,
};
use bytes::Bytes;
use commonware_codec::Encode;
use commonware_macros::select;
use commonware_runtime::{Clock, Spawner};
use futures::{
    channel::{mpsc, oneshot},
    SinkExt, StreamExt,
};
use std::{fmt, sync::Arc, time::Duration};
use tracing::{debug, error, trace, warn};

/// Version of the certificates produced by the [Aggregator].
pub const VERSION: u8 = 1;

/// The result of asking a single member to store a message.
struct Outcome {
    label: String,
    signers_mask: u64,
    public_key: PublicKey,
    result: Result<Signature, Error>,
}

/// Contributions of the members that formed a quorum.
struct Quorum {
    public_keys: Vec<PublicKey>,
    signatures: Vec<Signature>,
    signers_mask: u64,
}

#[derive(Clone, Copy)]
struct Thresholds {
    total: u64,
    assumed_honest: u64,
    required: u64,
    max_failures: u64,
}

impl Thresholds {
    fn insufficient(&self) -> Error {
        Error::InsufficientResponses {
            required: self.required,
            total: self.total,
            assumed_honest: self.assumed_honest,
        }
    }

    /// Returns true if one more failure would have prevented a quorum.
    ///
    /// Committees with `assumed_honest = 1` tolerate no failures and are never reported.
    fn fragile(&self, failures: u64) -> bool {
        self.max_failures > 0 && failures + 1 > self.max_failures
    }
}

struct Inner<W: Writer> {
    members: Vec<ServiceDetails<W>>,
    thresholds: Thresholds,
    request_timeout: Duration,
    keyset: Keyset,
    keyset_hash: Digest,
    keyset_bytes: Bytes,
}

/// Stores messages on every committee member and aggregates their signatures into a
/// [Certificate].
///
/// Member requests and the collector run as tasks spawned on `E`, which also provides the clock
/// that bounds each request.
#[derive(Clone)]
pub struct Aggregator<E: Spawner + Clock, W: Writer> {
    context: E,
    inner: Arc<Inner<W>>,
}

impl<E: Spawner + Clock, W: Writer> Aggregator<E, W> {
    /// Creates a new aggregator over `members`.
    ///
    /// The members' signers masks must cover bits `0..N` exactly once. The committee keyset lists
    /// each member's key at the index of its bit.
    pub fn new(
        context: E,
        cfg: Config,
        mut members: Vec<ServiceDetails<W>>,
    ) -> Result<Self, Error> {
        let total = members.len();
        if total == 0 || total > MAX_KEYS {
            return Err(Error::InvalidConfig(format!(
                "committee size must be between 1 and {MAX_KEYS}, got {total}"
            )));
        }
        let total = total as u64;
        if cfg.assumed_honest == 0 || cfg.assumed_honest > total {
            return Err(Error::InvalidConfig(format!(
                "assumed honest must be between 1 and {total}, got {}",
                cfg.assumed_honest
            )));
        }

        // Every member owns a distinct bit
        let mut seen = 0u64;
        for member in &members {
            let mask = member.signers_mask;
            if mask.count_ones() != 1 || seen & mask != 0 {
                return Err(Error::InvalidSignersMask(mask));
            }
            seen |= mask;
        }
        if seen != u64::MAX >> (64 - total) {
            return Err(Error::InvalidSignersMask(seen));
        }
        members.sort_by_key(|member| member.signers_mask);

        let keyset = Keyset::new(
            cfg.assumed_honest,
            members.iter().map(|member| member.public_key).collect(),
        )?;
        let keyset_hash = keyset.hash()?;
        let keyset_bytes = keyset.encode().freeze();
        let thresholds = Thresholds {
            total,
            assumed_honest: cfg.assumed_honest,
            required: total + 1 - cfg.assumed_honest,
            max_failures: cfg.assumed_honest - 1,
        };
        Ok(Self {
            context,
            inner: Arc::new(Inner {
                members,
                thresholds,
                request_timeout: cfg.request_timeout,
                keyset,
                keyset_hash,
                keyset_bytes,
            }),
        })
    }

    /// The committee keyset that verifies this aggregator's certificates.
    pub fn keyset(&self) -> &Keyset {
        &self.inner.keyset
    }

    pub fn keyset_hash(&self) -> Digest {
        self.inner.keyset_hash
    }

    /// Encoding of [Aggregator::keyset], for publication.
    pub fn keyset_bytes(&self) -> &[u8] {
        &self.inner.keyset_bytes
    }

    /// Number of successful stores needed to produce a certificate.
    pub fn required_successes(&self) -> u64 {
        self.inner.thresholds.required
    }

    /// Number of failed stores tolerated before giving up.
    pub fn max_allowed_failures(&self) -> u64 {
        self.inner.thresholds.max_failures
    }

    /// Requests that every member store `message`, posting each outcome to `sender`.
    fn fan_out(
        &self,
        message: &Bytes,
        timeout: u64,
        data_hash: Digest,
        sender: mpsc::Sender<Outcome>,
    ) {
        for member in &self.inner.members {
            let writer = member.writer.clone();
            let public_key = member.public_key;
            let signers_mask = member.signers_mask;
            let label = member.label.clone();
            let message = message.clone();
            let request_timeout = self.inner.request_timeout;
            let mut sender = sender.clone();
            self.context.clone().spawn(move |context| async move {
                let result = select! {
                    result = writer.store(message, timeout) => {
                        result.and_then(|certificate| {
                            check_response(&certificate, &public_key, &data_hash, timeout)
                        })
                    },
                    _ = context.sleep(request_timeout) => {
                        Err(Error::Timeout)
                    },
                };
                let _ = sender
                    .send(Outcome {
                        label,
                        signers_mask,
                        public_key,
                        result,
                    })
                    .await;
            });
        }
    }
}

/// Verifies a member's certificate against what it was asked to store.
fn check_response(
    certificate: &Certificate,
    public_key: &PublicKey,
    data_hash: &Digest,
    timeout: u64,
) -> Result<Signature, Error> {
    public_key
        .verify(&certificate.signable_fields(), &certificate.signature)
        .map_err(|_| Error::BadSignature)?;
    if certificate.data_hash != *data_hash {
        return Err(Error::HashMismatch);
    }
    if certificate.timeout != timeout {
        return Err(Error::TimeoutMismatch {
            expected: timeout,
            actual: certificate.timeout,
        });
    }
    Ok(certificate.signature)
}

/// Drains every member outcome, deciding as soon as a quorum is reached or becomes unreachable.
///
/// Draining continues after the decision (even if nobody is waiting for it) so that late
/// failures are still logged.
async fn collect(
    mut receiver: mpsc::Receiver<Outcome>,
    decision: oneshot::Sender<Result<Quorum, Error>>,
    thresholds: Thresholds,
    data_hash: Digest,
) {
    let mut decision = Some(decision);
    let mut succeeded = false;
    let mut quorum = Quorum {
        public_keys: Vec::new(),
        signatures: Vec::new(),
        signers_mask: 0,
    };
    let mut successes = 0u64;
    let mut failures = 0u64;
    while let Some(outcome) = receiver.next().await {
        match outcome.result {
            Ok(signature) => {
                trace!(member = %outcome.label, "member stored batch");
                quorum.public_keys.push(outcome.public_key);
                quorum.signatures.push(signature);
                quorum.signers_mask |= outcome.signers_mask;
                successes += 1;
            }
            Err(err) => {
                warn!(
                    member = %outcome.label,
                    signers_mask = outcome.signers_mask,
                    ?err,
                    "error from member"
                );
                failures += 1;
            }
        }

        // Decide once, then keep draining
        if decision.is_none() {
            continue;
        }
        if successes >= thresholds.required {
            let contributions = Quorum {
                public_keys: std::mem::take(&mut quorum.public_keys),
                signatures: std::mem::take(&mut quorum.signatures),
                signers_mask: quorum.signers_mask,
            };
            if let Some(decision) = decision.take() {
                let _ = decision.send(Ok(contributions));
            }
            succeeded = true;
        } else if failures > thresholds.max_failures {
            if let Some(decision) = decision.take() {
                let _ = decision.send(Err(thresholds.insufficient()));
            }
        }
    }

    // All members have responded (the channel only closes once every task has finished)
    if let Some(decision) = decision.take() {
        let _ = decision.send(Err(thresholds.insufficient()));
    }
    if succeeded && thresholds.fragile(failures) {
        error!(
            data_hash = %hex::encode(data_hash),
            failures,
            max_allowed_failures = thresholds.max_failures,
            "stored batch to enough committee members to generate a certificate, but one more failure would have prevented it"
        );
    }
    debug!(
        data_hash = %hex::encode(data_hash),
        successes,
        failures,
        all_succeeded = failures == 0,
        "drained committee responses"
    );
}

impl<E: Spawner + Clock, W: Writer> Writer for Aggregator<E, W> {
    /// Stores `message` on every member concurrently and returns once `N + 1 - H` members
    /// have returned a valid signature (or once that is no longer possible).
    ///
    /// Members that have not yet responded keep running (bounded by the request timeout)
    /// after this returns, and so do they if the returned future is dropped.
    async fn store(&self, message: Bytes, timeout: u64) -> Result<Certificate, Error> {
        let inner = &self.inner;
        let data_hash = tree::hash(&message);
        trace!(
            data_hash = %hex::encode(data_hash),
            size = message.len(),
            timeout,
            "storing batch"
        );

        // Ask every member to store the message
        let (sender, receiver) = mpsc::channel(inner.members.len());
        self.fan_out(&message, timeout, data_hash, sender);

        // Wait for a decision
        let (decision_sender, decision_receiver) = oneshot::channel();
        let thresholds = inner.thresholds;
        self.context.clone().spawn(move |_| {
            collect(receiver, decision_sender, thresholds, data_hash)
        });
        let quorum = decision_receiver.await.map_err(|_| Error::Canceled)??;

        // Assemble and check the certificate
        let certificate = Certificate {
            keyset_hash: inner.keyset_hash,
            data_hash,
            timeout,
            signers_mask: quorum.signers_mask,
            signature: bls::aggregate_signatures(&quorum.signatures),
            version: VERSION,
        };
        let public_key = bls::aggregate_public_keys(&quorum.public_keys);
        if public_key
            .verify(&certificate.signable_fields(), &certificate.signature)
            .is_err()
        {
            error!(
                data_hash = %hex::encode(data_hash),
                signers_mask = quorum.signers_mask,
                "aggregate signature verification failed"
            );
            return Err(Error::AggregateVerificationFailed);
        }
        Ok(certificate)
    }
}

impl<E: Spawner + Clock, W: Writer> fmt::Display for Aggregator<E, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Aggregator{")?;
        for (i, member) in self.inner.members.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{:#x}:{}", member.signers_mask, member.label)?;
        }
        f.write_str("}")
    }
}
