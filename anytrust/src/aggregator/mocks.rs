//! Committee members with injectable failures, and captured logs to check how they are reported.

use super::ServiceDetails;
use crate::{bls::PrivateKey, memory, signer::SignAfterStore, Certificate, Error, Writer};
use bytes::Bytes;
use commonware_runtime::{deterministic, Clock};
use rand::{rngs::StdRng, SeedableRng};
use std::{
    fmt, io,
    sync::{Arc, Mutex},
    time::Duration,
};
use tracing::{subscriber::DefaultGuard, Level};
use tracing_subscriber::fmt::MakeWriter;

/// How a [Member] responds to a store request.
#[derive(Clone, Copy, Debug)]
pub enum Behavior {
    /// Store and sign honestly.
    Success,
    /// Fail without storing.
    ImmediateError,
    /// Never respond within any reasonable request timeout.
    TooSlow,
    /// Respond honestly after a delay.
    Delayed(Duration),
    /// Store and sign a different message.
    DataCorruption,
    /// Store and sign with a different timeout.
    WrongTimeout,
    /// Return a certificate signed by a different key.
    WrongKey,
}

/// A committee member backed by a [SignAfterStore] over [memory::Storage].
#[derive(Clone)]
pub struct Member {
    context: deterministic::Context,
    signer: SignAfterStore<memory::Storage>,
    behavior: Behavior,
    label: String,
}

impl Member {
    pub fn storage(&self) -> &memory::Storage {
        self.signer.storage()
    }
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Member{{{}, {:?}}}", self.label, self.behavior)
    }
}

impl Writer for Member {
    async fn store(&self, message: Bytes, timeout: u64) -> Result<Certificate, Error> {
        match self.behavior {
            Behavior::Success => self.signer.store(message, timeout).await,
            Behavior::ImmediateError => Err(Error::Storage("injected failure".into())),
            Behavior::TooSlow => {
                self.context.sleep(Duration::from_secs(60 * 60)).await;
                self.signer.store(message, timeout).await
            }
            Behavior::Delayed(delay) => {
                self.context.sleep(delay).await;
                self.signer.store(message, timeout).await
            }
            Behavior::DataCorruption => {
                let mut corrupted = message.to_vec();
                corrupted.push(0);
                self.signer.store(Bytes::from(corrupted), timeout).await
            }
            Behavior::WrongTimeout => self.signer.store(message, timeout + 1).await,
            Behavior::WrongKey => {
                let mut certificate = self.signer.store(message, timeout).await?;
                let imposter = PrivateKey::from_seed(u64::MAX);
                certificate.signature = imposter.sign(&certificate.signable_fields());
                Ok(certificate)
            }
        }
    }
}

/// Creates one member per behavior, with masks assigned in order and keys derived from `seed`.
pub fn committee(
    context: &deterministic::Context,
    seed: u64,
    behaviors: &[Behavior],
) -> Vec<ServiceDetails<Member>> {
    let mut rng = StdRng::seed_from_u64(seed);
    behaviors
        .iter()
        .enumerate()
        .map(|(i, behavior)| {
            let private = PrivateKey::from_rng(&mut rng);
            let public_key = private.public_key();
            let label = format!("member-{i}");
            let member = Member {
                context: context.clone(),
                signer: SignAfterStore::new(private, memory::Storage::new()).unwrap(),
                behavior: *behavior,
                label: label.clone(),
            };
            ServiceDetails::new(member, public_key, 1 << i, label).unwrap()
        })
        .collect()
}

/// Log lines emitted on the current thread while a capture is active.
#[derive(Clone, Default)]
pub struct Logs(Arc<Mutex<Vec<u8>>>);

impl Logs {
    /// Captures events at `level` and above until the returned guard is dropped.
    pub fn capture(level: Level) -> (Self, DefaultGuard) {
        let logs = Self::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .with_max_level(level)
            .finish();
        let guard = tracing::subscriber::set_default(subscriber);
        (logs, guard)
    }

    /// Returns true if any captured line contains `pattern`.
    pub fn contains(&self, pattern: &str) -> bool {
        let buf = self.0.lock().unwrap();
        String::from_utf8_lossy(&buf)
            .lines()
            .any(|line| line.contains(pattern))
    }
}

impl io::Write for Logs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for Logs {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
