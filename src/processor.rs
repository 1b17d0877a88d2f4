//! Session orchestration.
//!
//! A [`Processor`] runs encrypt and decrypt sessions through
//! `Validating → Preparing → Transferring → Finalizing → Done`. Blocking work
//! (walking inputs, archiving into the frame writer, extracting from the frame
//! reader) runs on tokio's blocking pool while the controller races it against
//! errors, caller cancellation, the deadline and OS interrupts. Whatever ends
//! the session, the temporary resources it registered are removed before the
//! call returns and exactly one `End` or `Error` status is published.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytesize::ByteSize;
use tokio::task::{JoinHandle, spawn_blocking};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::archive::{self, Root};
use crate::config::{CHUNK_SIZE, EncryptionConfig};
use crate::error::{Error, Result};
use crate::file::{TempRegistry, list_entries, total_size, validate_decryption, validate_encryption, validate_password};
use crate::frame::{FrameReader, FrameWriter};
use crate::secret::Password;
use crate::session::{Scope, Session};
use crate::status::{ProgressTracker, Status, StatusBus};
use crate::types::{Processing, Stage};

const PREPARE_PERCENT: f64 = 1.0;
const TRANSFER_START: f64 = 2.0;
const TRANSFER_SPAN: f64 = 96.0;
const FINALIZE_PERCENT: f64 = 99.0;
const DONE_PERCENT: f64 = 100.0;

pub struct Processor {
    config: EncryptionConfig,
    status: StatusBus,
    registry: TempRegistry,
    timeout: Option<Duration>,
    handle_signals: bool,
}

impl Processor {
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `config` does not validate.
    pub fn new(config: EncryptionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, status: StatusBus::new(), registry: TempRegistry::new(), timeout: None, handle_signals: true })
    }

    /// Aborts every session that runs longer than `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Whether SIGINT/SIGTERM cancel the running session (on by default).
    #[must_use]
    pub fn with_signal_handling(mut self, enabled: bool) -> Self {
        self.handle_signals = enabled;
        self
    }

    /// Publishes status on `status` instead of a private bus.
    #[must_use]
    pub fn with_status(mut self, status: StatusBus) -> Self {
        self.status = status;
        self
    }

    /// Shares temporary resource bookkeeping with other processors.
    #[must_use]
    pub fn with_registry(mut self, registry: TempRegistry) -> Self {
        self.registry = registry;
        self
    }

    #[inline]
    pub fn status(&self) -> &StatusBus {
        &self.status
    }

    #[inline]
    pub fn registry(&self) -> &TempRegistry {
        &self.registry
    }

    #[inline]
    pub fn config(&self) -> &EncryptionConfig {
        &self.config
    }

    /// Archives, compresses and seals `inputs` into a new container at `output`.
    ///
    /// # Errors
    ///
    /// Fails fast with a validation error before any background work starts;
    /// otherwise returns the first error of the session, [`Error::Canceled`] or
    /// [`Error::DeadlineExceeded`]. A partially written `output` is removed.
    pub async fn encrypt(&self, inputs: &[PathBuf], output: &Path, password: &Password, cancel: &CancellationToken) -> Result<()> {
        let mut session = self.session(Processing::Encryption, cancel);
        self.status.publish(&Status::Start);
        let result = self.run_encryption(&mut session, inputs, output, password).await;
        self.conclude(&mut session, result)
    }

    /// Opens the container at `input` and extracts its entries into `output_dir`.
    ///
    /// Entries are unpacked into a staging directory inside `output_dir` and
    /// only moved into place once every chunk has been authenticated.
    ///
    /// # Errors
    ///
    /// [`Error::AuthenticationFailure`] for a wrong password or tampered
    /// container, [`Error::CorruptHeader`] for a missing trailer, plus the
    /// errors of [`Processor::encrypt`].
    pub async fn decrypt(&self, input: &Path, output_dir: &Path, password: &Password, cancel: &CancellationToken) -> Result<()> {
        let mut session = self.session(Processing::Decryption, cancel);
        self.status.publish(&Status::Start);
        let result = self.run_decryption(&mut session, input, output_dir, password).await;
        self.conclude(&mut session, result)
    }

    async fn run_encryption(&self, session: &mut Session, inputs: &[PathBuf], output: &Path, password: &Password) -> Result<()> {
        self.update("Validating inputs", 0.0);
        let names = validate_encryption(inputs, output)?;
        validate_password(password, self.config.min_password_length)?;
        session.ensure_live()?;

        session.enter(Stage::Preparing);
        self.update("Listing inputs", PREPARE_PERCENT);
        let roots: Vec<Root> = inputs.iter().cloned().zip(names).map(|(path, name)| Root { path, name }).collect();
        let listing = inputs.to_vec();
        let entries = session.wait(spawn_blocking(move || list_entries(&listing))).await?;
        let total = total_size(&entries);
        info!(inputs = roots.len(), entries = entries.len(), size = %ByteSize::b(total), output = %output.display(), "encrypting");

        session.enter(Stage::Transferring);
        let file = File::create_new(output)?;
        session.track(output);

        let tracker = ProgressTracker::new(total, TRANSFER_START, TRANSFER_SPAN);
        let poller = self.spawn_poller(Processing::Encryption, tracker.clone(), session.scope());
        let config = self.config.clone();
        let password = Password::new(password.expose_secret());
        let scope = session.scope().clone();
        let pump = spawn_blocking(move || report(&scope, seal_inputs(file, &roots, &config, &password, &tracker, &scope)));
        let pumped = session.wait(pump).await;
        poller.stop().await;
        let mut frames = pumped?;

        session.enter(Stage::Finalizing);
        self.update("Writing block-size trailer", FINALIZE_PERCENT);
        let scope = session.scope().clone();
        let written = session
            .wait(spawn_blocking(move || {
                let result = frames.finalize().and_then(|()| {
                    let written = frames.written();
                    let file = frames.into_inner().into_inner().map_err(|e| Error::from(e.into_error()))?;
                    file.sync_all()?;
                    Ok(written)
                });
                report(&scope, result)
            }))
            .await?;
        session.release(output);

        session.enter(Stage::Done);
        info!(output = %output.display(), size = %ByteSize::b(written), "encryption finished");
        self.update(format!("Encrypted into {}", output.display()), DONE_PERCENT);
        Ok(())
    }

    async fn run_decryption(&self, session: &mut Session, input: &Path, output_dir: &Path, password: &Password) -> Result<()> {
        self.update("Validating container", 0.0);
        validate_decryption(input, output_dir)?;
        session.ensure_live()?;

        session.enter(Stage::Preparing);
        self.update("Reading container", PREPARE_PERCENT);
        let total = tokio::fs::metadata(input).await?.len();
        info!(input = %input.display(), size = %ByteSize::b(total), output = %output_dir.display(), "decrypting");

        session.enter(Stage::Transferring);
        let staging = session.create_staging_dir(output_dir)?;

        let tracker = ProgressTracker::new(total, TRANSFER_START, TRANSFER_SPAN);
        let poller = self.spawn_poller(Processing::Decryption, tracker.clone(), session.scope());
        let config = self.config.clone();
        let password = Password::new(password.expose_secret());
        let scope = session.scope().clone();
        let (source, target) = (input.to_path_buf(), staging.clone());
        let pump = spawn_blocking(move || report(&scope, open_container(&source, &target, &config, &password, tracker, &scope)));
        let pumped = session.wait(pump).await;
        poller.stop().await;
        pumped?;

        session.enter(Stage::Finalizing);
        self.update("Moving extracted entries", FINALIZE_PERCENT);
        let (staged, dest) = (staging.clone(), output_dir.to_path_buf());
        let moved = session.wait(spawn_blocking(move || promote(&staged, &dest))).await?;
        session.discard(&staging)?;

        session.enter(Stage::Done);
        info!(entries = moved, output = %output_dir.display(), "decryption finished");
        self.update(format!("Decrypted {moved} entries into {}", output_dir.display()), DONE_PERCENT);
        Ok(())
    }

    fn session(&self, operation: Processing, cancel: &CancellationToken) -> Session {
        let deadline = self.timeout.map(|timeout| Instant::now() + timeout);
        Session::new(operation, cancel, deadline, self.handle_signals, self.registry.clone())
    }

    fn conclude(&self, session: &mut Session, result: Result<()>) -> Result<()> {
        match &result {
            Ok(()) => self.status.publish(&Status::End),
            Err(err) => {
                warn!(stage = %session.stage(), "session aborted: {err}");
                session.abort();
                self.status.publish(&Status::Error(err.to_string()));
            }
        }
        result
    }

    fn update(&self, message: impl Into<String>, percent: f64) {
        self.status.publish(&Status::update(message, percent));
    }

    fn spawn_poller(&self, operation: Processing, tracker: ProgressTracker, scope: &Scope) -> Poller {
        let stop = scope.token().child_token();
        let token = stop.clone();
        let status = self.status.clone();
        let period = self.config.progress_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    _ = ticker.tick() => status.publish(&Status::update(operation.label(), tracker.percent())),
                }
            }
        });
        Poller { stop, handle }
    }
}

/// Periodic progress publisher of the transfer stage.
struct Poller {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

impl Poller {
    /// Returns once the last update has been published.
    async fn stop(self) {
        self.stop.cancel();
        let _ = self.handle.await;
    }
}

/// Forwards a failure of blocking work to the session unless the session is already ending.
fn report<T>(scope: &Scope, result: Result<T>) -> Result<T> {
    if let Err(err) = &result
        && !scope.is_cancelled()
    {
        scope.fail(err.clone());
    }
    result
}

fn seal_inputs(file: File, roots: &[Root], config: &EncryptionConfig, password: &Password, tracker: &ProgressTracker, scope: &Scope) -> Result<FrameWriter<BufWriter<File>>> {
    let frames = FrameWriter::new(BufWriter::new(file), config, password, scope.clone())?;
    let chunker = BufWriter::with_capacity(CHUNK_SIZE, frames);
    let chunker = archive::archive(roots, chunker, config.compression, config.compression_level, Some(tracker), scope)?;
    chunker.into_inner().map_err(|e| Error::from(e.into_error()))
}

fn open_container(input: &Path, staging: &Path, config: &EncryptionConfig, password: &Password, tracker: ProgressTracker, scope: &Scope) -> Result<()> {
    let reader = FrameReader::open(File::open(input)?, config, password, scope.clone())?.with_progress(tracker.clone());
    if reader.remaining_chunks() > 0 {
        archive::extract(reader, staging, config.compression, scope)?;
    }
    tracker.finish();
    Ok(())
}

/// Moves every staged entry into `dest`; refuses if any name is already taken there.
fn promote(staging: &Path, dest: &Path) -> Result<usize> {
    let entries = fs::read_dir(staging)?.collect::<std::io::Result<Vec<_>>>()?;
    for entry in &entries {
        let target = dest.join(entry.file_name());
        if target.symlink_metadata().is_ok() {
            return Err(Error::InvalidOutputPath { path: target, reason: "an entry with this name already exists" });
        }
    }
    for entry in &entries {
        fs::rename(entry.path(), dest.join(entry.file_name()))?;
    }
    Ok(entries.len())
}
