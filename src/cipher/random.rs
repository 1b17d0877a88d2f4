//! Background randomness for salts and nonces.
//!
//! A dedicated thread keeps a bounded queue topped up with blocks read from
//! the operating system CSPRNG, so the codec rarely pays for a syscall on the
//! hot path. A full queue blocks the thread (backpressure); an empty one
//! blocks [`RandomPool::take`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use flume::{Receiver, Sender};
use rand::rand_core::{OsRng, TryRngCore};
use tracing::{debug, warn};

use crate::error::{Error, Result};

type Block = Result<Vec<u8>>;

pub struct RandomPool {
    blocks: Receiver<Block>,
    stopped: Arc<AtomicBool>,
    block_size: usize,
}

impl RandomPool {
    /// Spawns the filler thread.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RandomSource`] if the thread cannot be spawned.
    pub fn start(block_size: usize, capacity: usize) -> Result<Self> {
        let (tx, rx) = flume::bounded(capacity);
        let stopped = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&stopped);
        thread::Builder::new()
            .name("random-pool".into())
            .spawn(move || fill(&tx, &flag, block_size))
            .map_err(|e| Error::RandomSource(format!("failed to spawn random pool: {e}")))?;

        debug!(block_size, capacity, "random pool started");
        Ok(Self { blocks: rx, stopped, block_size })
    }

    /// Returns `n` fresh random bytes, blocking until a block is available.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RandomSource`] if `n` exceeds the block size, the pool
    /// was stopped, or the generator failed.
    pub fn take(&self, n: usize) -> Result<Vec<u8>> {
        if n > self.block_size {
            return Err(Error::RandomSource(format!("requested {n} bytes from a pool of {}-byte blocks", self.block_size)));
        }
        if self.stopped.load(Ordering::Acquire) {
            return Err(Error::RandomSource("random pool is stopped".into()));
        }

        match self.blocks.recv() {
            Ok(Ok(mut block)) => {
                block.truncate(n);
                Ok(block)
            }
            Ok(Err(err)) => Err(err),
            Err(_) => Err(Error::RandomSource("random pool generator exited".into())),
        }
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Stops the generator and discards every buffered block. Idempotent.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            debug!("random pool stopped");
        }
        // Draining frees a slot so a filler blocked on a full queue observes the flag.
        self.blocks.drain().for_each(drop);
    }
}

impl Drop for RandomPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn fill(tx: &Sender<Block>, stopped: &AtomicBool, block_size: usize) {
    while !stopped.load(Ordering::Acquire) {
        let mut block = vec![0u8; block_size];
        if let Err(e) = OsRng.try_fill_bytes(&mut block) {
            warn!("operating system rng failed: {e}");
            let _ = tx.send(Err(Error::RandomSource(format!("rng failed: {e}"))));
            return;
        }
        if tx.send(Ok(block)).is_err() {
            return;
        }
    }
}
