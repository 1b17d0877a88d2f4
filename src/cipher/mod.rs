//! # Cryptographic Operations Module
//!
//! - [`RandomPool`]: buffered CSPRNG blocks for salts and nonces
//! - [`KeyDeriver`]: one Argon2id derivation per session behind a ready gate
//! - [`AeadCodec`]: per-chunk XChaCha20-Poly1305 with counter-bound associated data
//!
//! ## Security Guarantees
//!
//! - XChaCha20-Poly1305: IND-CCA2 secure, 192-bit random nonces
//! - Argon2id: memory-hard key derivation resistant to GPU/ASIC attacks
//! - Chunk order is authenticated, so reordering or splicing is detected

mod codec;
mod derive;
mod random;

pub use codec::{AeadCodec, Counter};
pub use derive::KeyDeriver;
pub use random::RandomPool;
