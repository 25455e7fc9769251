//! Utilities shared by the claim engine crates

use bitcoin::secp256k1::{rand, All, Secp256k1};
use once_cell::sync::Lazy;
use web_time::{SystemTime, UNIX_EPOCH};

/// Secp256k1 global context
pub static SECP256K1: Lazy<Secp256k1<All>> = Lazy::new(|| {
    let mut ctx = Secp256k1::new();
    let mut rng = rand::thread_rng();
    ctx.randomize(&mut rng);
    ctx
});

/// Seconds since unix epoch
pub fn unix_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Hex helpers over `bitcoin::hex`
pub mod hex {
    use bitcoin::hex::{DisplayHex, FromHex, HexToBytesError};

    /// Lower case hex encoding
    pub fn encode<T: AsRef<[u8]>>(data: T) -> String {
        data.as_ref().to_lower_hex_string()
    }

    /// Decode hex string into bytes
    pub fn decode<T: AsRef<str>>(hex: T) -> Result<Vec<u8>, HexToBytesError> {
        Vec::<u8>::from_hex(hex.as_ref())
    }
}

/// Return early with an error if a condition is not satisfied
#[macro_export]
macro_rules! ensure_cdk {
    ($cond:expr, $err:expr) => {
        if !$cond {
            return Err($err);
        }
    };
}
