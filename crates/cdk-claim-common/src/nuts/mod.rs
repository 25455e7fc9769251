//! Nuts
//!
//! See all at <https://github.com/cashubtc/nuts>

pub mod nut00;
pub mod nut01;
pub mod nut02;
pub mod nut03;
pub mod nut04;
pub mod nut05;
pub mod nut06;
pub mod nut09;
pub mod nut10;
pub mod nut11;
pub mod nut13;
pub mod nut17;
pub mod nut20;

pub use nut00::{
    BlindSignature, BlindedMessage, CurrencyUnit, PaymentMethod, PreMint, PreMintSecrets, Proof,
    Proofs, ProofsMethods, Witness,
};
pub use nut01::{Keys, KeysResponse, PublicKey, SecretKey};
pub use nut02::{Id, KeySet, KeySetInfo, KeySetVersion, KeysetResponse};
pub use nut03::{SwapRequest, SwapResponse};
pub use nut04::{MintQuoteBolt11Request, MintQuoteBolt11Response, MintRequest, MintResponse, QuoteState};
pub use nut05::{MeltQuoteBolt11Request, MeltQuoteBolt11Response, MeltQuoteState, MeltRequest};
pub use nut06::MintInfo;
pub use nut09::{RestoreRequest, RestoreResponse};
pub use nut11::P2PKWitness;
