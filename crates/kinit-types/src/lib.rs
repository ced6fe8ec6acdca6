//! Core types and constants for the Kinit wallet.
//!
//! This crate provides the foundational types used across all Kinit crates:
//! network and ledger-version identifiers, public address encoding/decoding,
//! exact balance amounts, and the stable names of persisted state.

pub mod address;
pub mod amount;
pub mod constants;

pub use address::{AddressError, PublicAddress};
pub use amount::{AmountError, Balance};
pub use constants::{
    keys, LedgerVersion, Network, DECIMALS, DEFAULT_APP_ID, MAX_MEMO_LEN, MEMO_VERSION,
    QUARKS_PER_KIN,
};
