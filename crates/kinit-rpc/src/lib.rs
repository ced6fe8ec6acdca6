//! Kinit RPC client library.
//!
//! Provides the [`RemoteService`] boundary used by the wallet core, typed
//! [`WebRequest`]s with "ok"-status checking, the catalogue of backend
//! endpoints in [`requests`], a reqwest-backed [`RpcClient`], and the
//! [`LedgerRpc`] gateway client for account lookup and transaction submission.
//!
//! # Example
//!
//! ```ignore
//! use kinit_rpc::{requests, RpcClient};
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = RpcClient::new("http://localhost:8000").unwrap();
//!     let offers = requests::offers().load(&backend).await.unwrap();
//!     println!("{} offers", offers.len());
//! }
//! ```

pub mod error;
pub mod client;
pub mod request;
pub mod requests;
pub mod ledger;

pub use client::{RpcClient, RpcConfig};
pub use error::RpcError;
pub use ledger::LedgerRpc;
pub use request::{Method, RawRequest, RemoteService, WebRequest};
pub use requests::SignableTransaction;
