//! Tencent Cloud COS backend
//!
//! Only the object operations blob storage needs: signed upload, HEAD,
//! delete and presigned download URLs. No vendor SDK is used.

pub mod client;
pub mod provider;
pub mod signer;

pub use provider::CosStorage;
