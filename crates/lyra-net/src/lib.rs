//! HTTP transport for manifests, keys and segments.
//!
//! [`Net`] is the seam the HLS engine talks to. [`HttpClient`] implements it
//! over `reqwest`; [`NetExt`] stacks a request-phase [`TimeoutNet`] and a
//! [`RetryNet`] with exponential backoff on top of any implementation.

#![forbid(unsafe_code)]

mod client;
mod error;
mod retry;
mod timeout;
mod traits;
mod types;

pub use crate::{
    client::HttpClient,
    error::{NetError, NetResult},
    retry::{DefaultRetryPolicy, RetryNet, RetryPolicyTrait},
    timeout::TimeoutNet,
    traits::{ByteStream, Net, NetExt},
    types::{Headers, NetOptions, RetryPolicy},
};
