#![forbid(unsafe_code)]
#![expect(
    clippy::unwrap_used,
    reason = "test utility crate, unwraps are acceptable"
)]
#![expect(
    clippy::cast_possible_truncation,
    reason = "test utility crate, bit packing truncates on purpose"
)]

//! Shared test utilities for the lyra workspace.

pub mod bits;
pub mod http_server;
pub mod rng;
pub mod ts;

pub use bits::BitWriter;
pub use http_server::TestHttpServer;
pub use rng::Xorshift64;
pub use ts::*;
