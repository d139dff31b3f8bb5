//! # QLight Test Suite
//!
//! Cross-module scenarios that run real server and client handlers against
//! each other over the in-memory transport.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── harness.rs             # Server/client nodes, pipes, polling
//!     ├── qlight_handshake.rs    # Roles, capacity, authorization
//!     ├── qlight_server_flows.rs # Best peer, bodies, headers, tx pool
//!     └── qlight_client_flows.rs # Propagation, token refresh, shutdown
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p qc-tests
//! cargo test -p qc-tests integration::qlight_handshake::
//! ```

pub mod integration;
