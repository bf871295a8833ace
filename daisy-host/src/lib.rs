//! # daisy-host: Daisy Host Service
//!
//! Long-running service that owns the session control plane for one
//! streaming host. It loads a TOML configuration, pings the capture
//! service over TCP, issues pairing codes, and keeps the health poller
//! and session reaper running until Ctrl-C.
//!
//! | Module     | Purpose                                              |
//! |------------|------------------------------------------------------|
//! | `config`   | `HostConfig` TOML sections and conversion to core    |
//! | `probe`    | `TcpProbe` for the capture-service dependency        |
//! | `detached` | Stand-in transport and pipeline with nothing linked  |
//! | `service`  | `HostService` run loop and stop handle               |

pub mod config;
pub mod detached;
pub mod probe;
pub mod service;
