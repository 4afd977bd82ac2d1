//! wp-link: messaging-library seam for wp-gateway
//!
//! The WhatsApp protocol itself lives in a third-party library hosted by a
//! separate bridge process. This crate defines the client traits, the
//! child-process bridge that implements them, and the worker that drives a
//! pairing session from "start" to "credentials delivered".

pub mod bridge;
pub mod client;
pub mod qr;
pub mod service;
pub mod worker;

pub use bridge::BridgeConnector;
pub use client::{DisconnectReason, LinkClient, LinkConnection, LinkConnector, LinkEvent};
pub use qr::{render_qr_data_url, render_qr_terminal};
pub use service::{PairingService, SweepReport};
pub use worker::{PairingWorker, WorkerSettings, credentials_message};
