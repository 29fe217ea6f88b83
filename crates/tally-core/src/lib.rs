// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for the Tally analytics client.
//!
//! This crate defines the two kinds of reportable facts, their identity and
//! routing, and how they are flattened and encoded for the ingestion API:
//!
//! - [`Event`]: a discrete occurrence, delivered to the `track` endpoint
//! - [`ProfileUpdate`]: a mutation of a user profile, delivered to `engage`
//! - [`Entity`]: the sum of both, as accepted by the delivery pipeline
//! - [`wire`]: JSON + base64 encoding of single items and batches

pub mod entity;
pub mod error;
pub mod event;
pub mod id;
pub mod profile;
pub mod properties;
pub mod wire;

pub use entity::{Endpoint, Entity, EntityKind, Trackable};
pub use error::{EntityIdError, ValidationError, WireError};
pub use event::{Event, ALIAS_EVENT};
pub use id::EntityId;
pub use profile::{ProfileUpdate, UpdateOperation};
pub use properties::Properties;
pub use wire::MAX_BATCH_SIZE;
