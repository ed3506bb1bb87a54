// ABOUTME: Core types and constants for the persona chat platform
// ABOUTME: Foundation crate with error handling, persona/chat/credit models, and constants
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

#![deny(unsafe_code)]

//! # Persona Core
//!
//! Foundation crate providing shared types and constants for the persona chat
//! platform. This crate is designed to change infrequently, enabling
//! incremental compilation benefits in the workspace.
//!
//! ## Modules
//!
//! - **errors**: Unified error handling with `AppError`, `ErrorCode`, and HTTP mapping
//! - **constants**: Chat metering and sampling constants
//! - **models**: Persona, conversation, message, and credit transaction records

/// Unified error handling system with standard error codes and HTTP responses
pub mod errors;

/// Application constants organized by domain
pub mod constants;

/// Core data models (Persona, Conversation, Message, `CreditTransaction`)
pub mod models;
