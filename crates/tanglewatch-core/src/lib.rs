//! Core types and shared utilities for the Tanglewatch feed monitor.
//!
//! This crate provides:
//! - The event category vocabulary and frame classification table
//! - Prometheus metrics helpers

mod event;
pub mod metrics;

pub use event::{
    classify, subscription_topics, Category, Classified, FrameLayout, CATEGORY_COUNT,
};
