//! AlbumVault - album sharing backend
//!
//! This library provides album access control, tiered storage quotas,
//! accounts with two-factor sign-in and signed media delivery.

pub mod api;
pub mod config;
pub mod db;
pub mod jobs;
pub mod models;
pub mod services;
pub mod storage;
