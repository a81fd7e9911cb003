//! Unit tests for ServerCore.

mod accounts;
mod buffer_sync;
mod helpers;
