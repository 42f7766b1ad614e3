//! pushbridge-core
//!
//! Core building blocks for the pull-to-push bridge.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（backoff, payload, task, wire, outcome, config, errors）
//! - **ports**: 抽象化レイヤー（QueueService, PushTransport）
//! - **impls**: 実装（InMemoryQueueService, ReqwestTransport）
//! - **app**: アプリケーションロジック（poller, dispatcher, lease_manager）
//! - **observability**: tracing の初期化とワーカーのカウンタ

pub mod domain;
pub mod ports;
pub mod impls;
pub mod app;
pub mod observability;

#[cfg(test)]
mod testing;
