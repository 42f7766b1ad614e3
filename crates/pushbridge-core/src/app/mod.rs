//! App - アプリケーション層
//!
//! ports を組み合わせて pull queue → HTTP push のブリッジを実装します。
//!
//! # 主要コンポーネント
//! - **Poller**: lease ループ（lease → dispatch → ack/renew、空なら pull backoff）
//! - **Dispatcher**: payload のデコードと HTTP push 1 回分
//! - **LeaseManager**: acknowledge / renew / delete とそのリトライ

pub mod dispatcher;
pub mod lease_manager;
pub mod poller;

// 主要な型を再エクスポート
pub use self::dispatcher::{Dispatcher, build_request};
pub use self::lease_manager::{LeaseError, LeaseManager, LeaseOp};
pub use self::poller::{Poller, PollerError, TaskPipeline};
