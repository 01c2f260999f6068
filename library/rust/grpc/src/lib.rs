//! k1s0-grpc: サービス共通の gRPC トランスポート基盤。
//!
//! プラットフォーム内で gRPC を話す各サービスが必要とする部品を提供する:
//!
//! - [`tls`]: PEM 証明書マテリアルを mTLS トランスポート設定へ読み込む
//!   (相手方の証明書は常に必須かつ検証される)。
//! - [`client`]: エンドポイントへダイヤルし、チャネルを呼び出し元提供の
//!   サービスファサードでラップするジェネリックな [`Connection`] ファクトリ。
//! - [`server`]: バインドし、呼び出し元のサービスを登録し、サニタイズ
//!   ミドルウェアを適用してサーブする [`GrpcServer`] ランタイム。
//! - [`middleware`]: エラーステータスがプロセス外に出る前にスクラブされる
//!   唯一の地点 [`SanitizeStatusLayer`]。ワイヤに出るのは `NOT_FOUND`、
//!   `ALREADY_EXISTS`、`INVALID_ARGUMENT`、`INTERNAL` のみで、`INTERNAL` は
//!   常に固定の汎用メッセージを持つ。
//!
//! 構築 (TLS 読み込み、ダイヤル、バインド) はプロセス起動時に行う前提。
//! そこでの失敗は運用側の設定不備であり、エラーとして返すので呼び出し元の
//! 起動シーケンスで終了できる。

pub mod client;
pub mod middleware;
pub mod server;
pub mod tls;

pub use client::{ClientError, Connection, ConnectionConfig};
pub use middleware::SanitizeStatusLayer;
pub use server::{
    GrpcServer, RegisterService, ServerBuilder, ServerConfig, ServerError, ServerRouter,
};
pub use tls::{TlsConfig, TlsError};

// 各サービスはエラー分類もこの crate 経由で利用する
pub use k1s0_status::{error_to_status, ErrorKind, ServiceError, INTERNAL_SERVER_ERROR};
