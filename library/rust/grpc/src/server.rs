//! gRPC サーバランタイム。
//!
//! [`GrpcServer`] は待ち受け設定と、呼び出し元提供の [`RegisterService`]
//! 実装を所有する。ランタイム自身はどんな RPC メソッドが存在するかを
//! 知らない。登録は構築後・サービング開始前にちょうど 1 回呼ばれる。
//! [`SanitizeStatusLayer`] ミドルウェアは常に全登録サービスの手前に
//! 挿入されるため、ハンドラがステータスサニタイズを迂回することはできない。
//!
//! TLS マテリアルは [`GrpcServer::new`] で、ソケットのバインドは
//! [`GrpcServer::run`] で行う。どちらの失敗も [`ServerError`] として返し、
//! プロセスを終了するかどうかは呼び出し元の起動シーケンスが決める。

use serde::Deserialize;
use tokio::net::TcpListener;
use tonic::transport::server::{Router, TcpIncoming};
use tonic::transport::{Server, ServerTlsConfig};
use tower::layer::util::{Identity, Stack};
use tracing::info;

use crate::middleware::SanitizeStatusLayer;
use crate::tls::{server_tls_config, TlsConfig, TlsError};

/// サニタイズミドルウェア適用済みの tonic サーバビルダ。
pub type ServerBuilder = Server<Stack<SanitizeStatusLayer, Identity>>;

/// サービス登録後に得られるルータ。
pub type ServerRouter = Router<Stack<SanitizeStatusLayer, Identity>>;

/// RegisterService はサーバへの RPC サービス登録を表す trait。
pub trait RegisterService {
    /// 実装側のサービスを取り付ける。最初の `add_service` でビルダが
    /// [`ServerRouter`] に変わり、以降のサービスはルータ側にチェーンする。
    fn register(&self, server: &mut ServerBuilder) -> ServerRouter;
}

/// 待ち受けエンドポイント設定。
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: String,
    #[serde(default)]
    pub tls: TlsConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error("failed to apply TLS configuration: {0}")]
    TlsSetup(#[source] tonic::transport::Error),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to configure listener: {0}")]
    Listener(Box<dyn std::error::Error + Send + Sync>),

    #[error("gRPC server terminated: {0}")]
    Serve(#[source] tonic::transport::Error),
}

/// gRPC サーバハンドル。構築してから [`GrpcServer::run`] する。
#[derive(Debug)]
pub struct GrpcServer<H> {
    cfg: ServerConfig,
    handler: H,
    tls: Option<ServerTlsConfig>,
}

impl<H: RegisterService> GrpcServer<H> {
    /// サーバハンドルを構築する。TLS 有効時は mTLS コンテキストをこの時点で
    /// 読み込み、証明書の問題を起動時に表面化させる。
    pub fn new(cfg: ServerConfig, handler: H) -> Result<Self, ServerError> {
        let tls = if cfg.tls.enable {
            Some(server_tls_config(&cfg.tls)?)
        } else {
            None
        };

        Ok(Self { cfg, handler, tls })
    }

    /// `host:port` をバインドし、リスナーが終了するか致命的なサービング
    /// エラーが起きるまでサーブする。監視付き再起動はこのランタイムの外の
    /// 運用の関心事であり、ここでは行わない。
    pub async fn run(self) -> Result<(), ServerError> {
        let addr = format!("{}:{}", self.cfg.host, self.cfg.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;

        self.run_with_listener(listener).await
    }

    /// バインド済みリスナー上でサーブする。ポート 0 でバインドした後に
    /// ローカルアドレスを知りたい場合などに使う。
    pub async fn run_with_listener(self, listener: TcpListener) -> Result<(), ServerError> {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, tls = self.tls.is_some(), "gRPC server starting");
        }

        let mut builder = Server::builder();
        if let Some(tls) = self.tls {
            builder = builder.tls_config(tls).map_err(ServerError::TlsSetup)?;
        }

        let mut builder = builder.layer(SanitizeStatusLayer::new());
        let router = self.handler.register(&mut builder);

        let incoming =
            TcpIncoming::from_listener(listener, true, None).map_err(ServerError::Listener)?;

        router
            .serve_with_incoming(incoming)
            .await
            .map_err(ServerError::Serve)
    }
}
