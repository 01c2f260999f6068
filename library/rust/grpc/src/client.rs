//! ジェネリックな gRPC クライアント接続。
//!
//! [`Connection::connect`] はサービスファサードに対してジェネリックで、
//! 呼び出し元が生成済みクライアントのコンストラクタ ([`Channel`] を受ける
//! 任意のクロージャ) を渡すと、チャネルと型付きファサードの両方を所有する
//! ハンドルが返る。コネクタ自身は各サービスのメソッドを一切知らない。

use serde::Deserialize;
use tonic::transport::{Channel, Endpoint};
use tracing::info;

use crate::tls::{client_tls_config, TlsConfig, TlsError};

/// 接続先設定。
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    /// エンドポイント URI。例: `http://user-service:9000`、TLS 有効時は
    /// `https://user-service:9000`。スキームで平文かどうかを明示し、暗黙の
    /// ダウングレードはしない。
    pub addr: String,
    #[serde(default)]
    pub tls: TlsConfig,
}

/// 接続構築エラー。いずれも起動時の設定不備を示すもので、呼び出し元は
/// リトライせず起動シーケンスで fatal として扱うことを想定する。
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid endpoint address {addr}: {source}")]
    InvalidAddress {
        addr: String,
        #[source]
        source: tonic::transport::Error,
    },

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error("failed to apply TLS configuration: {0}")]
    TlsSetup(#[source] tonic::transport::Error),

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: tonic::transport::Error,
    },
}

/// gRPC サービスへの接続と、その上に構築した型付きファサード。
///
/// トランスポートチャネルをちょうど 1 本所有する。drop または
/// [`Connection::close`] で解放する。`self` を消費するため二重 close は
/// 型上表現できない。
#[derive(Debug)]
pub struct Connection<T> {
    service: T,
    channel: Channel,
}

impl<T> Connection<T> {
    /// `cfg.addr` へダイヤルし、チャネルを `make_service` でラップする。
    ///
    /// ハンドシェイクは戻る前に完了するため、到達不能・設定不備の
    /// エンドポイントは初回リクエスト時ではなく起動時点でここで失敗する。
    /// `make_service` はちょうど 1 回だけ呼ばれる。
    pub async fn connect<F>(make_service: F, cfg: &ConnectionConfig) -> Result<Self, ClientError>
    where
        F: FnOnce(Channel) -> T,
    {
        let endpoint = build_endpoint(cfg)?;
        let channel = endpoint.connect().await.map_err(|source| ClientError::Connect {
            addr: cfg.addr.clone(),
            source,
        })?;
        info!(addr = %cfg.addr, tls = cfg.tls.enable, "connected to gRPC service");

        Ok(Self {
            service: make_service(channel.clone()),
            channel,
        })
    }

    /// [`Connection::connect`] と同様だが、トランスポート接続は初回利用時に
    /// バックグラウンドで確立される。TLS マテリアルとアドレスの検証は
    /// ここでも先行して行う。
    pub fn connect_lazy<F>(make_service: F, cfg: &ConnectionConfig) -> Result<Self, ClientError>
    where
        F: FnOnce(Channel) -> T,
    {
        let endpoint = build_endpoint(cfg)?;
        let channel = endpoint.connect_lazy();

        Ok(Self {
            service: make_service(channel.clone()),
            channel,
        })
    }

    /// 型付きサービスファサード。
    pub fn service(&self) -> &T {
        &self.service
    }

    pub fn service_mut(&mut self) -> &mut T {
        &mut self.service
    }

    /// 下層のチャネルを解放する。
    pub fn close(self) {
        drop(self.channel);
    }
}

fn build_endpoint(cfg: &ConnectionConfig) -> Result<Endpoint, ClientError> {
    let mut endpoint =
        Endpoint::from_shared(cfg.addr.clone()).map_err(|source| ClientError::InvalidAddress {
            addr: cfg.addr.clone(),
            source,
        })?;

    if cfg.tls.enable {
        let tls = client_tls_config(&cfg.tls)?;
        endpoint = endpoint.tls_config(tls).map_err(ClientError::TlsSetup)?;
    }

    Ok(endpoint)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plaintext(addr: &str) -> ConnectionConfig {
        ConnectionConfig {
            addr: addr.to_string(),
            tls: TlsConfig::default(),
        }
    }

    struct UserFacade {
        #[allow(dead_code)]
        channel: Channel,
    }

    struct PostFacade {
        label: &'static str,
        #[allow(dead_code)]
        channel: Channel,
    }

    #[tokio::test]
    async fn invalid_address_is_rejected() {
        let err = Connection::connect_lazy(|c| c, &plaintext("not a uri")).unwrap_err();
        assert!(matches!(err, ClientError::InvalidAddress { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn missing_tls_material_fails_before_dialing() {
        let cfg = ConnectionConfig {
            addr: "https://localhost:50051".to_string(),
            tls: TlsConfig {
                enable: true,
                ..TlsConfig::default()
            },
        };
        let err = Connection::connect_lazy(|c| c, &cfg).unwrap_err();
        assert!(matches!(err, ClientError::Tls(TlsError::Io { .. })), "got {err:?}");
    }

    #[tokio::test]
    async fn eager_connect_to_unreachable_endpoint_fails() {
        // ポート 1 で待ち受けていることはまずない
        let err = Connection::connect(|c| c, &plaintext("http://127.0.0.1:1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Connect { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn distinct_facades_over_the_same_config_are_independent() {
        let cfg = plaintext("http://127.0.0.1:50051");

        let users = Connection::connect_lazy(|channel| UserFacade { channel }, &cfg).unwrap();
        let posts = Connection::connect_lazy(
            |channel| PostFacade {
                label: "posts",
                channel,
            },
            &cfg,
        )
        .unwrap();

        assert_eq!(posts.service().label, "posts");
        let _user_service: &UserFacade = users.service();

        users.close();
        // 片方のハンドルを閉じても `posts` は使える
        assert_eq!(posts.service().label, "posts");
        posts.close();
    }
}
